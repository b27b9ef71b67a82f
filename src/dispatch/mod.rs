//! Turning model output into tool invocations.
//!
//! [`normalize`] reduces free text to call descriptions, [`Dispatcher`]
//! resolves and runs one call, and [`run_batch`] runs a whole reply in order
//! with default arguments filled in.

pub mod batch;
pub mod call;
pub mod dispatcher;
pub mod normalize;

pub use batch::{BatchCoordinator, DefaultArguments, run_batch};
pub use call::{BatchReply, CallFailure, CallResult, StructuredCall, ToolArguments};
pub use dispatcher::Dispatcher;
pub use normalize::normalize;
