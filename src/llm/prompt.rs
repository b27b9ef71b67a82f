use super::ModelRequest;
use crate::config::ProviderKind;
use crate::tools::{ToolRegistry, schema};
use std::fmt::Write as _;

/// Fixed instruction sent ahead of every prompt: the registered tools and
/// the JSON call shape the reply must use.
pub fn system_instruction(registry: &ToolRegistry) -> String {
    let mut text = String::from(
        "You are an assistant that edits Excel workbooks by calling tools.\n\
         Available tools:\n",
    );
    for spec in registry.iter() {
        let params = spec.parameter_names().collect::<Vec<_>>().join(", ");
        let _ = writeln!(text, "- {}({}): {}", spec.name, params, spec.description);
    }
    text.push_str(
        "\nRespond with JSON only, no prose. For one step reply with\n\
         {\"function\": {\"name\": \"<tool>\", \"arguments\": {\"<param>\": \"<value>\"}}}\n\
         and for several steps reply with a JSON array of such objects in the order they must run.\n\
         Omit \"filepath\" to work on the current workbook.",
    );
    text
}

pub fn build_request(registry: &ToolRegistry, provider: ProviderKind, prompt: &str) -> ModelRequest {
    ModelRequest {
        system: system_instruction(registry),
        prompt: prompt.to_string(),
        tools: schema::export_all(provider, registry),
    }
}
