use crate::dispatch::StructuredCall;
use crate::error::to_rmcp_error;
use crate::state::AppState;
use crate::tools::{self, CreateSheetParams, ToolResponse, WriteCellParams};
use anyhow::Result;
use rmcp::{
    ErrorData as McpError, Json, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const INSTRUCTIONS: &str = "\
Spreadsheet editing tools.

- create_sheet: add a sheet to a workbook, creating the .xlsx file when it does not exist. \
A name matching an existing sheet (ignoring case and surrounding spaces) is an error.
- write_cell: write one value into an A1 address. The sheet is matched ignoring case and \
surrounding spaces and is created when nothing matches.

Paths are relative to the server workspace. Results carry a confirmation message and, \
when enabled, the updated workbook as base64.";

#[derive(Clone)]
pub struct SheetToolsServer {
    state: Arc<AppState>,
    tool_router: ToolRouter<SheetToolsServer>,
}

impl SheetToolsServer {
    pub fn from_state(state: Arc<AppState>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    /// Serves MCP over stdin/stdout until the peer disconnects or `shutdown`
    /// fires.
    pub async fn run_stdio(self, shutdown: CancellationToken) -> Result<()> {
        let service = self
            .serve(stdio())
            .await
            .inspect_err(|error| tracing::error!("serving error: {:?}", error))?;

        let cancel = service.cancellation_token();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            cancel.cancel();
        });

        let reason = service.waiting().await?;
        tracing::info!(?reason, "stdio transport closed");
        Ok(())
    }

    /// Same path as `/mcp`: the typed parameters are re-encoded and sent
    /// through the dispatcher.
    async fn run_tool<P: Serialize>(
        &self,
        tool: &str,
        params: P,
    ) -> Result<Json<ToolResponse>, McpError> {
        let args = match serde_json::to_value(params) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(McpError::invalid_params("parameters must be an object", None)),
            Err(e) => return Err(McpError::invalid_params(e.to_string(), None)),
        };
        let result = self
            .state
            .dispatcher()
            .dispatch(StructuredCall::decoded(tool, args))
            .await
            .map_err(|error| to_rmcp_error(&error))?;
        serde_json::from_value(Value::Object(result))
            .map(Json)
            .map_err(|e| McpError::internal_error(e.to_string(), None))
    }
}

#[tool_router]
impl SheetToolsServer {
    #[tool(
        name = "create_sheet",
        description = "Create a new sheet, create file if it doesn't exist. Fails if a sheet with the same name (ignoring case and surrounding spaces) already exists."
    )]
    pub async fn create_sheet(
        &self,
        Parameters(params): Parameters<CreateSheetParams>,
    ) -> Result<Json<ToolResponse>, McpError> {
        self.run_tool(tools::CREATE_SHEET, params).await
    }

    #[tool(
        name = "write_cell",
        description = "Write a value to a specific cell. Create sheet if missing. Handle spaces, cases safely."
    )]
    pub async fn write_cell(
        &self,
        Parameters(params): Parameters<WriteCellParams>,
    ) -> Result<Json<ToolResponse>, McpError> {
        self.run_tool(tools::WRITE_CELL, params).await
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for SheetToolsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(INSTRUCTIONS.to_string()),
            ..ServerInfo::default()
        }
    }
}
