pub mod registry;
pub mod schema;

use crate::config::ServerConfig;
use crate::workbook;
use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub use registry::ToolRegistry;

pub const CREATE_SHEET: &str = "create_sheet";
pub const WRITE_CELL: &str = "write_cell";

pub const CREATE_SHEET_DESCRIPTION: &str = "Create a new sheet, create file if it doesn't exist. \
Fails if a sheet with the same name (ignoring case and surrounding spaces) already exists.";

/// Every tool this crate knows how to run, in registration order.
pub const BUILTIN_TOOL_NAMES: &[&str] = &[WRITE_CELL, CREATE_SHEET];

/// Decoded argument payload keyed by parameter name.
pub type ToolArgs = serde_json::Map<String, Value>;

pub type ToolHandler = fn(&ToolContext, ToolArgs) -> Result<ToolResponse>;

/// One declared parameter. Every parameter is a required string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
}

/// A registered operation: name, description, fixed parameter list and the
/// typed handler that runs it.
#[derive(Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: &'static [ParamSpec],
    pub handler: ToolHandler,
}

impl ToolSpec {
    pub fn declares(&self, param: &str) -> bool {
        self.parameters.iter().any(|spec| spec.name == param)
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.parameters.iter().map(|spec| spec.name)
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

const FILEPATH_PARAM: ParamSpec = ParamSpec {
    name: "filepath",
    description: "Path of the .xlsx workbook, relative to the workspace",
};

const CREATE_SHEET_PARAMS: &[ParamSpec] = &[
    FILEPATH_PARAM,
    ParamSpec {
        name: "sheet_name",
        description: "Name of the sheet to create",
    },
];

const WRITE_CELL_PARAMS: &[ParamSpec] = &[
    FILEPATH_PARAM,
    ParamSpec {
        name: "sheet_name",
        description: "Target sheet; matched ignoring case and surrounding spaces",
    },
    ParamSpec {
        name: "cell",
        description: "Cell address in A1 notation, e.g. B2",
    },
    ParamSpec {
        name: "value",
        description: "Value to store in the cell",
    },
];

pub fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: WRITE_CELL,
            description: "Write a value to a specific cell. Create sheet if missing. Handle spaces, cases safely.",
            parameters: WRITE_CELL_PARAMS,
            handler: invoke_write_cell,
        },
        ToolSpec {
            name: CREATE_SHEET,
            description: CREATE_SHEET_DESCRIPTION,
            parameters: CREATE_SHEET_PARAMS,
            handler: invoke_create_sheet,
        },
    ]
}

/// Settings the handlers need; everything else in the config stays with the
/// request layer.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workspace_root: PathBuf,
    pub include_file: bool,
    pub create_missing_workbook: bool,
}

impl ToolContext {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            workspace_root: config.workspace_root.clone(),
            include_file: config.include_file,
            create_missing_workbook: config.create_missing_workbook,
        }
    }

    fn respond(&self, message: String, path: &Path) -> Result<ToolResponse> {
        let file = if self.include_file {
            Some(workbook::encode_file(path)?)
        } else {
            None
        };
        Ok(ToolResponse { message, file })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ToolResponse {
    pub message: String,
    /// Base64 of the workbook after the mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateSheetParams {
    pub filepath: String,
    pub sheet_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WriteCellParams {
    pub filepath: String,
    pub sheet_name: String,
    pub cell: String,
    #[serde(deserialize_with = "scalar_as_string")]
    #[schemars(with = "String")]
    pub value: String,
}

/// Models routinely emit `"value": 100`; numbers and booleans are accepted
/// and stored as their text.
fn scalar_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string value, got {other}"
        ))),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(tool: &str, args: ToolArgs) -> Result<T> {
    serde_json::from_value(Value::Object(args))
        .with_context(|| format!("invalid parameters for {tool}"))
}

fn invoke_create_sheet(ctx: &ToolContext, args: ToolArgs) -> Result<ToolResponse> {
    create_sheet(ctx, parse_params(CREATE_SHEET, args)?)
}

fn invoke_write_cell(ctx: &ToolContext, args: ToolArgs) -> Result<ToolResponse> {
    write_cell(ctx, parse_params(WRITE_CELL, args)?)
}

pub fn create_sheet(ctx: &ToolContext, params: CreateSheetParams) -> Result<ToolResponse> {
    let path = workbook::resolve_workbook_path(&ctx.workspace_root, &params.filepath)?;
    let created = workbook::create_sheet(&path, &params.sheet_name)?;
    tracing::info!(
        path = %path.display(),
        sheet = %created.sheet_name,
        created_workbook = created.created_workbook,
        "sheet created"
    );
    ctx.respond(
        format!(
            "Sheet '{}' created in '{}'.",
            created.sheet_name, params.filepath
        ),
        &path,
    )
}

pub fn write_cell(ctx: &ToolContext, params: WriteCellParams) -> Result<ToolResponse> {
    let path = workbook::resolve_workbook_path(&ctx.workspace_root, &params.filepath)?;
    let written = workbook::write_cell(
        &path,
        &params.sheet_name,
        &params.cell,
        &params.value,
        ctx.create_missing_workbook,
    )?;
    tracing::info!(
        path = %path.display(),
        sheet = %written.sheet_name,
        cell = %written.cell,
        created_sheet = written.created_sheet,
        created_workbook = written.created_workbook,
        "cell written"
    );
    ctx.respond(
        format!(
            "Value '{}' written to {}:{}",
            params.value,
            written.sheet_name,
            written.cell
        ),
        &path,
    )
}
