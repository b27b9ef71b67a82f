use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::tools::BUILTIN_TOOL_NAMES;

const DEFAULT_WORKBOOK: &str = "uploaded_file.xlsx";
const DEFAULT_SHEET: &str = "Sheet1";
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8000";
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Stdio,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::Stdio => write!(f, "stdio"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[value(name = "openai")]
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Gemini => "gemini-1.5-flash",
        }
    }

    pub fn default_api_base(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    /// Conventional environment variable holding the provider's key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Gemini => write!(f, "gemini"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ModelConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub workspace_root: PathBuf,
    /// Injected as `filepath` when a model-generated call omits it.
    pub default_workbook: PathBuf,
    /// Injected as `sheet_name` for `write_cell` calls that omit it.
    pub default_sheet: String,
    pub enabled_tools: Option<HashSet<String>>,
    pub transport: TransportKind,
    pub http_bind_address: SocketAddr,
    pub model: ModelConfig,
    /// Attach the workbook's base64 bytes to every successful tool result.
    pub include_file: bool,
    /// Whether `write_cell` creates a workbook that does not exist yet.
    pub create_missing_workbook: bool,
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            workspace_root: cli_workspace_root,
            default_workbook: cli_default_workbook,
            default_sheet: cli_default_sheet,
            enabled_tools: cli_enabled_tools,
            transport: cli_transport,
            http_bind: cli_http_bind,
            provider: cli_provider,
            model: cli_model,
            api_base: cli_api_base,
            api_key: cli_api_key,
            model_timeout_secs: cli_model_timeout_secs,
            include_file: cli_include_file,
            create_missing_workbook: cli_create_missing_workbook,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            workspace_root: file_workspace_root,
            default_workbook: file_default_workbook,
            default_sheet: file_default_sheet,
            enabled_tools: file_enabled_tools,
            transport: file_transport,
            http_bind: file_http_bind,
            provider: file_provider,
            model: file_model,
            api_base: file_api_base,
            model_timeout_secs: file_model_timeout_secs,
            include_file: file_include_file,
            create_missing_workbook: file_create_missing_workbook,
        } = file_config;

        let workspace_root = cli_workspace_root
            .or(file_workspace_root)
            .unwrap_or_else(|| PathBuf::from("."));

        let default_workbook = cli_default_workbook
            .or(file_default_workbook)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKBOOK));

        let default_sheet = cli_default_sheet
            .or(file_default_sheet)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_SHEET.to_string());

        let enabled_tools = cli_enabled_tools
            .or(file_enabled_tools)
            .map(|tools| {
                tools
                    .into_iter()
                    .map(|tool| tool.trim().to_ascii_lowercase())
                    .filter(|tool| !tool.is_empty())
                    .collect::<HashSet<_>>()
            })
            .filter(|set| !set.is_empty());

        if let Some(tools) = enabled_tools.as_ref() {
            let unknown = tools
                .iter()
                .filter(|tool| !BUILTIN_TOOL_NAMES.contains(&tool.as_str()))
                .cloned()
                .collect::<Vec<_>>();
            anyhow::ensure!(
                unknown.is_empty(),
                "unknown tools in enabled_tools: {}",
                unknown.join(", ")
            );
        }

        let transport = cli_transport
            .or(file_transport)
            .unwrap_or(TransportKind::Http);

        let http_bind_address = match cli_http_bind.or(file_http_bind) {
            Some(addr) => addr,
            None => DEFAULT_HTTP_BIND
                .parse()
                .context("default bind address invalid")?,
        };

        let provider = cli_provider.or(file_provider).unwrap_or(ProviderKind::OpenAi);
        let model_name = cli_model
            .or(file_model)
            .unwrap_or_else(|| provider.default_model().to_string());
        let api_base = cli_api_base
            .or(file_api_base)
            .unwrap_or_else(|| provider.default_api_base().to_string())
            .trim_end_matches('/')
            .to_string();
        // Keys are never read from the config file.
        let api_key = cli_api_key
            .or_else(|| std::env::var(provider.api_key_env()).ok())
            .filter(|key| !key.trim().is_empty());
        let timeout = Duration::from_secs(
            cli_model_timeout_secs
                .or(file_model_timeout_secs)
                .unwrap_or(DEFAULT_MODEL_TIMEOUT_SECS)
                .max(1),
        );

        let include_file = cli_include_file.or(file_include_file).unwrap_or(true);
        let create_missing_workbook = cli_create_missing_workbook
            .or(file_create_missing_workbook)
            .unwrap_or(true);

        Ok(Self {
            workspace_root,
            default_workbook,
            default_sheet,
            enabled_tools,
            transport,
            http_bind_address,
            model: ModelConfig {
                provider,
                model: model_name,
                api_base,
                api_key,
                timeout,
            },
            include_file,
            create_missing_workbook,
        })
    }

    /// Fail-fast checks run once before the server starts.
    pub fn validate(&self) -> Result<()> {
        self.ensure_workspace_root()?;
        anyhow::ensure!(
            !self.default_workbook.as_os_str().is_empty(),
            "default workbook path must not be empty"
        );
        crate::workbook::resolve_workbook_path(
            &self.workspace_root,
            &self.default_workbook.to_string_lossy(),
        )
        .context("default workbook is not usable")?;
        if self.transport == TransportKind::Http && !self.model.is_configured() {
            tracing::warn!(
                provider = %self.model.provider,
                env = self.model.provider.api_key_env(),
                "no model API key configured; /chat will be unavailable"
            );
        }
        Ok(())
    }

    pub fn ensure_workspace_root(&self) -> Result<()> {
        anyhow::ensure!(
            self.workspace_root.exists(),
            "workspace root {:?} does not exist",
            self.workspace_root
        );
        anyhow::ensure!(
            self.workspace_root.is_dir(),
            "workspace root {:?} is not a directory",
            self.workspace_root
        );
        Ok(())
    }

    pub fn is_tool_enabled(&self, tool: &str) -> bool {
        match &self.enabled_tools {
            Some(set) => set.contains(&tool.to_ascii_lowercase()),
            None => true,
        }
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "sheet-tools-mcp",
    about = "Spreadsheet tool-calling server for LLM agents",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML, JSON or TOML)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "SHEET_TOOLS_WORKSPACE",
        value_name = "DIR",
        help = "Directory that relative workbook paths resolve against"
    )]
    pub workspace_root: Option<PathBuf>,

    #[arg(
        long,
        env = "SHEET_TOOLS_DEFAULT_WORKBOOK",
        value_name = "FILE",
        help = "Workbook used when a tool call omits filepath"
    )]
    pub default_workbook: Option<PathBuf>,

    #[arg(
        long,
        env = "SHEET_TOOLS_DEFAULT_SHEET",
        value_name = "NAME",
        help = "Sheet used when write_cell omits sheet_name"
    )]
    pub default_sheet: Option<String>,

    #[arg(
        long,
        env = "SHEET_TOOLS_ENABLED_TOOLS",
        value_name = "TOOL",
        value_delimiter = ',',
        help = "Restrict registration to the provided tool names"
    )]
    pub enabled_tools: Option<Vec<String>>,

    #[arg(
        long,
        env = "SHEET_TOOLS_TRANSPORT",
        value_enum,
        value_name = "TRANSPORT",
        help = "Transport to expose (http or stdio)"
    )]
    pub transport: Option<TransportKind>,

    #[arg(
        long,
        env = "SHEET_TOOLS_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address when using http transport"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "SHEET_TOOLS_PROVIDER",
        value_enum,
        value_name = "PROVIDER",
        help = "Model provider used by /chat"
    )]
    pub provider: Option<ProviderKind>,

    #[arg(
        long,
        env = "SHEET_TOOLS_MODEL",
        value_name = "MODEL",
        help = "Model name passed to the provider"
    )]
    pub model: Option<String>,

    #[arg(
        long,
        env = "SHEET_TOOLS_API_BASE",
        value_name = "URL",
        help = "Override the provider API base URL"
    )]
    pub api_base: Option<String>,

    #[arg(
        long,
        env = "SHEET_TOOLS_API_KEY",
        value_name = "KEY",
        hide_env_values = true,
        help = "Provider API key (falls back to OPENAI_API_KEY / GEMINI_API_KEY)"
    )]
    pub api_key: Option<String>,

    #[arg(
        long,
        env = "SHEET_TOOLS_MODEL_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Timeout for one model request",
        value_parser = clap::value_parser!(u64)
    )]
    pub model_timeout_secs: Option<u64>,

    #[arg(
        long,
        env = "SHEET_TOOLS_INCLUDE_FILE",
        value_name = "BOOL",
        help = "Attach the base64 workbook to tool results"
    )]
    pub include_file: Option<bool>,

    #[arg(
        long,
        env = "SHEET_TOOLS_CREATE_MISSING_WORKBOOK",
        value_name = "BOOL",
        help = "Let write_cell create a workbook that does not exist"
    )]
    pub create_missing_workbook: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    workspace_root: Option<PathBuf>,
    default_workbook: Option<PathBuf>,
    default_sheet: Option<String>,
    enabled_tools: Option<Vec<String>>,
    transport: Option<TransportKind>,
    http_bind: Option<SocketAddr>,
    provider: Option<ProviderKind>,
    model: Option<String>,
    api_base: Option<String>,
    model_timeout_secs: Option<u64>,
    include_file: Option<bool>,
    create_missing_workbook: Option<bool>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        "toml" => toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
