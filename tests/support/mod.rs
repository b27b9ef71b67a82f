#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sheet_tools_mcp::config::{ModelConfig, ProviderKind};
use sheet_tools_mcp::dispatch::Dispatcher;
use sheet_tools_mcp::llm::{ModelClient, ModelError, ModelReply, ModelRequest};
use sheet_tools_mcp::state::AppState;
use sheet_tools_mcp::tools::{ToolContext, ToolRegistry};
use sheet_tools_mcp::{ServerConfig, TransportKind};
use tempfile::{TempDir, tempdir};
use umya_spreadsheet::{self, Spreadsheet};

pub fn write_workbook_to_path<F>(path: &Path, f: F)
where
    F: FnOnce(&mut Spreadsheet),
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create dir");
    }
    let mut book = umya_spreadsheet::new_file();
    f(&mut book);
    umya_spreadsheet::writer::xlsx::write(&book, path).expect("write workbook");
}

pub fn read_workbook(path: &Path) -> Spreadsheet {
    umya_spreadsheet::reader::xlsx::read(path).expect("read workbook")
}

pub fn sheet_names(path: &Path) -> Vec<String> {
    read_workbook(path)
        .get_sheet_collection()
        .iter()
        .map(|sheet| sheet.get_name().to_string())
        .collect()
}

pub fn cell_value(path: &Path, sheet: &str, cell: &str) -> String {
    read_workbook(path)
        .get_sheet_by_name(sheet)
        .unwrap_or_else(|| panic!("sheet {sheet} missing"))
        .get_value(cell)
}

pub struct TestWorkspace {
    _tempdir: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let tempdir = tempdir().expect("tempdir");
        let root = tempdir.path().to_path_buf();
        Self {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Fresh workbook holding the library default `Sheet1`.
    pub fn create_workbook<F>(&self, name: &str, f: F) -> PathBuf
    where
        F: FnOnce(&mut Spreadsheet),
    {
        let path = self.path(name);
        write_workbook_to_path(&path, f);
        path
    }

    pub fn files(&self) -> Vec<String> {
        let mut names = std::fs::read_dir(&self.root)
            .expect("read workspace")
            .map(|entry| {
                entry
                    .expect("dir entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            workspace_root: self.root.clone(),
            default_workbook: PathBuf::from("uploaded_file.xlsx"),
            default_sheet: "Sheet1".to_string(),
            enabled_tools: None,
            transport: TransportKind::Http,
            http_bind_address: "127.0.0.1:8079".parse().unwrap(),
            model: ModelConfig {
                provider: ProviderKind::OpenAi,
                model: "gpt-4o-mini".to_string(),
                api_base: "http://127.0.0.1:9/v1".to_string(),
                api_key: None,
                timeout: Duration::from_secs(5),
            },
            include_file: false,
            create_missing_workbook: true,
        }
    }

    pub fn config_with<F>(&self, configure: F) -> ServerConfig
    where
        F: FnOnce(&mut ServerConfig),
    {
        let mut config = self.config();
        configure(&mut config);
        config
    }

    pub fn context(&self) -> ToolContext {
        ToolContext::from_config(&self.config())
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher_with(self.config())
    }

    pub fn dispatcher_with(&self, config: ServerConfig) -> Dispatcher {
        Dispatcher::new(
            Arc::new(ToolRegistry::from_config(&config)),
            ToolContext::from_config(&config),
        )
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState::with_model(Arc::new(self.config()), None))
    }

    pub fn app_state_with_model(&self, model: Arc<dyn ModelClient>) -> Arc<AppState> {
        Arc::new(AppState::with_model(Arc::new(self.config()), Some(model)))
    }
}

/// Model double that answers every request with a canned reply and keeps
/// the requests it saw.
#[derive(Debug)]
pub struct StubModel {
    reply: Result<ModelReply, String>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl StubModel {
    pub fn replying(reply: ModelReply) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn text(text: &str) -> Arc<Self> {
        Self::replying(ModelReply::text(text))
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelClient for StubModel {
    fn provider(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        self.requests.lock().push(request.clone());
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(message) => Err(ModelError::Status {
                provider: ProviderKind::OpenAi,
                status: 503,
                body: message.clone(),
            }),
        }
    }
}
