use super::{ToolSpec, builtin_tools};
use crate::config::ServerConfig;
use anyhow::{Result, bail};

/// Name-indexed table of the operations the dispatcher may run.
///
/// Built once at startup; read-only afterwards, so it is shared behind an
/// `Arc` without locking.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every built-in tool the configuration enables.
    pub fn from_config(config: &ServerConfig) -> Self {
        let tools = builtin_tools()
            .into_iter()
            .filter(|spec| config.is_tool_enabled(spec.name))
            .collect::<Vec<_>>();
        tracing::debug!(
            tools = ?tools.iter().map(|spec| spec.name).collect::<Vec<_>>(),
            "tool registry built"
        );
        Self { tools }
    }

    pub fn builtin() -> Self {
        Self {
            tools: builtin_tools(),
        }
    }

    pub fn register(&mut self, spec: ToolSpec) -> Result<()> {
        if self.lookup(spec.name).is_some() {
            bail!("tool '{}' is already registered", spec.name);
        }
        self.tools.push(spec);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&ToolSpec> {
        let name = name.trim();
        self.tools.iter().find(|spec| spec.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|spec| spec.name.to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CREATE_SHEET, WRITE_CELL};

    #[test]
    fn builtin_registry_resolves_both_tools() {
        let registry = ToolRegistry::builtin();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup(WRITE_CELL).map(|s| s.name), Some(WRITE_CELL));
        assert_eq!(
            registry.lookup(" create_sheet ").map(|s| s.name),
            Some(CREATE_SHEET)
        );
        assert!(registry.lookup("delete_sheet").is_none());
        assert!(registry.lookup("Create_Sheet").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::new();
        let spec = ToolRegistry::builtin()
            .lookup(WRITE_CELL)
            .copied()
            .expect("write_cell");
        registry.register(spec).expect("first registration");
        let err = registry.register(spec).expect_err("duplicate");
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.names(), vec![WRITE_CELL.to_string()]);
    }
}
