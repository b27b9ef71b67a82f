//! Renders registry entries as provider function declarations.
//!
//! The exported schema is only advertised to the model. Arguments are not
//! validated against it; the typed handlers reject bad payloads themselves.

use super::{ToolRegistry, ToolSpec};
use crate::config::ProviderKind;
use serde_json::{Map, Value, json};

/// Provider-neutral description: name, description and an object schema with
/// every declared parameter as a required string.
pub fn export(spec: &ToolSpec) -> Value {
    json!({
        "name": spec.name,
        "description": spec.description,
        "parameters": parameters_schema(spec, "object", "string"),
    })
}

/// OpenAI chat-completions `tools` entry.
pub fn export_openai(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": export(spec),
    })
}

/// Gemini `functionDeclarations` entry; its schema dialect spells types in
/// upper case.
pub fn export_gemini(spec: &ToolSpec) -> Value {
    json!({
        "name": spec.name,
        "description": spec.description,
        "parameters": parameters_schema(spec, "OBJECT", "STRING"),
    })
}

pub fn export_for(provider: ProviderKind, spec: &ToolSpec) -> Value {
    match provider {
        ProviderKind::OpenAi => export_openai(spec),
        ProviderKind::Gemini => export_gemini(spec),
    }
}

pub fn export_all(provider: ProviderKind, registry: &ToolRegistry) -> Vec<Value> {
    registry
        .iter()
        .map(|spec| export_for(provider, spec))
        .collect()
}

fn parameters_schema(spec: &ToolSpec, object_type: &str, string_type: &str) -> Value {
    let properties = spec
        .parameters
        .iter()
        .map(|param| {
            (
                param.name.to_string(),
                json!({ "type": string_type, "description": param.description }),
            )
        })
        .collect::<Map<String, Value>>();
    let required = spec.parameter_names().collect::<Vec<_>>();

    json!({
        "type": object_type,
        "properties": properties,
        "required": required,
    })
}
