use crate::error::DispatchError;
use crate::tools::ToolArgs;
use serde::Serialize;
use serde_json::{Value, json};

/// Argument payload as the model produced it.
///
/// Some providers ship arguments as a JSON-encoded string, others as an
/// already-decoded object; both are accepted and decoded at dispatch time.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArguments {
    RawText(String),
    Decoded(ToolArgs),
}

impl ToolArguments {
    pub fn from_value(tool: &str, value: Value) -> Result<Self, DispatchError> {
        match value {
            Value::String(text) => Ok(Self::RawText(text)),
            Value::Object(map) => Ok(Self::Decoded(map)),
            other => Err(DispatchError::malformed_arguments(
                tool,
                format!("expected an object or JSON text, got {}", kind_of(&other)),
            )),
        }
    }

    /// Decodes the payload into a parameter map.
    ///
    /// Blank text decodes to an empty map; the handler then reports the
    /// missing parameters.
    pub fn into_map(self, tool: &str) -> Result<ToolArgs, DispatchError> {
        match self {
            Self::Decoded(map) => Ok(map),
            Self::RawText(text) if text.trim().is_empty() => Ok(ToolArgs::new()),
            Self::RawText(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(DispatchError::malformed_arguments(
                    tool,
                    format!("expected a JSON object, got {}", kind_of(&other)),
                )),
                Err(e) => Err(DispatchError::malformed_arguments(
                    tool,
                    format!("invalid JSON: {e}"),
                )),
            },
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::RawText(text) => Value::String(text.clone()),
            Self::Decoded(map) => Value::Object(map.clone()),
        }
    }
}

/// One tool name plus its argument payload, as extracted from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredCall {
    pub name: String,
    pub arguments: ToolArguments,
}

impl StructuredCall {
    pub fn new(name: impl Into<String>, arguments: ToolArguments) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn decoded(name: impl Into<String>, arguments: ToolArgs) -> Self {
        Self::new(name, ToolArguments::Decoded(arguments))
    }

    /// Extracts a call from any of the accepted shapes:
    ///
    /// - `{"function": {"name": .., "arguments": ..}}`
    /// - `{"name": .., "arguments": ..}`
    /// - `{"functionCall": {"name": .., "args": ..}}`
    pub fn from_value(value: &Value) -> Result<Self, DispatchError> {
        let Value::Object(outer) = value else {
            return Err(DispatchError::malformed_call(format!(
                "expected an object, got {}",
                kind_of(value)
            )));
        };

        let body = match outer.get("function").or_else(|| outer.get("functionCall")) {
            Some(Value::Object(inner)) => inner,
            Some(other) => {
                return Err(DispatchError::malformed_call(format!(
                    "'function' must be an object, got {}",
                    kind_of(other)
                )));
            }
            None => outer,
        };

        let name = match body.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
            Some(Value::String(_)) => return Err(DispatchError::malformed_call("empty tool name")),
            Some(other) => {
                return Err(DispatchError::malformed_call(format!(
                    "tool name must be a string, got {}",
                    kind_of(other)
                )));
            }
            None => return Err(DispatchError::malformed_call("missing 'name'")),
        };

        let payload = body
            .get("arguments")
            .or_else(|| body.get("args"))
            .filter(|payload| !payload.is_null())
            .ok_or_else(|| DispatchError::malformed_call(format!("missing 'arguments' for '{name}'")))?;

        let arguments = ToolArguments::from_value(&name, payload.clone())?;
        Ok(Self { name, arguments })
    }

    /// Canonical `{"function": {"name", "arguments"}}` form.
    pub fn to_value(&self) -> Value {
        json!({
            "function": {
                "name": self.name,
                "arguments": self.arguments.to_value(),
            }
        })
    }
}

/// Serializable outcome of one call in a batch: the tool's result mapping on
/// success, an error record otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CallResult {
    Success(ToolArgs),
    Failure(CallFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallFailure {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl CallResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Success(_))
    }

    pub fn success(&self) -> Option<&ToolArgs> {
        match self {
            CallResult::Success(map) => Some(map),
            CallResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&CallFailure> {
        match self {
            CallResult::Success(_) => None,
            CallResult::Failure(failure) => Some(failure),
        }
    }
}

impl From<&DispatchError> for CallFailure {
    fn from(error: &DispatchError) -> Self {
        Self {
            error: error.to_string(),
            code: error.code().code(),
            tool: error.tool().map(str::to_string),
        }
    }
}

impl From<Result<ToolArgs, DispatchError>> for CallResult {
    fn from(result: Result<ToolArgs, DispatchError>) -> Self {
        match result {
            Ok(map) => CallResult::Success(map),
            Err(error) => CallResult::Failure(CallFailure::from(&error)),
        }
    }
}

/// Ordered call descriptions produced from one model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReply {
    calls: Vec<Value>,
}

impl BatchReply {
    pub fn new(calls: Vec<Value>) -> Self {
        Self { calls }
    }

    pub fn from_calls(calls: Vec<StructuredCall>) -> Self {
        Self {
            calls: calls.iter().map(StructuredCall::to_value).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn first(&self) -> Option<&Value> {
        self.calls.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.calls.iter()
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.calls
    }
}

impl IntoIterator for BatchReply {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.calls.into_iter()
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn accepts_all_call_shapes() {
        let nested = json!({"function": {"name": "create_sheet", "arguments": "{\"sheet_name\":\"A\"}"}});
        let flat = json!({"name": "create_sheet", "arguments": {"sheet_name": "A"}});
        let gemini = json!({"functionCall": {"name": "create_sheet", "args": {"sheet_name": "A"}}});

        let nested = StructuredCall::from_value(&nested).expect("nested");
        assert_matches!(nested.arguments, ToolArguments::RawText(_));
        for call in [flat, gemini] {
            let call = StructuredCall::from_value(&call).expect("call");
            assert_eq!(call.name, "create_sheet");
            assert_matches!(call.arguments, ToolArguments::Decoded(ref map) if map["sheet_name"] == "A");
        }
    }

    #[test]
    fn missing_name_or_payload_is_malformed_call() {
        let no_name = json!({"function": {"arguments": {}}});
        assert_matches!(
            StructuredCall::from_value(&no_name),
            Err(DispatchError::MalformedCall { .. })
        );
        let no_args = json!({"function": {"name": "write_cell"}});
        assert_matches!(
            StructuredCall::from_value(&no_args),
            Err(DispatchError::MalformedCall { .. })
        );
        assert_matches!(
            StructuredCall::from_value(&json!("write_cell")),
            Err(DispatchError::MalformedCall { .. })
        );
    }

    #[test]
    fn non_mapping_payload_is_malformed_arguments() {
        let call = json!({"function": {"name": "write_cell", "arguments": [1, 2]}});
        assert_matches!(
            StructuredCall::from_value(&call),
            Err(DispatchError::MalformedArguments { ref tool, .. }) if tool == "write_cell"
        );
    }

    #[test]
    fn raw_text_must_decode_to_an_object() {
        let bad = ToolArguments::RawText("{not json".into());
        assert_matches!(bad.into_map("write_cell"), Err(DispatchError::MalformedArguments { .. }));

        let list = ToolArguments::RawText("[1]".into());
        assert_matches!(list.into_map("write_cell"), Err(DispatchError::MalformedArguments { .. }));

        let ok = ToolArguments::RawText("{\"cell\":\"A1\"}".into());
        assert_eq!(ok.into_map("write_cell").expect("decoded")["cell"], "A1");
    }

    #[test]
    fn failure_serializes_error_code_and_tool() {
        let result = CallResult::from(Err(DispatchError::ToolNotFound {
            name: "drop".into(),
            available: vec!["write_cell".into()],
        }));
        let value = serde_json::to_value(&result).expect("json");
        assert_eq!(value["code"], -32003);
        assert_eq!(value["tool"], "drop");
        assert!(value["error"].as_str().expect("message").contains("write_cell"));
    }
}
