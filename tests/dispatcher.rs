use std::collections::HashSet;

use assert_matches::assert_matches;
use serde_json::{Value, json};
use sheet_tools_mcp::error::UNKNOWN_TOOL;
use sheet_tools_mcp::metrics::METRICS;
use sheet_tools_mcp::{DispatchError, ERROR_METRICS};
use sheet_tools_mcp::dispatch::{StructuredCall, ToolArguments};
use sheet_tools_mcp::tools::{self, WriteCellParams};

mod support;

#[tokio::test(flavor = "current_thread")]
async fn dispatch_matches_calling_the_tool_directly() {
    let via_dispatch = support::TestWorkspace::new();
    let direct = support::TestWorkspace::new();

    let result = via_dispatch
        .dispatcher()
        .dispatch(StructuredCall::new(
            "write_cell",
            ToolArguments::RawText(
                r#"{"filepath":"f.xlsx","sheet_name":"Finance","cell":"B2","value":"100"}"#
                    .to_string(),
            ),
        ))
        .await
        .expect("dispatch");

    let expected = tools::write_cell(
        &direct.context(),
        WriteCellParams {
            filepath: "f.xlsx".to_string(),
            sheet_name: "Finance".to_string(),
            cell: "B2".to_string(),
            value: "100".to_string(),
        },
    )
    .expect("direct call");

    assert_eq!(Value::Object(result), serde_json::to_value(expected).unwrap());
    assert_eq!(
        support::cell_value(&via_dispatch.path("f.xlsx"), "Finance", "B2"),
        "100"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_tool_is_reported_without_side_effects() {
    let workspace = support::TestWorkspace::new();

    let err = workspace
        .dispatcher()
        .dispatch_value(&json!({
            "function": {"name": "delete_sheet", "arguments": {"filepath": "f.xlsx"}}
        }))
        .await
        .expect_err("unknown tool");

    assert_matches!(&err, DispatchError::ToolNotFound { name, available } => {
        assert_eq!(name, "delete_sheet");
        assert!(available.contains(&"write_cell".to_string()));
        assert!(available.contains(&"create_sheet".to_string()));
    });
    assert!(workspace.files().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn undecodable_argument_text_never_reaches_the_tool() {
    let workspace = support::TestWorkspace::new();

    let err = workspace
        .dispatcher()
        .dispatch_value(&json!({
            "function": {"name": "create_sheet", "arguments": "{filepath: f.xlsx"}
        }))
        .await
        .expect_err("malformed arguments");

    assert_matches!(err, DispatchError::MalformedArguments { ref tool, .. } if tool == "create_sheet");
    assert_eq!(err.code().code(), -32002);
    assert!(workspace.files().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn missing_required_parameter_fails_the_invocation() {
    let workspace = support::TestWorkspace::new();

    let err = workspace
        .dispatcher()
        .dispatch_value(&json!({"name": "write_cell", "arguments": {"filepath": "f.xlsx"}}))
        .await
        .expect_err("missing parameters");

    assert_matches!(err, DispatchError::Invocation { ref tool, .. } if tool == "write_cell");
    assert!(workspace.files().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn disabled_tools_are_not_resolvable() {
    let workspace = support::TestWorkspace::new();
    let config = workspace.config_with(|config| {
        config.enabled_tools = Some(HashSet::from(["write_cell".to_string()]));
    });
    let dispatcher = workspace.dispatcher_with(config);

    assert!(dispatcher.resolve("write_cell").is_ok());
    assert_matches!(
        dispatcher.resolve("create_sheet"),
        Err(DispatchError::ToolNotFound { .. })
    );
}

#[tokio::test(flavor = "current_thread")]
async fn flat_and_function_call_shapes_dispatch_the_same_way() {
    let workspace = support::TestWorkspace::new();
    let dispatcher = workspace.dispatcher();

    dispatcher
        .dispatch_value(&json!({
            "name": "create_sheet",
            "args": {"filepath": "shapes.xlsx", "sheet_name": "Flat"}
        }))
        .await
        .expect("flat shape");
    dispatcher
        .dispatch_value(&json!({
            "functionCall": {
                "name": "create_sheet",
                "args": {"filepath": "shapes.xlsx", "sheet_name": "Native"}
            }
        }))
        .await
        .expect("functionCall shape");

    assert_eq!(
        support::sheet_names(&workspace.path("shapes.xlsx")),
        vec!["Flat", "Native"]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn description_without_name_is_malformed() {
    let workspace = support::TestWorkspace::new();

    let err = workspace
        .dispatcher()
        .dispatch_value(&json!({"arguments": {"filepath": "f.xlsx"}}))
        .await
        .expect_err("no name");

    assert_matches!(err, DispatchError::MalformedCall { .. });
}

#[tokio::test(flavor = "current_thread")]
async fn row_zero_is_an_invocation_error() {
    let workspace = support::TestWorkspace::new();

    let err = workspace
        .dispatcher()
        .dispatch_value(&json!({
            "name": "write_cell",
            "arguments": {"filepath": "z.xlsx", "sheet_name": "S", "cell": "A0", "value": "v"}
        }))
        .await
        .expect_err("row zero");

    assert_matches!(err, DispatchError::Invocation { ref tool, .. } if tool == "write_cell");
    assert_eq!(err.code().code(), -32004);
    assert!(workspace.files().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn unresolved_names_share_one_metrics_label() {
    let workspace = support::TestWorkspace::new();
    let dispatcher = workspace.dispatcher();
    let before = ERROR_METRICS.get_tool_error_count(UNKNOWN_TOOL);

    for name in ["made_up_tool_alpha", "made_up_tool_beta"] {
        dispatcher
            .dispatch_value(&json!({"name": name, "arguments": {}}))
            .await
            .expect_err("unknown tool");
    }

    assert!(ERROR_METRICS.get_tool_error_count(UNKNOWN_TOOL) >= before + 2);
    assert_eq!(ERROR_METRICS.get_tool_error_count("made_up_tool_alpha"), 0);
    assert_eq!(ERROR_METRICS.get_tool_error_count("made_up_tool_beta"), 0);

    let exposition = METRICS.encode();
    assert!(!exposition.contains("made_up_tool"));
    assert!(exposition.contains("tool=\"unknown\""));
}
