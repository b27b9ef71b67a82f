use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sheet_tools_mcp::dispatch::StructuredCall;
use sheet_tools_mcp::http::router;
use sheet_tools_mcp::llm::ModelReply;
use tower::ServiceExt;

mod support;

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.oneshot(request).await.expect("request");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
        .to_vec();
    (status, body)
}

async fn post_json(router: Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request");
    let (status, bytes) = send(router, request).await;
    let json = serde_json::from_slice(&bytes).expect("json body");
    (status, json)
}

async fn get(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    send(router, request).await
}

#[tokio::test]
async fn mcp_runs_first_tool_call() {
    let workspace = support::TestWorkspace::new();
    let app = router(workspace.app_state());

    let body = json!({
        "tool_calls": [
            {"function": {"name": "create_sheet", "arguments": "{\"filepath\":\"m.xlsx\",\"sheet_name\":\"Finance\"}"}},
            {"function": {"name": "create_sheet", "arguments": {"filepath": "m.xlsx", "sheet_name": "Ignored"}}}
        ]
    });
    let (status, json) = post_json(app, "/mcp", &body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("Finance"));
    assert_eq!(support::sheet_names(&workspace.path("m.xlsx")), vec!["Finance"]);
}

#[tokio::test]
async fn mcp_accepts_bare_call_description() {
    let workspace = support::TestWorkspace::new();
    let app = router(workspace.app_state());

    let body = json!({
        "name": "write_cell",
        "arguments": {"filepath": "bare.xlsx", "sheet_name": "Data", "cell": "A1", "value": "hi"}
    });
    let (status, json) = post_json(app, "/mcp", &body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Value 'hi' written to Data:A1");
}

#[tokio::test]
async fn mcp_unknown_tool_is_a_server_error() {
    let workspace = support::TestWorkspace::new();
    let app = router(workspace.app_state());

    let body = json!({"tool_calls": [{"function": {"name": "drop_table", "arguments": {}}}]});
    let (status, json) = post_json(app, "/mcp", &body.to_string()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("drop_table"));
    assert!(workspace.files().is_empty());
}

#[tokio::test]
async fn mcp_rejects_invalid_json_and_empty_call_lists() {
    let workspace = support::TestWorkspace::new();

    let (status, json) = post_json(router(workspace.app_state()), "/mcp", "{not json").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].is_string());

    let (status, json) = post_json(router(workspace.app_state()), "/mcp", r#"{"tool_calls": []}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "request contains no tool calls");
}

#[tokio::test]
async fn chat_runs_every_call_from_a_fenced_reply() {
    let workspace = support::TestWorkspace::new();
    let model = support::StubModel::text(
        "```json\n[\n{\"function\": {\"name\": \"create_sheet\", \"arguments\": {\"sheet_name\": \"Finance\"}}},\n{\"function\": {\"name\": \"write_cell\", \"arguments\": {\"sheet_name\": \"finance \", \"cell\": \"B2\", \"value\": \"100\"}}}\n]\n```",
    );
    let app = router(workspace.app_state_with_model(model.clone()));

    let (status, json) = post_json(
        app,
        "/chat",
        r#"{"prompt": "Create a Finance sheet and put 100 in B2"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = json["results"].as_array().expect("results");
    assert_eq!(results.len(), 2);
    assert_eq!(results[1]["message"], "Value '100' written to Finance:B2");

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, "Create a Finance sheet and put 100 in B2");
    assert!(requests[0].system.contains("write_cell"));

    let path = workspace.path("uploaded_file.xlsx");
    assert_eq!(support::cell_value(&path, "Finance", "B2"), "100");
}

#[tokio::test]
async fn chat_prefers_native_function_calls() {
    let workspace = support::TestWorkspace::new();
    let mut args = serde_json::Map::new();
    args.insert("sheet_name".into(), json!("Native"));
    let model = support::StubModel::replying(ModelReply {
        text: "ignored prose".to_string(),
        calls: vec![StructuredCall::decoded("create_sheet", args)],
    });
    let app = router(workspace.app_state_with_model(model));

    let (status, json) = post_json(app, "/chat", r#"{"prompt": "add a sheet"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["results"].as_array().unwrap().len(), 1);
    assert_eq!(
        support::sheet_names(&workspace.path("uploaded_file.xlsx")),
        vec!["Native"]
    );
}

#[tokio::test]
async fn chat_prose_reply_returns_raw_text() {
    let workspace = support::TestWorkspace::new();
    let model = support::StubModel::text("Sorry, I can't help with that.");
    let app = router(workspace.app_state_with_model(model));

    let (status, json) = post_json(app, "/chat", r#"{"prompt": "hello"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].is_string());
    assert_eq!(json["raw"], "Sorry, I can't help with that.");
    assert!(workspace.files().is_empty());
}

#[tokio::test]
async fn chat_without_model_or_with_failing_model_is_an_error() {
    let workspace = support::TestWorkspace::new();

    let (status, json) =
        post_json(router(workspace.app_state()), "/chat", r#"{"prompt": "hi"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "no model provider is configured");

    let failing = support::StubModel::failing("upstream overloaded");
    let (status, json) = post_json(
        router(workspace.app_state_with_model(failing)),
        "/chat",
        r#"{"prompt": "hi"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json.get("raw").is_none());
}

#[tokio::test]
async fn chat_requires_a_prompt_field() {
    let workspace = support::TestWorkspace::new();
    let model = support::StubModel::text("[]");
    let app = router(workspace.app_state_with_model(model.clone()));

    let (status, json) = post_json(app, "/chat", r#"{"message": "hi"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("prompt"));
    assert!(model.requests().is_empty());
}

#[tokio::test]
async fn health_is_live_and_readiness_reports_missing_model() {
    let workspace = support::TestWorkspace::new();

    let (status, body) = get(router(workspace.app_state()), "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");

    let (status, body) = get(router(workspace.app_state()), "/ready").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["components"]["model"]["status"], "degraded");
}

#[tokio::test]
async fn metrics_endpoint_exposes_batch_histogram() {
    let workspace = support::TestWorkspace::new();

    let (status, body) = get(router(workspace.app_state()), "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).expect("utf8");
    assert!(text.contains("sheet_batch_size"));
    assert!(text.contains("sheet_tool_calls"));
}
