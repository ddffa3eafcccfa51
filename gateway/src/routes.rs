use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use agent_core::Agent;

use crate::api::{
    CompletionResponse, ErrorResponse, HealthResponse, InvocationResponse, InvokeRequest, Status,
};
use crate::config::ApiStyle;

/// Sent when the agent's final message carries no text.
pub const EMPTY_COMPLETION: &str = "(no response)";

const PROMPT_REQUIRED: &str = "prompt is required";
const AGENT_FAILED: &str = "agent execution failed";

type AgentFuture = Pin<Box<dyn Future<Output = anyhow::Result<Agent>> + Send>>;

/// Shared handler state. The agent is built on the first invoke and reused
/// while its tools stay reachable; a failed build is retried by the next
/// request.
#[derive(Clone)]
pub struct AppState {
    agent: Arc<Mutex<Option<Arc<Agent>>>>,
    init: Arc<dyn Fn() -> AgentFuture + Send + Sync>,
}

impl AppState {
    pub fn new<F, Fut>(init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Agent>> + Send + 'static,
    {
        Self {
            agent: Arc::new(Mutex::new(None)),
            init: Arc::new(move || Box::pin(init()) as AgentFuture),
        }
    }

    async fn agent(&self) -> anyhow::Result<Arc<Agent>> {
        let mut slot = self.agent.lock().await;
        if let Some(agent) = slot.as_ref() {
            if agent.is_healthy() {
                return Ok(Arc::clone(agent));
            }
            warn!("Knowledge server connection lost, rebuilding agent...");
            *slot = None;
        }

        info!("Building agent...");
        let agent = Arc::new((self.init)().await?);
        *slot = Some(Arc::clone(&agent));
        Ok(agent)
    }
}

pub fn router(style: ApiStyle, state: AppState) -> Router {
    let routes = match style {
        ApiStyle::Basic => Router::new()
            .route("/ping", get(ping))
            .route("/invoke", post(invoke)),
        ApiStyle::Managed => Router::new()
            .route("/ping", get(health))
            .route("/invocations", post(invocations)),
    };
    routes.with_state(state)
}

// --- HANDLERS ---

async fn ping() -> &'static str {
    "pong"
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Healthy".to_string(),
    })
}

async fn invoke(State(state): State<AppState>, body: Bytes) -> Response {
    match answer(&state, &body).await {
        Ok(completion) => Json(CompletionResponse { completion }).into_response(),
        Err(Failure::BadRequest(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: reason,
                details: None,
            }),
        )
            .into_response(),
        Err(Failure::Internal(details)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: AGENT_FAILED.to_string(),
                details: Some(details),
            }),
        )
            .into_response(),
    }
}

async fn invocations(State(state): State<AppState>, body: Bytes) -> Response {
    let (code, response, status, details) = match answer(&state, &body).await {
        Ok(text) => (StatusCode::OK, text, Status::Success, None),
        Err(Failure::BadRequest(reason)) => (StatusCode::BAD_REQUEST, reason, Status::Error, None),
        Err(Failure::Internal(details)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            AGENT_FAILED.to_string(),
            Status::Error,
            Some(details),
        ),
    };
    (
        code,
        Json(InvocationResponse {
            response,
            status,
            details,
        }),
    )
        .into_response()
}

enum Failure {
    BadRequest(String),
    Internal(String),
}

/// Validate the body, run the agent, and return the final text.
async fn answer(state: &AppState, body: &[u8]) -> Result<String, Failure> {
    let request: InvokeRequest = if body.is_empty() {
        InvokeRequest::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| Failure::BadRequest(format!("invalid request body: {}", e)))?
    };

    let prompt = request
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| Failure::BadRequest(PROMPT_REQUIRED.to_string()))?;

    let agent = state.agent().await.map_err(|e| {
        error!("Agent initialization failed: {:#}", e);
        Failure::Internal(format!("{:#}", e))
    })?;

    let reply = agent.invoke(&prompt).await.map_err(|e| {
        error!("Agent Failure: {}", e);
        Failure::Internal(e.to_string())
    })?;

    Ok(reply
        .text()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| EMPTY_COMPLETION.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use agent_core::mcp::{McpClient, McpTool};
    use agent_core::rpc::RemoteToolInfo;
    use agent_core::{AgentConfig, Message, MockChatModel};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state_with(replies: Vec<Message>) -> AppState {
        let model = Arc::new(MockChatModel::new(replies));
        AppState::new(move || {
            let model = Arc::clone(&model);
            async move {
                let tools = agent_tools::local_tools()?;
                Ok::<_, anyhow::Error>(Agent::with_model(model, tools, &AgentConfig::offline("mock")))
            }
        })
    }

    fn failing_init(calls: Arc<AtomicUsize>) -> AppState {
        AppState::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<Agent, _>(anyhow::anyhow!("knowledge server unreachable")) }
        })
    }

    async fn send(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn json_body(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ping_never_builds_agent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = router(ApiStyle::Basic, failing_init(calls.clone()));

        let (status, body) = send(app, "GET", "/ping", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"pong");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invoke_requires_prompt() {
        let app = router(ApiStyle::Basic, state_with(vec![]));
        let (status, body) = send(app, "POST", "/invoke", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&body)["error"], PROMPT_REQUIRED);
    }

    #[tokio::test]
    async fn test_invoke_rejects_blank_and_non_string_prompt() {
        let app = router(ApiStyle::Basic, state_with(vec![]));
        let (status, _) = send(app.clone(), "POST", "/invoke", r#"{"prompt": "  "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(app, "POST", "/invoke", r#"{"prompt": 5}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json_body(&body)["error"].is_string());
    }

    #[tokio::test]
    async fn test_invoke_returns_completion() {
        let app = router(ApiStyle::Basic, state_with(vec![Message::assistant("Hello there!")]));
        let (status, body) = send(app, "POST", "/invoke", r#"{"prompt": "hello"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!({"completion": "Hello there!"}));
    }

    #[tokio::test]
    async fn test_invoke_empty_reply_uses_placeholder() {
        let empty = Message::Assistant {
            content: None,
            tool_calls: Vec::new(),
        };
        let app = router(ApiStyle::Basic, state_with(vec![empty]));
        let (status, body) = send(app, "POST", "/invoke", r#"{"prompt": "hello"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["completion"], EMPTY_COMPLETION);
    }

    #[tokio::test]
    async fn test_invoke_model_failure_is_500() {
        let app = router(ApiStyle::Basic, state_with(vec![]));
        let (status, body) = send(app, "POST", "/invoke", r#"{"prompt": "hello"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let body = json_body(&body);
        assert_eq!(body["error"], AGENT_FAILED);
        assert!(body["details"].as_str().unwrap().contains("no choices"));
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = router(ApiStyle::Basic, failing_init(calls.clone()));

        let (status, body) = send(app.clone(), "POST", "/invoke", r#"{"prompt": "hi"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json_body(&body)["details"]
            .as_str()
            .unwrap()
            .contains("unreachable"));

        let (status, _) = send(app, "POST", "/invoke", r#"{"prompt": "hi"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_agent_is_cached() {
        let built = Arc::new(AtomicUsize::new(0));
        let model = Arc::new(MockChatModel::new(vec![
            Message::assistant("one"),
            Message::assistant("two"),
        ]));
        let counter = built.clone();
        let state = AppState::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let model = Arc::clone(&model);
            async move {
                Ok::<_, anyhow::Error>(Agent::with_model(
                    model,
                    agent_tools::local_tools()?,
                    &AgentConfig::offline("mock"),
                ))
            }
        });
        let app = router(ApiStyle::Basic, state);

        let (_, first) = send(app.clone(), "POST", "/invoke", r#"{"prompt": "a"}"#).await;
        let (_, second) = send(app, "POST", "/invoke", r#"{"prompt": "b"}"#).await;
        assert_eq!(json_body(&first)["completion"], "one");
        assert_eq!(json_body(&second)["completion"], "two");
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    /// Answers the handshake, then hangs up once the client confirms it.
    async fn short_lived_server(stream: tokio::io::DuplexStream) {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        let init: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let reply = json!({"jsonrpc": "2.0", "id": init["id"], "result": {}});
        write
            .write_all(format!("{}\n", reply).as_bytes())
            .await
            .unwrap();
        let _ = lines.next_line().await;
    }

    #[tokio::test]
    async fn test_lost_knowledge_server_rebuilds_agent() {
        let built = Arc::new(AtomicUsize::new(0));
        let clients: Arc<StdMutex<Vec<Arc<McpClient>>>> = Arc::default();
        let model = Arc::new(MockChatModel::new(vec![
            Message::assistant("one"),
            Message::assistant("two"),
        ]));

        let (counter, opened) = (built.clone(), clients.clone());
        let state = AppState::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let (model, opened) = (Arc::clone(&model), Arc::clone(&opened));
            async move {
                let (client_side, server_side) = tokio::io::duplex(4096);
                tokio::spawn(short_lived_server(server_side));
                let (read, write) = tokio::io::split(client_side);
                let client =
                    Arc::new(McpClient::connect("kb", read, write, Duration::from_secs(5)).await?);
                opened.lock().unwrap().push(Arc::clone(&client));

                let info: RemoteToolInfo =
                    serde_json::from_value(json!({"name": "search_documentation"}))?;
                let mut tools = agent_tools::local_tools()?;
                tools.register(Arc::new(McpTool::new(client, info)))?;
                Ok::<_, anyhow::Error>(Agent::with_model(model, tools, &AgentConfig::offline("mock")))
            }
        });
        let app = router(ApiStyle::Basic, state);

        let (status, first) = send(app.clone(), "POST", "/invoke", r#"{"prompt": "a"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&first)["completion"], "one");

        let client = Arc::clone(&clients.lock().unwrap()[0]);
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.is_alive() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let (status, second) = send(app, "POST", "/invoke", r#"{"prompt": "b"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&second)["completion"], "two");
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_managed_ping() {
        let app = router(ApiStyle::Managed, state_with(vec![]));
        let (status, body) = send(app, "GET", "/ping", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!({"status": "Healthy"}));
    }

    #[tokio::test]
    async fn test_managed_invocations() {
        let app = router(ApiStyle::Managed, state_with(vec![Message::assistant("Sunny.")]));
        let (status, body) = send(app, "POST", "/invocations", r#"{"prompt": "weather?"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!({"response": "Sunny.", "status": "success"}));
    }

    #[tokio::test]
    async fn test_managed_missing_prompt() {
        let app = router(ApiStyle::Managed, state_with(vec![]));
        let (status, body) = send(app, "POST", "/invocations", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body = json_body(&body);
        assert_eq!(body["status"], "error");
        assert_eq!(body["response"], PROMPT_REQUIRED);
    }

    #[tokio::test]
    async fn test_managed_failure_carries_details() {
        let model = Arc::new(MockChatModel::failing("overloaded"));
        let state = AppState::new(move || {
            let model = Arc::clone(&model);
            async move {
                Ok::<_, anyhow::Error>(Agent::with_model(
                    model,
                    agent_tools::local_tools()?,
                    &AgentConfig::offline("mock"),
                ))
            }
        });
        let app = router(ApiStyle::Managed, state);
        let (status, body) = send(app, "POST", "/invocations", r#"{"prompt": "hi"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let body = json_body(&body);
        assert_eq!(body["status"], "error");
        assert!(body["details"].as_str().unwrap().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_basic_style_has_no_invocations_route() {
        let app = router(ApiStyle::Basic, state_with(vec![]));
        let (status, _) = send(app, "POST", "/invocations", r#"{"prompt": "hi"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
