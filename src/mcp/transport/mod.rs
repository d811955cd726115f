// HTTP surface of the server.
//
//   POST /mcp                streamable HTTP
//   GET  /sse                legacy SSE stream
//   POST /messages/          legacy SSE message intake
//   GET  /health             liveness, never behind the API key
//   GET  /                   service descriptor

pub mod auth;
pub mod sse;
pub mod streamable_http;

use axum::extract::State;
use axum::http::HeaderName;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use self::sse::{SessionRegistry, MESSAGES_PATH};
use self::streamable_http::MCP_SESSION_ID;
use super::dispatcher::McpDispatcher;
use super::protocol::{JsonRpcError, JsonRpcResponse};
use crate::core::config::ServerConfig;
use crate::core::sheets::sheets_models::HealthStatus;
use crate::core::sheets::sheets_service::{SERVICE_NAME, SERVICE_VERSION};
use crate::core::sheets::SpreadsheetApi;

pub struct AppState<A: SpreadsheetApi> {
    pub dispatcher: Arc<McpDispatcher<A>>,
    pub sessions: Arc<SessionRegistry>,
}

// Derive would require `A: Clone`.
impl<A: SpreadsheetApi> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<A: SpreadsheetApi> AppState<A> {
    pub fn new(dispatcher: Arc<McpDispatcher<A>>) -> Self {
        Self {
            dispatcher,
            sessions: Arc::new(SessionRegistry::default()),
        }
    }
}

/// Serializes a response for an SSE `data:` field.
pub(crate) fn encode_message(message: &JsonRpcResponse) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize response: {}", e);
        json!({
            "jsonrpc": "2.0",
            "id": message.id,
            "error": { "code": JsonRpcError::INTERNAL_ERROR, "message": "Internal error" },
        })
        .to_string()
    })
}

pub fn router<A: SpreadsheetApi + 'static>(state: AppState<A>, api_key: Option<&str>) -> Router {
    let mut mcp = Router::new()
        .route("/mcp", post(streamable_http::handle_post::<A>))
        .route("/sse", get(sse::open_stream::<A>))
        .route(MESSAGES_PATH, post(sse::handle_message::<A>))
        .route("/messages", post(sse::handle_message::<A>));

    if let Some(key) = api_key {
        mcp = mcp.route_layer(middleware::from_fn_with_state(
            Arc::<str>::from(key),
            auth::require_api_key,
        ));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID)]);

    Router::new()
        .route("/", get(describe_service))
        .route("/health", get(health::<A>))
        .merge(mcp)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health<A: SpreadsheetApi + 'static>(State(state): State<AppState<A>>) -> Json<HealthStatus> {
    Json(state.dispatcher.service().health_check())
}

async fn describe_service() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "endpoints": {
            "streamable_http": "/mcp",
            "sse": "/sse",
            "messages": MESSAGES_PATH,
            "health": "/health",
        },
    }))
}

/// Binds the listener and serves until ctrl-c.
pub async fn serve<A: SpreadsheetApi + 'static>(
    config: &ServerConfig,
    dispatcher: Arc<McpDispatcher<A>>,
) -> anyhow::Result<()> {
    let app = router(AppState::new(dispatcher), config.api_key.as_deref());
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Streamable HTTP endpoint: http://{}/mcp", addr);
    tracing::info!("SSE endpoint: http://{}/sse", addr);
    if config.api_key.is_some() {
        tracing::info!("API key required on MCP endpoints");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sheets::SheetsService;
    use crate::core::tools::ToolRegistry;
    use crate::infra::memory::InMemorySpreadsheetApi;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use futures::StreamExt;
    use tower::ServiceExt;

    fn state() -> AppState<InMemorySpreadsheetApi> {
        let service = SheetsService::new(InMemorySpreadsheetApi::new(), None);
        AppState::new(Arc::new(McpDispatcher::new(
            ToolRegistry::new(),
            Arc::new(service),
        )))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const INITIALIZE: &str =
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18"}}"#;

    #[tokio::test]
    async fn health_is_open_even_when_a_key_is_required() {
        let app = router(state(), Some("secret"));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn mcp_routes_require_the_api_key() {
        let app = router(state(), Some("secret"));

        let denied = app.clone().oneshot(post_json("/mcp", INITIALIZE)).await.unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let mut request = post_json("/mcp", INITIALIZE);
        request
            .headers_mut()
            .insert(auth::API_KEY_HEADER, "secret".parse().unwrap());
        let allowed = app.oneshot(request).await.unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn initialize_returns_json_and_a_session_id() {
        let response = router(state(), None)
            .oneshot(post_json("/mcp", INITIALIZE))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(MCP_SESSION_ID));
        let body = json_body(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
    }

    #[tokio::test]
    async fn notifications_are_accepted_without_a_body() {
        let response = router(state(), None)
            .oneshot(post_json(
                "/mcp",
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let response = router(state(), None)
            .oneshot(post_json("/mcp", "{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn event_stream_clients_get_a_single_message_event() {
        let mut request = post_json("/mcp", r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#);
        request
            .headers_mut()
            .insert(header::ACCEPT, "text/event-stream".parse().unwrap());

        let response = router(state(), None).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: message"));
        assert!(text.contains(r#""id":7"#));
    }

    #[tokio::test]
    async fn messages_for_unknown_sessions_are_rejected() {
        let response = router(state(), None)
            .oneshot(post_json(
                "/messages/?session_id=missing",
                r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sse_stream_announces_its_message_endpoint() {
        let state = state();
        let sessions = Arc::clone(&state.sessions);

        let response = router(state, None)
            .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sessions.len(), 1);

        let mut frames = response.into_body().into_data_stream();
        let first = frames.next().await.unwrap().unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        assert!(text.contains("event: endpoint"));
        assert!(text.contains("data: /messages/?session_id="));

        drop(frames);
        assert_eq!(sessions.len(), 0);
    }

    #[tokio::test]
    async fn sse_responses_arrive_on_the_session_stream() {
        let state = state();
        let (guard, mut rx) = state.sessions.open();
        let app = router(state.clone(), None);

        let response = app
            .oneshot(post_json(
                &format!("/messages/?session_id={}", guard.id()),
                r#"{"jsonrpc":"2.0","id":"abc","method":"tools/list"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let message: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(message["id"], "abc");
        assert!(message["result"]["tools"].is_array());
    }

    #[tokio::test]
    async fn sse_parse_errors_are_reported_to_the_poster() {
        let state = state();
        let (guard, _rx) = state.sessions.open();

        let response = router(state.clone(), None)
            .oneshot(post_json(
                &format!("/messages?session_id={}", guard.id()),
                "[]",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
