// Streamable HTTP transport: one JSON-RPC message per POST to /mcp.
//
// Responses are plain JSON unless the client only accepts an event stream,
// in which case the response is sent as a single SSE `message` event.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream;
use serde_json::Value;
use std::convert::Infallible;
use uuid::Uuid;

use super::{encode_message, AppState};
use crate::core::sheets::SpreadsheetApi;
use crate::mcp::exchange::{Exchange, ExchangeState};
use crate::mcp::protocol::{parse_message, JsonRpcResponse};

pub const MCP_SESSION_ID: &str = "mcp-session-id";

/// True when the Accept header lists `text/event-stream` but neither JSON nor a wildcard.
fn wants_event_stream(headers: &HeaderMap) -> bool {
    let accepted: Vec<String> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|media| {
            media
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .collect();

    accepted.iter().any(|m| m == "text/event-stream")
        && !accepted
            .iter()
            .any(|m| m == "application/json" || m == "application/*" || m == "*/*")
}

fn single_event(message: &JsonRpcResponse) -> Response {
    let event = Event::default().event("message").data(encode_message(message));
    Sse::new(stream::iter([Ok::<Event, Infallible>(event)])).into_response()
}

pub async fn handle_post<A: SpreadsheetApi + 'static>(
    State(state): State<AppState<A>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut exchange = Exchange::new("streamable_http");
    exchange.advance(ExchangeState::Receiving);

    let request = match parse_message(&body) {
        Ok(request) => request,
        Err(error) => {
            tracing::debug!(code = error.code, "Rejected malformed message: {}", error.message);
            exchange.fail();
            exchange.finish();
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(Value::Null, error)),
            )
                .into_response();
        }
    };
    let is_initialize = request.method == "initialize";

    exchange.advance(ExchangeState::Dispatching);
    let reply = state.dispatcher.handle(request).await;
    exchange.advance(ExchangeState::Streaming);

    let response = match reply {
        None => StatusCode::ACCEPTED.into_response(),
        Some(message) => {
            let session_id = (is_initialize && message.is_success())
                .then(|| Uuid::new_v4().to_string());

            let mut response = if wants_event_stream(&headers) {
                single_event(&message)
            } else {
                Json(message).into_response()
            };

            if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(MCP_SESSION_ID), value);
            }
            response
        }
    };

    exchange.finish();
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn event_stream_only_when_json_is_not_acceptable() {
        assert!(wants_event_stream(&accept("text/event-stream")));
        assert!(!wants_event_stream(&accept("application/json, text/event-stream")));
        assert!(!wants_event_stream(&accept("text/event-stream;q=0.5, */*")));
        assert!(!wants_event_stream(&accept("application/json")));
        assert!(!wants_event_stream(&HeaderMap::new()));
    }
}
