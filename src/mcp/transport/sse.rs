// Legacy HTTP+SSE transport.
//
// A client opens GET /sse and is told where to POST its messages. Responses
// for that session are pushed back on the open stream as `message` events.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::{encode_message, AppState};
use crate::core::sheets::SpreadsheetApi;
use crate::mcp::exchange::{Exchange, ExchangeState};
use crate::mcp::protocol::{parse_message, JsonRpcResponse};

pub const MESSAGES_PATH: &str = "/messages/";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
/// Responses buffered per session before senders wait.
const SESSION_BUFFER: usize = 32;

/// Open SSE sessions, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, mpsc::Sender<String>>,
}

impl SessionRegistry {
    /// Registers a new session. It stays registered until the guard drops.
    pub fn open(self: &Arc<Self>) -> (SessionGuard, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        let id = Uuid::new_v4().to_string();
        self.sessions.insert(id.clone(), tx);
        let guard = SessionGuard {
            id,
            registry: Arc::clone(self),
        };
        (guard, rx)
    }

    pub fn sender(&self, session_id: &str) -> Option<mpsc::Sender<String>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Removes its session from the registry when the stream holding it is dropped.
pub struct SessionGuard {
    id: String,
    registry: Arc<SessionRegistry>,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.sessions.remove(&self.id);
        tracing::info!(session_id = %self.id, "SSE session closed");
    }
}

pub async fn open_stream<A: SpreadsheetApi + 'static>(
    State(state): State<AppState<A>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (guard, rx) = state.sessions.open();
    tracing::info!(
        session_id = %guard.id(),
        active = state.sessions.len(),
        "SSE client connected"
    );

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?session_id={}", MESSAGES_PATH, guard.id()));

    let messages = ReceiverStream::new(rx).map(move |message| {
        let _session = &guard;
        Ok::<Event, Infallible>(Event::default().event("message").data(message))
    });

    Sse::new(stream::iter([Ok(endpoint)]).chain(messages))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    session_id: String,
}

pub async fn handle_message<A: SpreadsheetApi + 'static>(
    State(state): State<AppState<A>>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    let mut exchange = Exchange::new("sse");
    exchange.advance(ExchangeState::Receiving);

    let Some(sender) = state.sessions.sender(&query.session_id) else {
        exchange.fail();
        exchange.finish();
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    };

    let request = match parse_message(&body) {
        Ok(request) => request,
        Err(error) => {
            exchange.fail();
            exchange.finish();
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(Value::Null, error)),
            )
                .into_response();
        }
    };

    exchange.advance(ExchangeState::Dispatching);
    let dispatcher = Arc::clone(&state.dispatcher);
    let session_id = query.session_id;

    tokio::spawn(async move {
        let mut exchange = exchange;
        if let Some(response) = dispatcher.handle(request).await {
            exchange.advance(ExchangeState::Streaming);
            if sender.send(encode_message(&response)).await.is_err() {
                tracing::debug!(session_id = %session_id, "Session closed before the response was delivered");
                exchange.fail();
            }
        }
        exchange.finish();
    });

    StatusCode::ACCEPTED.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_the_guard_closes_the_session() {
        let registry = Arc::new(SessionRegistry::default());

        let (guard, _rx) = registry.open();
        let id = guard.id().to_string();
        assert!(registry.sender(&id).is_some());

        drop(guard);
        assert!(registry.sender(&id).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn sessions_get_distinct_ids() {
        let registry = Arc::new(SessionRegistry::default());
        let (a, _) = registry.open();
        let (b, _) = registry.open();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
    }
}
