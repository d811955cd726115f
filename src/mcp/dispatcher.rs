// Routes JSON-RPC methods to the tool registry and the spreadsheet service.
//
// Shared by both transports. Every per-request failure becomes a JSON-RPC
// error object here; nothing propagates to the HTTP layer.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use super::protocol::{
    negotiate_version, JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION,
};
use crate::core::sheets::sheets_service::{SERVICE_NAME, SERVICE_VERSION};
use crate::core::sheets::{SheetsService, SpreadsheetApi};
use crate::core::tools::ToolRegistry;

pub const SERVER_NAME: &str = "google-sheets-mcp";

pub struct McpDispatcher<A: SpreadsheetApi> {
    registry: ToolRegistry,
    service: Arc<SheetsService<A>>,
}

impl<A: SpreadsheetApi> McpDispatcher<A> {
    pub fn new(registry: ToolRegistry, service: Arc<SheetsService<A>>) -> Self {
        Self { registry, service }
    }

    pub fn service(&self) -> &SheetsService<A> {
        &self.service
    }

    /// Handles one message. Notifications produce no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request(format!(
                    "Unsupported jsonrpc version '{}'",
                    request.jsonrpc
                )),
            ));
        }

        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize(request.params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(request.params.as_ref()).await,
            other => {
                tracing::debug!(method = other, "Unknown method");
                Err(JsonRpcError::method_not_found(other))
            }
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let version = negotiate_version(requested);
        tracing::info!(requested = ?requested, negotiated = version, "MCP session initialized");

        json!({
            "protocolVersion": version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": SERVER_NAME, "title": SERVICE_NAME, "version": SERVICE_VERSION },
        })
    }

    fn list_tools(&self) -> Value {
        let tools: Vec<Value> = self.registry.list().iter().map(|t| t.to_json()).collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let name = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("tools/call requires a string 'name'"))?;
        let arguments = params.and_then(|p| p.get("arguments"));

        let call = self.registry.parse_call(name, arguments).map_err(|e| {
            tracing::warn!(tool = name, "Rejected tool call: {}", e);
            JsonRpcError::from_invalid_request(&e)
        })?;

        let started = Instant::now();
        let tool = call.name();
        match call.invoke(&self.service).await {
            Ok(result) => {
                tracing::info!(
                    tool = %tool,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool call succeeded"
                );
                Ok(tool_result(result))
            }
            Err(e) => {
                tracing::warn!(
                    tool = %tool,
                    kind = e.kind().as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool call failed: {}",
                    e
                );
                Err(JsonRpcError::from_sheets_error(&e))
            }
        }
    }
}

/// Wraps a tool's JSON output in an MCP `CallToolResult`. Structured content
/// must be an object, so list results are nested under `result`.
fn tool_result(result: Value) -> Value {
    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string());
    let structured = if result.is_object() {
        result
    } else {
        json!({ "result": result })
    };

    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": structured,
        "isError": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sheets::SheetsError;
    use crate::infra::memory::InMemorySpreadsheetApi;

    fn dispatcher() -> McpDispatcher<InMemorySpreadsheetApi> {
        let service = SheetsService::new(InMemorySpreadsheetApi::new(), None);
        McpDispatcher::new(ToolRegistry::new(), Arc::new(service))
    }

    fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(id)),
            method: method.into(),
            params: Some(params),
        }
    }

    async fn call(
        dispatcher: &McpDispatcher<InMemorySpreadsheetApi>,
        name: &str,
        arguments: Value,
    ) -> JsonRpcResponse {
        dispatcher
            .handle(request(
                1,
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn initialize_echoes_supported_version() {
        let response = dispatcher()
            .handle(request(1, "initialize", json!({ "protocolVersion": "2025-03-26" })))
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let notification = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: None,
            method: "notifications/initialized".into(),
            params: None,
        };
        assert!(dispatcher().handle(notification).await.is_none());
    }

    #[tokio::test]
    async fn lists_every_registered_tool() {
        let response = dispatcher()
            .handle(request(2, "tools/list", json!({})))
            .await
            .unwrap();

        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), ToolRegistry::new().list().len());
        assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
    }

    #[tokio::test]
    async fn unknown_tool_never_reaches_the_adapter() {
        let dispatcher = dispatcher();

        let response = call(&dispatcher, "drop_database", json!({})).await;

        let error = response.error.unwrap();
        assert_eq!(error.code, -32602);
        assert_eq!(error.data.unwrap()["kind"], "invalid_request");
        assert_eq!(dispatcher.service().api().call_count(), 0);
    }

    #[tokio::test]
    async fn bad_arguments_never_reach_the_adapter() {
        let dispatcher = dispatcher();

        let response = call(&dispatcher, "list_sheets", json!({ "spreadsheet_id": 5 })).await;

        assert_eq!(response.error.unwrap().code, -32602);
        assert_eq!(dispatcher.service().api().call_count(), 0);
    }

    #[tokio::test]
    async fn successful_calls_return_text_and_structured_content() {
        let dispatcher = dispatcher();

        let created = call(&dispatcher, "create_spreadsheet", json!({ "title": "Plan" })).await;
        let result = created.result.unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(result["structuredContent"]["title"], "Plan");
        let text = result["content"][0]["text"].as_str().unwrap();
        let id = serde_json::from_str::<Value>(text).unwrap()["spreadsheetId"].clone();

        let listed = call(&dispatcher, "list_sheets", json!({ "spreadsheet_id": id })).await;
        assert_eq!(
            listed.result.unwrap()["structuredContent"],
            json!({ "result": ["Sheet1"] })
        );
    }

    #[tokio::test]
    async fn adapter_failures_keep_their_kind() {
        let dispatcher = dispatcher();
        dispatcher
            .service()
            .api()
            .fail_next(SheetsError::PermissionDenied("no access".into()));

        let response = call(&dispatcher, "list_spreadsheets", json!({})).await;

        let error = response.error.unwrap();
        assert_eq!(error.code, -32003);
        assert_eq!(error.data.unwrap()["kind"], "permission_denied");
    }

    #[tokio::test]
    async fn unknown_methods_and_versions_are_rejected() {
        let dispatcher = dispatcher();

        let response = dispatcher
            .handle(request(3, "resources/list", json!({})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);

        let mut old = request(4, "ping", json!({}));
        old.jsonrpc = "1.0".into();
        let response = dispatcher.handle(old).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32600);
        assert_eq!(response.id, json!(4));
    }
}
