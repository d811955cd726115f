// This is the entry point of the Google Sheets MCP server.
//
// **Architecture Overview:**
// - `core/` = Business logic (tool catalog, spreadsheet service, retry, config)
// - `infra/` = Implementations of core traits (Google REST adapter, credentials)
// - `mcp/` = Model Context Protocol adapters (JSON-RPC dispatch, HTTP transports)
//
// This file's job is to:
// 1. Load configuration
// 2. Resolve Google credentials
// 3. Initialize services (dependency injection)
// 4. Serve the MCP transports until shutdown

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "mcp/mcp_layer.rs"]
mod mcp;

use std::sync::Arc;

use crate::core::config::ServerConfig;
use crate::core::retry::TokioSleeper;
use crate::core::sheets::SheetsService;
use crate::core::tools::ToolRegistry;
use crate::infra::google::credentials;
use crate::infra::google::GoogleSheetsClient;
use crate::mcp::dispatcher::McpDispatcher;
use crate::mcp::transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = ServerConfig::from_env()?;

    // Initialize logging
    let level = if config.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        folder = config.drive_folder_id.as_deref().unwrap_or("<none>"),
        "Starting Google Sheets MCP server"
    );

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;

    // Fails before binding if credentials are missing, conflicting, or malformed.
    let credentials = credentials::resolve(&config.credentials, http.clone()).await?;
    let client = GoogleSheetsClient::new(http, Arc::new(credentials));

    let service = Arc::new(
        SheetsService::new(client, config.drive_folder_id.clone())
            .with_retry(config.retry.clone(), Arc::new(TokioSleeper)),
    );
    let dispatcher = Arc::new(McpDispatcher::new(ToolRegistry::new(), service));

    transport::serve(&config, dispatcher).await
}
