//! Server entrypoint: config load, tracing init, serve.

use std::sync::Arc;

use ensemble::{OrderLookupTool, ToolSet};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = config::load_and_apply("ensemble", None) {
        tracing::warn!("config load: {}", e);
    }
    let server_config = config::ServerConfig::from_env();
    tracing::info!(?server_config, "starting");

    // Backend tool implementations are registered here; workflows may only
    // declare tools whose implementation exists in this set (UI tools excepted).
    let tool_set = Arc::new(ToolSet::new().register(Arc::new(OrderLookupTool::new(
        server_config.store_root.join("orders.db"),
    ))));

    serve::run_serve(server_config, tool_set).await
}
