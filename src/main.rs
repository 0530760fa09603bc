/// relayflow server entry point
///
/// Starts the HTTP server with configuration read from `RELAYFLOW_*` environment variables:
/// - Workflow management API at /api/workflows/*
/// - Trigger management at /api/workflows/{id}/triggers and /api/triggers/cleanup
/// - Inbound webhooks at /webhook/{path}
/// - Health check at /healthz

use relayflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
