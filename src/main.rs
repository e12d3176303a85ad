/// radflow server entry point
///
/// Initializes configuration from the environment and starts the HTTP server.

use radflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Domain event intake at POST /api/events
/// - Automation sync and manual tests at /api/automations/{id}
/// - Execution history at /api/automations/{id}/executions and /api/executions/{run_id}
/// - Health check at /healthz
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
