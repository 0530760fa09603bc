/// Server setup and initialization
///
/// Wires together storage, the component runner, the workflow engine, the webhook manager
/// and the trigger manager, then mounts every HTTP route on one Axum router.

use crate::{
    api::{create_trigger_routes, create_webhook_routes, create_workflow_routes, AppState},
    config::Config,
    runtime::{BuiltinComponentRunner, WorkflowEngine},
    storage::{SqliteStorage, Storage},
    triggers::{TriggerManager, WebhookManager},
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build every component, start the triggers and return the router with its state.
pub async fn create_app(config: &Config) -> Result<(Router, AppState)> {
    if let Some(dir) = sqlite_data_dir(&config.database.url) {
        tracing::info!("📁 Ensuring data directory exists: {}", dir);
        std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create data directory {}", dir))?;
    }

    tracing::info!("🏗️ Opening workflow storage");
    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::connect(&config.database.url)
            .await
            .context("Failed to open workflow storage")?,
    );

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(WorkflowEngine::new(
        Arc::clone(&storage),
        Arc::new(BuiltinComponentRunner::default()),
        config.engine.node_timeout(),
    ));

    tracing::info!("🔗 Initializing webhook manager");
    let webhooks = Arc::new(WebhookManager::new(
        Arc::clone(&storage),
        Arc::clone(&engine),
        config.webhooks.public_base_url.clone(),
    ));

    tracing::info!("⏰ Initializing trigger manager");
    let triggers = Arc::new(
        TriggerManager::new(Arc::clone(&storage), Arc::clone(&engine), Arc::clone(&webhooks))
            .await
            .context("Failed to initialize trigger manager")?,
    );
    triggers.start().await.context("Failed to start trigger manager")?;

    if let Some(every) = config.engine.cleanup_interval() {
        tracing::info!("🧹 Trigger cleanup every {:?}", every);
        triggers.spawn_cleanup(every).await;
    }

    let state = AppState {
        storage,
        engine,
        webhooks,
        triggers,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_trigger_routes())
        .merge(create_webhook_routes())
        .with_state(state.clone());

    tracing::info!("✅ Application initialized successfully");

    Ok((app, state))
}

/// Start the HTTP server with the given configuration
///
/// Serves until Ctrl-C, then stops every timer before returning.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relayflow=info")))
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting relayflow server...");

    let (app, state) = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("Shutting down triggers");
    state.triggers.stop().await?;

    Ok(())
}

/// Parent directory of a file-backed SQLite URL.
fn sqlite_data_dir(url: &str) -> Option<String> {
    let path = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    if path.contains(":memory:") {
        return None;
    }
    std::path::Path::new(path)
        .parent()
        .map(|dir| dir.to_string_lossy().into_owned())
        .filter(|dir| !dir.is_empty())
}

async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, EngineConfig, ServerConfig, WebhookConfig};
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    fn memory_config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".into(),
            },
            engine: EngineConfig {
                node_timeout_secs: 5,
                cleanup_interval_secs: 0,
            },
            webhooks: WebhookConfig {
                public_base_url: "http://localhost:3004".into(),
            },
        }
    }

    #[test]
    fn data_dir_is_derived_from_url() {
        assert_eq!(sqlite_data_dir("sqlite://data/relayflow.db").as_deref(), Some("data"));
        assert_eq!(sqlite_data_dir("sqlite:/var/lib/rf/db.sqlite?mode=rwc").as_deref(), Some("/var/lib/rf"));
        assert_eq!(sqlite_data_dir("sqlite::memory:"), None);
        assert_eq!(sqlite_data_dir("sqlite://local.db"), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn app_serves_health_and_api() {
        let (app, state) = create_app(&memory_config()).await.unwrap();
        assert!(state.triggers.is_running());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/api/operators").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        state.triggers.stop().await.unwrap();
    }
}
