#![forbid(unsafe_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use cfbind_adapter::{
    now_unix_ms, AdapterConfig, AdapterHealthResponse, AdapterRuntime, CommandAdapterRequest,
    CommandAdapterResponse,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AdapterConfig::from_env();
    let addr: SocketAddr = config.http_bind.parse()?;
    let runtime = Arc::new(AdapterRuntime::from_config(&config)?);

    if config.sweep_worker_enabled {
        let runtime_for_worker = runtime.clone();
        let interval_ms = config.sweep_worker_interval_ms;
        let max_age_days = config.sweep_max_age_days;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                let runtime = runtime_for_worker.clone();
                let pass = tokio::task::spawn_blocking(move || {
                    runtime.run_sweep_worker_pass(now_unix_ms(), max_age_days)
                })
                .await;
                if let Err(err) = pass {
                    tracing::error!(error = %err, "sweep worker pass failed");
                }
            }
        });
    }

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/commands", post(run_command))
        .route("/v1/commands/manifest", get(command_manifest))
        .with_state(runtime);

    tracing::info!(
        %addr,
        sweep_worker_enabled = config.sweep_worker_enabled,
        interval_ms = config.sweep_worker_interval_ms,
        "cfbind_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn healthz(
    State(runtime): State<Arc<AdapterRuntime>>,
) -> (StatusCode, Json<AdapterHealthResponse>) {
    let report = tokio::task::spawn_blocking(move || runtime.health_report())
        .await
        .unwrap_or_else(|err| Err(format!("health task failed: {err}")));
    match report {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(reason) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AdapterHealthResponse {
                status: "error".to_string(),
                outcome: "UNHEALTHY".to_string(),
                reason: Some(reason),
                ..AdapterHealthResponse::default()
            }),
        ),
    }
}

async fn run_command(
    State(runtime): State<Arc<AdapterRuntime>>,
    Json(request): Json<CommandAdapterRequest>,
) -> (StatusCode, Json<CommandAdapterResponse>) {
    let result = tokio::task::spawn_blocking(move || runtime.run_command(request)).await;
    match result {
        Ok(Ok(response)) if response.status == "ok" => (StatusCode::OK, Json(response)),
        Ok(Ok(response)) => (StatusCode::INTERNAL_SERVER_ERROR, Json(response)),
        Ok(Err(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(CommandAdapterResponse::rejected(reason)),
        ),
        Err(err) => {
            tracing::error!(error = %err, "command task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CommandAdapterResponse::rejected("command task failed")),
            )
        }
    }
}

async fn command_manifest() -> Json<serde_json::Value> {
    Json(cfbind_os::commands::command_manifest())
}
