use std::sync::Arc;

use aichat_relay::{build_router, telemetry, AppState, RelayArgs};
use anyhow::Context;
use clap::Parser;
use providers::{OpenAiClient, OpenAiConfig};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = RelayArgs::parse();
    telemetry::init_tracing(telemetry::DEFAULT_FILTER, args.log_json);

    let cfg = OpenAiConfig::from_env_and_file().context("load provider config")?;
    if cfg.api_key.is_none() {
        warn!("OPENROUTER_API_KEY is not set; chat requests will fail until it is");
    }
    let default_model = args.default_model.clone().unwrap_or_else(|| cfg.model.clone());
    info!(base_url = %cfg.base_url, model = %default_model, "upstream configured");
    let client = OpenAiClient::new(cfg).context("build upstream client")?;

    let state = AppState::new(Arc::new(client), &args.system_prompt, &default_model);
    let app = build_router(state);

    let listener = TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("bind {}", args.addr))?;
    info!(addr = %args.addr, "starting aichat-relay");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("ctrl-c handler failed: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler failed: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
