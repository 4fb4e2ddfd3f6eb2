//! # Deskpilot
//!
//! Entry point of the desktop agent service.

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use deskpilot_core::{
    BoundedRegistry, CoreConfig, Desktop, DesktopContextSource, Orchestrator, PatternSendDetector,
};
use deskpilot_desktop::{
    create_input_simulator, create_screen_capture, CommandClipboard, CommandWindowManager,
};
use deskpilot_router::FailoverRouter;
use deskpilot_server::{build_router, AppState};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CoreConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let config = cli.apply(config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter(&config)));
    fmt().with_env_filter(filter).with_target(false).init();

    config.validate().context("Invalid configuration")?;
    let api_key = match config.server.api_key.clone().filter(|k| !k.is_empty()) {
        Some(key) => key,
        None => bail!("server.api_key is required (set DESKPILOT_API_KEY or --api-key)"),
    };
    if let Some(path) = config.loaded_from() {
        info!("Configuration loaded from {}", path.display());
    }

    let input = create_input_simulator().context("Input injection is unavailable")?;
    let desktop = Desktop {
        capture: Arc::from(create_screen_capture()),
        input: Arc::from(input),
        clipboard: Arc::new(CommandClipboard::new()),
        windows: Arc::new(CommandWindowManager::new()),
    };

    let router = FailoverRouter::from_config(&config).context("No decision backend available")?;
    info!("Decision backends: {}", router.backend_names().join(", "));

    let config = Arc::new(config);
    let context = Arc::new(DesktopContextSource::new(
        desktop.clone(),
        config.capture.clone(),
    ));
    let orchestrator = Orchestrator::new(
        config.clone(),
        desktop,
        context,
        Arc::new(router),
        Arc::new(PatternSendDetector::default()),
        Arc::new(BoundedRegistry::new(config.agent.max_tasks)),
    );

    let app = build_router(AppState::new(orchestrator, api_key));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Deskpilot listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Deskpilot stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
