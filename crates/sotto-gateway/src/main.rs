use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use sotto_gateway::{app, maintenance};

#[derive(Parser)]
#[command(name = "sotto-gateway", about = "Whisper coordinator server")]
struct Cli {
    /// Path to sotto.toml (default: $SOTTO_CONFIG or ~/.sotto/sotto.toml).
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP coordinator (the default).
    Serve,
    /// Run one maintenance job and exit.
    Maintenance {
        #[command(subcommand)]
        job: maintenance::MaintenanceJob,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sotto=info,sotto_gateway=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = sotto_core::config::SottoConfig::load(cli.config.as_deref())?;

    match cli.command {
        Some(Command::Maintenance { job }) => maintenance::run(&config, job),
        Some(Command::Serve) | None => serve(config).await,
    }
}

async fn serve(config: sotto_core::config::SottoConfig) -> anyhow::Result<()> {
    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(
        app::AppState::new(config).map_err(|e| anyhow::anyhow!("startup failed: {e}"))?,
    );

    // advertise for transcript pickup and start draining the handoff queue
    tokio::spawn(Arc::clone(&state.engine).resume_loop());

    let router = app::build_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, server = %state.engine.server_id(), "sotto gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // hand live transcripts to a peer before the process goes away
    info!("shutting down; suspending transcriptions");
    state.engine.suspend_transcriptions().await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
