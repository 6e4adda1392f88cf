use std::path::PathBuf;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use hearth_gateway::bootstrap::{build_state, BootstrapOptions};
use hearth_gateway::session::ws::chat_ws;
use hearth_gateway::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "hearth", about = "Self-hosted personal assistant gateway")]
struct Args {
    /// Directory for the database, encryption key, and file sandbox.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Directory of skill manifests.
    #[arg(long, default_value = "./skills")]
    skills_dir: PathBuf,

    /// Override the configured listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let state = build_state(BootstrapOptions {
        data_dir: args.data_dir,
        skills_dir: args.skills_dir,
    })
    .await?;

    let host = args
        .host
        .unwrap_or_else(|| state.config.get_or_default("host"));
    let port = args.port.unwrap_or_else(|| {
        state
            .config
            .get_int("port")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(8080)
    });

    let app = Router::new()
        .route("/ws", get(chat_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "hearth gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.store.health_check() {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "store unavailable"),
    }
}
