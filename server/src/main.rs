use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use server::{build_app, AppState};
use sitesearch_core::{SearchConfig, SledStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Index database directory
    #[arg(long, default_value = "./index")]
    db: String,
    /// Optional JSON file with search defaults
    #[arg(long)]
    config: Option<String>,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SearchConfig::load(path).with_context(|| format!("loading {path}"))?,
        None => SearchConfig::default(),
    };
    let store = Arc::new(SledStore::open(&args.db).with_context(|| format!("opening index at {}", args.db))?);
    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    let app: Router = build_app(AppState::new(store, config, admin_token));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, db = %args.db, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
