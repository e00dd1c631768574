//! Reference prover server CLI

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use prover_server::{create_router, AppState};
use resolver_core::MemoryState;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "linked-prover")]
#[command(about = "Evaluate gateway requests against a storage snapshot")]
struct Args {
    /// Storage snapshot (JSON array of {target, slot, value})
    #[arg(long)]
    snapshot: PathBuf,

    /// Block the snapshot was taken at
    #[arg(long, default_value = "latest")]
    block: String,

    #[arg(long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let state = MemoryState::load(&args.snapshot)?;
    let app = create_router(Arc::new(AppState::new(state, args.block)));

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Starting prover on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
