// src/main.rs
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod abi;
mod api;
mod builder;
mod chain;
mod config;
mod context;
mod dispatcher;
mod error;
mod resolver;
mod rpc;
mod signer;
mod sponsor;
mod types;

use crate::config::{Args, RelayConfig};
use crate::context::RelayContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = RelayConfig::try_from(Args::parse())?;
    let listen_addr = config.listen_addr;
    info!(
        "Entry point {:?}, account factory {:?}, submit mode {:?}",
        config.entry_point, config.account_factory, config.submit_mode
    );

    let ctx = Arc::new(RelayContext::connect(config).await?);
    let app = api::router(ctx);

    let listener = TcpListener::bind(listen_addr).await?;
    info!("Starting ERC-4337 relay API on {}", listener.local_addr()?);

    // Serve until Ctrl+C is pressed
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    info!("Server stopped");

    Ok(())
}
