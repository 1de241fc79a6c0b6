//! sandbox-consoled binary entry point.
//!
//! Serves the console bridge API with a single built-in workload that
//! attaches a host shell. Container-backed workloads plug in through the
//! `Workload` trait from whatever runtime embeds the library.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sandbox_console::{build_router, AppState, LocalProcessWorkload, Workload};

/// Terminal attachment bridge for sandboxed workloads.
#[derive(Parser, Debug)]
#[command(name = "sandbox-consoled")]
#[command(about = "Websocket console bridge")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "CONSOLE_PORT", default_value = "39410")]
    port: u16,

    /// Address to bind
    #[arg(long, env = "CONSOLE_BIND", default_value = "127.0.0.1")]
    bind: String,

    /// Shell attached by the built-in "local" workload
    #[arg(long, env = "CONSOLE_SHELL", default_value = "/bin/bash")]
    shell: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let local: Arc<dyn Workload> =
        Arc::new(LocalProcessWorkload::new("local", args.shell.clone(), vec![]));
    let state = AppState::new([("local".to_string(), local)]);
    let router = build_router(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, shell = %args.shell, "console bridge listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}
