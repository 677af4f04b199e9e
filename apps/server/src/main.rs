//! splitup upload server entry point.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use splitup_server::{StaticAuthenticator, UploadServer};
use tracing_subscriber::EnvFilter;

/// Receives segmented, resumable uploads.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file (default: ~/.config/splitup/server.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(long)]
    bind: Option<String>,

    /// Override the storage directory
    #[arg(long)]
    storage: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting splitup server");

    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(storage) = args.storage {
        config.storage_dir = storage;
    }
    let server_config = config.server_config()?;
    tracing::info!(
        bind = %server_config.bind_addr,
        storage = %server_config.storage_dir.display(),
        segment_size = server_config.segment_size,
        "configuration loaded"
    );

    let auth = Arc::new(StaticAuthenticator::new(config.user, config.secret));
    let server = UploadServer::new(server_config, auth);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let runner = Arc::clone(&server);
        let mut serve = tokio::spawn(async move { runner.run().await });

        tokio::select! {
            result = &mut serve => return result?.map_err(anyhow::Error::from),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
            }
        }
        server.shutdown();
        serve.await??;
        anyhow::Ok(())
    })?;

    tracing::info!("server shut down cleanly");
    Ok(())
}
