//! splitup command-line uploader.

mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use splitup_client::Uploader;
use splitup_transfer::Progress;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Uploads a file to a splitup server in parallel, resumable segments.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// File to upload
    file: PathBuf,

    /// Configuration file (default: ~/.config/splitup/client.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the server address (`host:port`)
    #[arg(short, long)]
    server: Option<String>,

    /// Print raw progress codes instead of percentages
    #[arg(long)]
    codes: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(server) = args.server {
        config.server_addr = server;
    }
    let uploader = Uploader::new(config.client_config());
    let codes = args.codes;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (tx, mut rx) = mpsc::channel(64);
        let printer = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                match progress {
                    _ if codes => println!("{}", progress.code()),
                    Progress::Percent(p) => println!("{p:>3}%"),
                    Progress::Failed(kind) => println!("failed: {kind:?} ({})", kind.code()),
                }
            }
        });

        let result = uploader.upload(&args.file, tx).await;
        printer.await.context("progress printer")?;

        let report = result?;
        println!(
            "uploaded {} ({} bytes, {} round(s))",
            report.uid, report.total_size, report.rounds
        );
        anyhow::Ok(())
    })
}
