use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tube_endpoint::{
    api,
    config::{self, DEFAULT_CONFIG_PATH},
    extractor::YtDlp,
    service::VideoService,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP API for fetching and downloading YouTube videos.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path to the KEY=VALUE config file (missing file means defaults)"
    )]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("tube_endpoint=info,backend=info,tower_http=info")
            }),
        )
        .init();

    let cli = Cli::parse();
    let settings = config::load_settings_from(&cli.config)?;

    tokio::fs::create_dir_all(&settings.download_root)
        .await
        .with_context(|| format!("creating {}", settings.download_root.display()))?;

    if settings.usable_cookie_file().is_none() {
        warn!(
            "No usable cookie file at {}; requests go out anonymously",
            settings.cookie_file.display()
        );
    }

    let extractor = YtDlp::new(settings.ytdlp_path.clone());
    info!(
        "Using extractor {} (max {} concurrent, cap {})",
        extractor.program().display(),
        settings.max_concurrent_extractions,
        settings.max_resolution
    );

    let addr = settings.bind_addr;
    let download_root = settings.download_root.clone();
    let service = VideoService::new(Arc::new(settings), Arc::new(extractor));
    let app = api::router(service);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        "API server listening on http://{} (downloads in {})",
        addr,
        download_root.display()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", err);
    }
}
