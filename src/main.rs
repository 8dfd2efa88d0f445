#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use media_dl_rs::{config::Settings, schedule::YtDlpAdapter, utils::logger, AppContext};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env();
    let _guard = logger::init(settings.log_dir.clone())?;
    for warning in &settings.warnings {
        warn!("{}", warning);
    }

    info!("Starting media download service...");
    info!(
        auth_enabled = settings.api_key_auth_enabled,
        header = %settings.api_key_header,
        master_key_set = settings.api_master_key.is_some(),
        "Auth config loaded"
    );
    if settings.api_key_auth_enabled && settings.api_master_key.is_none() {
        warn!("API key auth is enabled but API_MASTER_KEY is not set, every request will fail");
    }

    info!(binary = %settings.ytdlp_binary.display(), "Initializing yt-dlp adapter...");
    let adapter = Arc::new(YtDlpAdapter::new(settings.ytdlp_binary.clone()));

    let ctx = Arc::new(AppContext::bootstrap(&settings, adapter).await?);

    let addr: SocketAddr = settings.bind_addr().parse()?;
    info!("Starting HTTP server at http://{}", addr);

    match media_dl_rs::web::start_server(ctx.clone(), addr).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            return Err(e);
        }
    }

    info!("Shutting down...");
    ctx.dispatcher.shutdown().await;

    Ok(())
}
