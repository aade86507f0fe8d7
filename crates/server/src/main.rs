mod api;
mod art;
mod auth;
mod config;
mod scan;
mod state;
mod status;
mod stream;
mod transcode;
mod utils;
mod waveform;

#[cfg(test)]
mod testing;

use std::time::{Duration, Instant};

use api::api_router;
use art::ArtResolver;
use auth::AuthStore;
use clap::Parser;
use config::{bind_address, config_path, load_or_create_config, resolve_media_root, resolve_path, Cli};
use library::{Library, ScanOptions};
use scan::Maintenance;
use state::AppState;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use transcode::Transcoder;
use waveform::WaveformCache;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path(&cli);
    let (mut config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("config: created defaults at {:?}", config_path);
    } else {
        info!("config: loaded {:?}", config_path);
    }
    cli.apply(&mut config);

    let media_root = resolve_media_root(&config_path, &config.media)?;
    let db_path = resolve_path(&config_path, &config.db);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let library = Library::open(media_root, &db_path)?;
    info!("library: media {:?}, catalog {:?}", library.root(), db_path);

    let auth = AuthStore::new(library.catalog().clone());
    if !config.no_root {
        match auth.ensure_root_user() {
            Ok(Some(password)) => warn!("auth: created user root with password {}", password),
            Ok(None) => {}
            Err(err) => warn!("auth: could not create root user: {}", err),
        }
    }

    let transcoder = Transcoder::detect(config.ffmpeg_path.as_deref()).await;
    let art = ArtResolver::new(library.catalog().clone(), config.art_cache_bytes);
    let shutdown = CancellationToken::new();
    let maintenance = Maintenance::new(library.clone(), shutdown.clone());
    let started = Instant::now();

    if config.scan_on_start {
        maintenance.start_scan(ScanOptions::default());
    }
    maintenance.spawn_periodic(
        Duration::from_secs(config.orphan_interval_secs),
        Duration::from_secs(config.status_interval_secs),
        started,
    );

    let bind_addr = bind_address(&config.host);
    let grace = config.shutdown_grace();
    let state = AppState {
        library,
        auth,
        art,
        transcoder,
        waveforms: WaveformCache::default(),
        maintenance: maintenance.clone(),
        started,
    };
    let app = api_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("http: listening on {}", bind_addr);

    let token = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    });

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    tokio::select! {
        _ = shutdown.cancelled() => {}
        result = &mut server => {
            // The listener died on its own; stop background work too.
            shutdown.cancel();
            maintenance.wait().await;
            return Ok(result??);
        }
    }

    info!("shutdown: waiting up to {:?} for open work", grace);
    if maintenance.is_running() {
        info!("shutdown: cancelling library pass");
    }
    let drain = async {
        let served = (&mut server).await;
        maintenance.wait().await;
        served
    };
    let drained = tokio::time::timeout(grace, drain).await;
    match drained {
        Ok(Ok(Ok(()))) => info!("shutdown: complete"),
        Ok(Ok(Err(err))) => warn!("shutdown: server error: {}", err),
        Ok(Err(err)) => warn!("shutdown: server task failed: {}", err),
        Err(_) => {
            warn!("shutdown: grace period elapsed, aborting open connections");
            server.abort();
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("shutdown: no terminate handler: {}", err);
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!("shutdown: no ctrl-c handler: {}", err);
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("shutdown: no ctrl-c handler: {}", err);
        }
    }

    info!("shutdown: signal received");
}
