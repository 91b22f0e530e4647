//! rtc-fanout - Main entry point
//!
//! Serves one live H.264 stream to any number of WebRTC viewers.

mod args;
mod http;
mod source;

use args::Args;
use clap::Parser;
use log::{error, info, warn};
use rtc_fanout::{Config, KeyFrameCoordinator, StreamHub, VideoCodec, WebRtcEngine};
use source::FileSource;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config_result = args.load_config();
    let mut config = match &config_result {
        Ok(cfg) => cfg.clone(),
        Err(_) => Config::default(),
    };

    // Initialize logging with noise filtering for third-party WebRTC crates
    let log_level = if args.verbose { "debug" } else { config.logging.level.as_str() };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("RTC_FANOUT_LOG").unwrap_or_else(|_| log_level.to_string()))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .init();

    info!("rtc-fanout v{}", env!("CARGO_PKG_VERSION"));
    match config_result {
        Ok(_) => info!("Loaded configuration from {:?}", args.config),
        Err(e) => warn!("Failed to load config: {}, using defaults", e),
    }

    // Apply command line overrides
    if let Some(ref host) = args.host {
        config.http.host = host.clone();
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }
    config.validate()?;

    info!(
        "Video codec: {}, queue capacity: {}",
        config.webrtc.video_codec,
        if config.queue.is_bounded() {
            format!("{} ({:?} on overflow)", config.queue.capacity, config.queue.overflow)
        } else {
            "unbounded".to_string()
        }
    );

    let keyframes = Arc::new(KeyFrameCoordinator::new());
    let engine = Arc::new(WebRtcEngine::new(&config.webrtc, keyframes.clone())?);
    let hub = Arc::new(StreamHub::new(engine, keyframes, &config));

    // Packet source
    let mut source_handle = match &args.input {
        Some(path) => {
            if config.webrtc.video_codec != VideoCodec::H264 {
                warn!(
                    "File source produces H.264 but viewers negotiate {}",
                    config.webrtc.video_codec
                );
            }
            let source = FileSource::open(path)?;
            Some(task::spawn(source::run_file_source(source, hub.clone(), args.fps)))
        }
        None => {
            info!("No input file given, serving signaling only");
            None
        }
    };

    // HTTP signaling server
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let http_shutdown = async move {
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
    };
    let http_hub = hub.clone();
    let http_config = config.http.clone();
    let mut http_handle = task::spawn(async move {
        if let Err(e) = http::run_http_server(
            &http_config.host,
            http_config.port,
            http_config.max_body_bytes,
            http_hub,
            http_shutdown,
        )
        .await
        {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    let shutdown = async {
        let _ = signal::ctrl_c().await;
        info!("Shutdown signal received");
    };

    match source_handle.as_mut() {
        Some(handle) => {
            tokio::select! {
                _ = shutdown => {
                    info!("Initiating graceful shutdown...");
                }
                result = &mut http_handle => {
                    log_task_result("HTTP server", result);
                }
                result = handle => {
                    log_task_result("File source", result);
                }
            }
        }
        None => {
            tokio::select! {
                _ = shutdown => {
                    info!("Initiating graceful shutdown...");
                }
                result = &mut http_handle => {
                    log_task_result("HTTP server", result);
                }
            }
        }
    }

    info!("Stopping all tasks...");

    if let Some(handle) = source_handle {
        handle.abort();
    }

    // Stop accepting offers before closing viewers
    let _ = shutdown_tx.send(true);
    if !http_handle.is_finished() {
        let _ = http_handle.await;
    }

    hub.shutdown_all().await;

    info!("rtc-fanout stopped");
    Ok(())
}

fn log_task_result(name: &str, result: Result<(), task::JoinError>) {
    match result {
        Ok(()) => warn!("{} exited", name),
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!("{} panicked: {}", name, e),
    }
}
