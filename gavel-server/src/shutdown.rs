//! Signal handling for graceful shutdown and config reload.

use crate::config::{ConfigLoader, LoadedConfig};
use gavel_core::config::{ConfigStore, PipelineConfig};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

/// Creates a future that completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C).
pub async fn shutdown_signal() {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("Failed to install signal handlers ({}), waiting for Ctrl+C", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

/// Spawns a task that listens for SIGHUP and reloads the configuration.
///
/// Pipeline settings take effect immediately; the scheduler re-arms its
/// timers on the new version. Listen address, queue, feed and cache backend
/// changes are reported and need a restart.
///
/// Returns a Notify that stops the handler.
pub fn spawn_config_reload_handler(
    config_loader: Arc<ConfigLoader>,
    initial: LoadedConfig,
    pipeline_config: ConfigStore<PipelineConfig>,
) -> Arc<Notify> {
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();

    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                tracing::error!("Failed to install SIGHUP handler, reload disabled: {}", e);
                return;
            }
        };
        let mut current = initial;

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(loaded) => {
                            warn_on_restart_only_changes(&current, &loaded);
                            if loaded.pipeline != current.pipeline {
                                pipeline_config.update(loaded.pipeline.clone()).await;
                                tracing::info!(
                                    version = pipeline_config.version(),
                                    "Pipeline configuration reloaded"
                                );
                            } else {
                                tracing::info!("Pipeline configuration unchanged");
                            }
                            current = loaded;
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload configuration: {}", e);
                        }
                    }
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    shutdown_notify
}

fn warn_on_restart_only_changes(current: &LoadedConfig, loaded: &LoadedConfig) {
    if current.listen != loaded.listen {
        tracing::warn!("Listen address changed; restart to apply");
    }
    if current.queue != loaded.queue {
        tracing::warn!("Queue settings changed; restart to apply");
    }
    if current.feed != loaded.feed {
        tracing::warn!("Change feed settings changed; restart to apply");
    }
    if current.cache_backend != loaded.cache_backend {
        tracing::warn!("Cache backend changed; restart to apply");
    }
}
