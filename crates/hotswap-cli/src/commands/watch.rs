//! `hotswap watch` command implementation

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use hotswap_kernel::{ReloadEvent, ReloaderConfig, ServicesFile, load_config};
use hotswap_runtime::{HotReloader, ServiceRegistry};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::loader_for;

/// Execute the `hotswap watch` command
pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    let services: ServicesFile = load_config(config_path)?;
    if services.services.is_empty() {
        anyhow::bail!("no services defined in {}", config_path.display());
    }

    let registry = ServiceRegistry::new();
    for config in services.services {
        let name = config.service_name.clone();
        let (reloader, _logger) = launch(config).await?;
        registry.register(&name, reloader);
    }

    for (name, status) in registry.status_all() {
        println!(
            "{} {} v{} ({} file(s) watched)",
            "watching".green(),
            name.bold(),
            status.current_version,
            status.watched_file_count
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, stopping {} service(s)", registry.len());
    registry.stop_all().await;
    Ok(())
}

/// Build, initialize and start one service, logging its events from the first load on.
async fn launch(config: ReloaderConfig) -> anyhow::Result<(Arc<HotReloader>, JoinHandle<usize>)> {
    let loader = loader_for(&config.module_path);
    let reloader = HotReloader::new(config, loader)?;

    let logger = tokio::spawn(log_events(reloader.subscribe()));
    reloader.initialize().await?;
    reloader.start().await?;
    Ok((reloader, logger))
}

/// Log reload events until the coordinator is dropped; returns how many were seen.
async fn log_events(mut events: broadcast::Receiver<ReloadEvent>) -> usize {
    let mut seen = 0;
    loop {
        match events.recv().await {
            Ok(ReloadEvent::ReloadCompleted {
                service,
                version,
                duration,
            }) => info!("{} now at v{} (took {:?})", service, version, duration),
            Ok(ReloadEvent::ReloadFailed { service, error }) => {
                error!("{} reload failed: {}", service, error)
            }
            Ok(ReloadEvent::RollbackCompleted {
                service, success, ..
            }) if !success => warn!("{} rollback did not rebuild a backup", service),
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} reload event(s)", missed);
                continue;
            }
            Err(RecvError::Closed) => return seen,
        }
        seen += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_logs_events_from_initial_load() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("greeter.rhai");
        std::fs::write(&module, "fn Greeter() { #{} }\nfn hello() { \"hi\" }").unwrap();

        let config = ReloaderConfig::new("greeter", &module, "Greeter");
        let (reloader, logger) = launch(config).await.unwrap();
        assert_eq!(reloader.status().current_version, 1);

        reloader.stop().await;
        drop(reloader);
        // ReloadStarted and ReloadCompleted from initialize.
        assert!(logger.await.unwrap() >= 2);
    }

    #[tokio::test]
    async fn test_launch_rejects_library_without_watched_extension() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReloaderConfig::new("calc", dir.path().join("libcalc.so"), "Calculator")
            .with_extensions(&["rhai"]);
        assert!(launch(config).await.is_err());
    }
}
