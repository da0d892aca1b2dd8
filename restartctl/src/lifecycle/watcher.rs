//! Requests a reloading restart when the configuration file changes on disk.
//!
//! The parent directory is watched rather than the file itself, since editors and config
//! management tools usually replace the file with a rename. Bursts of events are collapsed:
//! a restart is requested once no relevant event has arrived for `watch_debounce`.

use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::orchestrator::{RestartOptions, RestartOrchestrator};
use crate::config_store::ConfigStore;
use crate::errors::Error;

pub const WATCHER_PRINCIPAL: &str = "config-watcher";
const WATCHER_REASON: &str = "configuration file changed";

/// Starts watching `path`. The task runs until `shutdown` is cancelled.
pub fn spawn_config_watcher(
    path: PathBuf,
    debounce: Duration,
    orchestrator: RestartOrchestrator,
    config: Arc<dyn ConfigStore>,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        // Receiver gone means the task is shutting down
        let _ = tx.send(event);
    })?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(config_file = %path.display(), debounce = %humantime::format_duration(debounce), "Watching configuration file for changes");

    Ok(tokio::spawn(async move {
        run_watch_loop(rx, &path, debounce, &orchestrator, config.as_ref(), shutdown).await;
        drop(watcher);
    }))
}

async fn run_watch_loop(
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    path: &Path,
    debounce: Duration,
    orchestrator: &RestartOrchestrator,
    config: &dyn ConfigStore,
    shutdown: CancellationToken,
) {
    let mut pending: Option<tokio::time::Instant> = None;

    loop {
        let deadline = pending;
        let settle = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(Ok(event)) if is_relevant(&event, path) => {
                    debug!(kind = ?event.kind, "Configuration file event");
                    pending = Some(tokio::time::Instant::now() + debounce);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => warn!("Configuration watcher error: {}", e),
                None => break,
            },
            _ = settle => {
                pending = None;
                request_reload(orchestrator, config);
            }
        }
    }

    debug!("Configuration watcher stopped");
}

fn request_reload(orchestrator: &RestartOrchestrator, config: &dyn ConfigStore) {
    let options = RestartOptions::builder()
        .reason(WATCHER_REASON)
        .reload_config(true)
        .drain_timeout(config.current().restart.default_drain_timeout)
        .build();

    match orchestrator.request_restart(WATCHER_PRINCIPAL, options) {
        Ok(ticket) => info!(attempt_id = %ticket.attempt_id, "Configuration change triggered a restart"),
        Err(Error::RestartAlreadyInProgress { state }) => {
            info!(%state, "Configuration changed during a restart, not requesting another")
        }
        Err(e) => warn!("Configuration change could not trigger a restart: {}", e),
    }
}

/// Whether `event` touches the watched file.
fn is_relevant(event: &Event, path: &Path) -> bool {
    let touches_content = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_));
    touches_content && event.paths.iter().any(|changed| changed.file_name() == path.file_name())
}
