//! Filesystem watcher driving gated proxy reloads.
//!
//! Events from the template directory, the main config file and the
//! certificate store are coalesced: after the first event, further events
//! are absorbed until the stream has been quiet for the debounce window.
//! Each burst yields one reload cycle, which is skipped while a
//! provisioning run holds the renewal lock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time;
use tracing::Instrument;

use crate::certs::lock::{LockState, RenewalLock};
use crate::config::schema::AppConfig;
use crate::lifecycle::shutdown::ShutdownListener;
use crate::observability::metrics;
use crate::proxy::controller::ProxyController;
use crate::proxy::process::ProxyError;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("none of the watched paths exist: {0:?}")]
    NoPaths(Vec<PathBuf>),

    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
}

/// Result of one reload cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Reloaded,
    SkippedLocked,
    ValidationFailed,
    Failed,
}

/// Watches configuration and certificate paths and reloads the proxy.
pub struct ConfigWatcher {
    paths: Vec<PathBuf>,
    debounce: Duration,
    lock: RenewalLock,
    proxy: Arc<ProxyController>,
    outcomes: Option<mpsc::UnboundedSender<CycleOutcome>>,
}

impl ConfigWatcher {
    pub fn new(config: &AppConfig, proxy: Arc<ProxyController>) -> Self {
        Self {
            paths: config.watched_paths(),
            debounce: config.watch.debounce,
            lock: RenewalLock::new(&config.paths.lock_file, config.renewal.lock_stale_after),
            proxy,
            outcomes: None,
        }
    }

    /// Report every cycle outcome on `tx`.
    pub fn with_outcome_sink(mut self, tx: mpsc::UnboundedSender<CycleOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    /// Start a recursive notify watcher forwarding events into a channel.
    ///
    /// Paths that do not exist are skipped with a warning.
    pub fn watch(&self) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<Event>), WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default(),
        )?;

        let mut watched = 0;
        for path in &self.paths {
            if !path.exists() {
                tracing::warn!(path = ?path, "Watched path does not exist, skipping");
                continue;
            }
            watcher.watch(path, RecursiveMode::Recursive)?;
            watched += 1;
        }
        if watched == 0 {
            return Err(WatchError::NoPaths(self.paths.clone()));
        }

        tracing::info!(paths = ?self.paths, debounce = ?self.debounce, "Config watcher started");
        Ok((watcher, rx))
    }

    /// Watch the configured paths until shutdown.
    pub async fn run(self, shutdown: ShutdownListener) -> Result<(), WatchError> {
        let span = tracing::info_span!("watcher");
        let (_watcher, rx) = span.in_scope(|| self.watch())?;
        self.run_events(rx, shutdown).instrument(span).await;
        Ok(())
    }

    /// Consume filesystem events until shutdown or the event stream closes.
    ///
    /// A cycle already in progress when shutdown is requested runs to completion;
    /// no new cycle starts afterwards.
    pub async fn run_events(&self, mut rx: mpsc::UnboundedReceiver<Event>, mut shutdown: ShutdownListener) {
        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if !is_relevant(&first) {
                continue;
            }

            let coalesced = self.drain_burst(&mut rx).await;
            tracing::debug!(events = coalesced + 1, paths = ?first.paths, "Change detected");

            if shutdown.is_triggered() {
                break;
            }
            self.reload_cycle().await;
        }
        tracing::info!("Config watcher stopped");
    }

    /// Absorb events until none arrive for the debounce window.
    async fn drain_burst(&self, rx: &mut mpsc::UnboundedReceiver<Event>) -> usize {
        let mut count = 0;
        loop {
            match time::timeout(self.debounce, rx.recv()).await {
                Ok(Some(event)) => {
                    if is_relevant(&event) {
                        count += 1;
                    }
                }
                Ok(None) | Err(_) => return count,
            }
        }
    }

    /// One gated reload attempt. Never fails: errors are logged.
    pub async fn reload_cycle(&self) -> CycleOutcome {
        let outcome = self.try_reload().await;
        if let Some(tx) = &self.outcomes {
            let _ = tx.send(outcome);
        }
        outcome
    }

    async fn try_reload(&self) -> CycleOutcome {
        match self.lock.state() {
            LockState::Held { pid } => {
                tracing::info!(pid, "Renewal in progress, skipping reload");
                metrics::record_watcher_skip("locked");
                return CycleOutcome::SkippedLocked;
            }
            LockState::Stale { reason } => {
                tracing::warn!(reason = %reason, "Ignoring stale renewal lock");
            }
            LockState::Free => {}
        }

        match self.proxy.apply_and_reload().await {
            Ok(()) => {
                metrics::record_reload("watcher", "success");
                CycleOutcome::Reloaded
            }
            Err(ProxyError::Validation(output)) => {
                tracing::warn!(output = %output, "Proxy configuration invalid, keeping current configuration");
                metrics::record_reload("watcher", "invalid");
                CycleOutcome::ValidationFailed
            }
            Err(e) => {
                tracing::error!(error = %e, "Reload failed");
                metrics::record_reload("watcher", "failure");
                CycleOutcome::Failed
            }
        }
    }
}

/// Modify, create and remove events count; access-only events do not.
fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) | EventKind::Any
    )
}
