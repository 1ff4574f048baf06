//! Shared status updater.
//!
//! One [`SharedStatusUpdater`] serves every watch task of a wait on one
//! model. A background loop checks the model connection, reconnects it when
//! it is dead and bumps a tick counter on every live pass. Consumers pull
//! snapshots through a [`StatusTicker`]: each tick releases all blocked
//! consumers together, the first to take the fetch lock fetches, and the rest
//! reuse the snapshot it published.
//!
//! Invariants:
//! - at most one status fetch is in flight per updater
//! - a snapshot is published only after a successful fetch
//! - each ticker sees strictly increasing snapshot generations

use crate::connection::{ConnectionManager, ModelHandle};
use crate::status::StatusSnapshot;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use sunbeam_common::JujuError;
use sunbeam_common::config::WaitSettings;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Cadence of the background loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Delay between notifications while the model is connected.
    pub poll_interval: Duration,
    /// Delay between reconnect attempts while it is not.
    pub reconnect_interval: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self::from_settings(&WaitSettings::default())
    }
}

impl UpdaterConfig {
    pub fn from_settings(settings: &WaitSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval,
            reconnect_interval: settings.effective_reconnect_interval(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Published {
    generation: u64,
    /// Tick the snapshot was fetched for.
    tick: u64,
    snapshot: Option<Arc<StatusSnapshot>>,
}

struct Shared {
    manager: Arc<ConnectionManager>,
    model: String,
    /// Doubles as the fetch lock; reconnects take it too.
    handle: Mutex<Option<ModelHandle>>,
    ticks: watch::Sender<u64>,
    published: watch::Sender<Published>,
    fetches: AtomicU64,
    cancel: CancellationToken,
}

/// Per-model status source shared by concurrent waiters.
#[derive(Clone)]
pub struct SharedStatusUpdater {
    shared: Arc<Shared>,
}

impl SharedStatusUpdater {
    /// Open `model` and start the background reconnection loop.
    pub async fn start(
        manager: Arc<ConnectionManager>,
        model: &str,
        config: UpdaterConfig,
    ) -> Result<UpdaterGuard, JujuError> {
        let handle = manager.open_model(model).await?;
        let (ticks, _) = watch::channel(0);
        let (published, _) = watch::channel(Published::default());
        let updater = SharedStatusUpdater {
            shared: Arc::new(Shared {
                manager,
                model: model.to_string(),
                handle: Mutex::new(Some(handle)),
                ticks,
                published,
                fetches: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        };
        let task = tokio::spawn(
            reconnect_loop(updater.clone(), config).instrument(info_span!("status_updater", model)),
        );
        info!(
            "Started status updater for model {} (poll every {:?})",
            model, config.poll_interval
        );
        Ok(UpdaterGuard {
            updater,
            task: Some(task),
        })
    }

    pub fn model(&self) -> &str {
        &self.shared.model
    }

    /// A new lazy snapshot sequence. Its first element is the latest
    /// published snapshot, or a fresh fetch if there is none.
    pub fn tick_status(&self) -> StatusTicker {
        let mut ticks = self.shared.ticks.subscribe();
        ticks.mark_changed();
        StatusTicker {
            shared: Arc::clone(&self.shared),
            ticks,
            last_generation: 0,
            caller: None,
        }
    }

    /// Number of status fetches issued so far.
    pub fn fetch_count(&self) -> u64 {
        self.shared.fetches.load(Ordering::SeqCst)
    }

    /// Number of notifications broadcast so far.
    pub fn notifications(&self) -> u64 {
        *self.shared.ticks.borrow()
    }

    pub fn latest(&self) -> Option<Arc<StatusSnapshot>> {
        self.shared.published.borrow().snapshot.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.shared.cancel.is_cancelled()
    }

    /// Wake every blocked consumer.
    pub fn notify_all(&self) {
        self.shared.ticks.send_modify(|tick| *tick += 1);
    }

    /// Reconnect the model if needed, then notify consumers.
    ///
    /// Returns `Ok(false)` without notifying when the model is still down.
    /// A controller that cannot be reached is surfaced as an error.
    pub async fn reconnect_and_notify(&self) -> Result<bool, JujuError> {
        let shared = &self.shared;
        let mut slot = shared.handle.lock().await;
        let Some(handle) = slot.as_mut() else {
            return Ok(false);
        };
        if !shared.manager.is_connected(handle) {
            if !shared.manager.controller_liveness().is_alive() {
                shared.manager.reconnect_controller().await?;
            }
            if let Err(err) = shared.manager.reopen_model(handle).await {
                warn!("Failed to reconnect to model {}: {}", shared.model, err);
                if err.is_transport() {
                    shared.manager.reconnect_controller().await?;
                }
                return Ok(false);
            }
        }
        drop(slot);
        self.notify_all();
        Ok(true)
    }
}

async fn reconnect_loop(updater: SharedStatusUpdater, config: UpdaterConfig) {
    let cancel = updater.shared.cancel.clone();
    let mut delay = config.poll_interval;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = updater.reconnect_and_notify() => outcome,
        };
        delay = match outcome {
            Ok(true) => config.poll_interval,
            Ok(false) => config.reconnect_interval,
            Err(err) => {
                warn!("Status updater for model {} will retry: {}", updater.model(), err);
                config.reconnect_interval
            }
        };
    }
    debug!("Status updater loop for model {} stopped", updater.model());
}

/// Owns the background loop of a [`SharedStatusUpdater`].
///
/// Dropping the guard stops the loop; [`UpdaterGuard::shutdown`] also waits
/// for it and releases the model connection.
pub struct UpdaterGuard {
    updater: SharedStatusUpdater,
    task: Option<JoinHandle<()>>,
}

impl UpdaterGuard {
    pub fn updater(&self) -> &SharedStatusUpdater {
        &self.updater
    }

    pub fn tick_status(&self) -> StatusTicker {
        self.updater.tick_status()
    }

    pub async fn shutdown(mut self) {
        self.updater.shared.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!("Status updater loop for {} ended abnormally: {}", self.updater.model(), err);
        }
        let handle = self.updater.shared.handle.lock().await.take();
        if let Some(handle) = handle {
            handle.release().await;
        }
        info!("Stopped status updater for model {}", self.updater.model());
    }
}

impl Drop for UpdaterGuard {
    fn drop(&mut self) {
        self.updater.shared.cancel.cancel();
    }
}

// ── Consumer side ──────────────────────────────────────────────────────────

/// Lazy, restartable sequence of snapshots from one updater.
pub struct StatusTicker {
    shared: Arc<Shared>,
    ticks: watch::Receiver<u64>,
    last_generation: u64,
    caller: Option<CancellationToken>,
}

impl StatusTicker {
    /// End the sequence when `token` is cancelled.
    #[must_use]
    pub fn cancelled_by(mut self, token: CancellationToken) -> Self {
        self.caller = Some(token);
        self
    }

    /// Generation of the last snapshot delivered, 0 before the first.
    pub fn generation(&self) -> u64 {
        self.last_generation
    }

    /// Next snapshot, `Ok(None)` once cancelled or torn down.
    ///
    /// Transport failures are retried after the next reconnect notification;
    /// other fetch failures are returned.
    pub async fn next(&mut self) -> Result<Option<Arc<StatusSnapshot>>, JujuError> {
        let updater_stop = self.shared.cancel.clone();
        let caller_stop = self.caller.clone();
        let halt = || stopped(&updater_stop, caller_stop.as_ref());

        loop {
            tokio::select! {
                biased;
                _ = halt() => return Ok(None),
                changed = self.ticks.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
            }
            let tick = *self.ticks.borrow_and_update();

            let slot = tokio::select! {
                biased;
                _ = halt() => return Ok(None),
                slot = self.shared.handle.lock() => slot,
            };

            let published = self.shared.published.borrow().clone();
            if published.generation > 0 && published.tick >= tick {
                if published.generation > self.last_generation {
                    self.last_generation = published.generation;
                    return Ok(published.snapshot);
                }
                continue;
            }

            let Some(handle) = slot.as_ref() else {
                return Ok(None);
            };
            if !handle.liveness().is_alive() {
                debug!(
                    "Model {} is not connected; waiting for reconnect",
                    self.shared.model
                );
                continue;
            }
            let connection = Arc::clone(handle.connection()?);

            let fetch = self.shared.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            debug!("Fetching status of model {} (fetch {})", self.shared.model, fetch);
            let fetched = tokio::select! {
                biased;
                _ = halt() => return Ok(None),
                fetched = connection.get_status(&[]) => fetched,
            };

            match fetched {
                Ok(snapshot) => {
                    let snapshot = Arc::new(snapshot);
                    let generation = self.shared.published.borrow().generation + 1;
                    self.shared.published.send_replace(Published {
                        generation,
                        tick,
                        snapshot: Some(Arc::clone(&snapshot)),
                    });
                    self.last_generation = generation;
                    return Ok(Some(snapshot));
                }
                Err(err) if err.is_transport() => {
                    warn!(
                        "Connection to model {} closed while fetching status: {}",
                        self.shared.model, err
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}

async fn stopped(updater: &CancellationToken, caller: Option<&CancellationToken>) {
    match caller {
        Some(caller) => {
            tokio::select! {
                _ = updater.cancelled() => {}
                _ = caller.cancelled() => {}
            }
        }
        None => updater.cancelled().await,
    }
}
