//! Convergence waiter.
//!
//! Runs one watch task per application against a shared status updater and
//! folds their outcomes into a single [`WaitReport`]. The wait ends when
//! every task has terminated, at the first hard failure, or when the overall
//! timeout expires; remaining tasks are then cancelled and joined.

use crate::connection::ConnectionManager;
use crate::desired::{DesiredStatus, Verdict, evaluate};
use crate::events::{
    APPLICATION_FAILED, APPLICATION_READY, EventBus, WAIT_COMPLETED, WAIT_STARTED, WAIT_TIMED_OUT,
};
use crate::status::StatusSnapshot;
use crate::updater::{SharedStatusUpdater, StatusTicker, UpdaterConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use sunbeam_common::JujuError;
use sunbeam_common::config::WaitSettings;
use sunbeam_common::types::{UnitName, unit_belongs_to};
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

// ── Wait specification ─────────────────────────────────────────────────────

/// What to wait for.
#[derive(Debug, Clone, Default)]
pub struct WaitSpec {
    pub applications: Vec<String>,
    /// Units to restrict the check to, attributed to applications by prefix.
    pub units: Option<Vec<String>>,
    pub desired: DesiredStatus,
    /// Overall budget; the waiter default when unset.
    pub timeout: Option<Duration>,
    /// Receives each application name once it is ready.
    pub queue: Option<mpsc::Sender<String>>,
    pub events: Option<EventBus>,
}

impl WaitSpec {
    /// Wait for `applications` to become active. Duplicates are dropped.
    pub fn new<I, S>(applications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for app in applications.into_iter().map(Into::into) {
            if !unique.contains(&app) {
                unique.push(app);
            }
        }
        Self {
            applications: unique,
            ..Self::default()
        }
    }

    /// Restrict the check to `units`. Duplicates are dropped.
    #[must_use]
    pub fn units<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for unit in units.into_iter().map(Into::into) {
            if !unique.contains(&unit) {
                unique.push(unit);
            }
        }
        self.units = Some(unique);
        self
    }

    /// Accepted workload statuses.
    #[must_use]
    pub fn status<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.desired.workload = statuses.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn agent_status<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.desired = self.desired.with_agent(statuses);
        self
    }

    #[must_use]
    pub fn messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.desired = self.desired.with_messages(messages);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn queue(mut self, queue: mpsc::Sender<String>) -> Self {
        self.queue = Some(queue);
        self
    }

    #[must_use]
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Units of `application` named in the spec; `None` means all units.
    pub fn units_for(&self, application: &str) -> Option<Vec<String>> {
        let units = self.units.as_ref()?;
        let owned: Vec<String> = units
            .iter()
            .filter(|unit| unit_belongs_to(unit, application))
            .cloned()
            .collect();
        (!owned.is_empty()).then_some(owned)
    }

    /// Check arguments before anything is spawned or opened.
    pub fn validate(&self) -> Result<(), JujuError> {
        if let Some(queue) = &self.queue {
            let capacity = queue.capacity();
            if capacity < self.applications.len() {
                return Err(JujuError::InvalidArgument(format!(
                    "queue has room for {capacity} entries but {} applications are waited on",
                    self.applications.len()
                )));
            }
        }
        if let Some(units) = &self.units {
            for unit in units {
                UnitName::parse(unit)?;
            }
        }
        if self.desired.workload.is_empty() {
            return Err(JujuError::InvalidArgument(
                "at least one accepted workload status is required".into(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(JujuError::InvalidArgument("timeout must be non-zero".into()));
        }
        Ok(())
    }
}

// ── Report ─────────────────────────────────────────────────────────────────

/// Terminal or current state of one watch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Pending,
    Polling,
    Satisfied,
    Failed,
    Cancelled,
}

impl std::fmt::Display for WatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Polling => "polling",
            Self::Satisfied => "satisfied",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Outcome of one wait.
#[derive(Debug)]
pub struct WaitReport {
    pub wait_id: Uuid,
    pub model: String,
    pub states: BTreeMap<String, WatchState>,
    /// Every hard failure observed, in arrival order.
    pub errors: Vec<JujuError>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl WaitReport {
    fn new(model: &str, applications: &[String]) -> Self {
        Self {
            wait_id: Uuid::new_v4(),
            model: model.to_string(),
            states: applications
                .iter()
                .map(|app| (app.clone(), WatchState::Pending))
                .collect(),
            errors: Vec::new(),
            timed_out: false,
            elapsed: Duration::ZERO,
        }
    }

    fn with_state(&self, state: WatchState) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(app, _)| app.clone())
            .collect()
    }

    pub fn satisfied(&self) -> Vec<String> {
        self.with_state(WatchState::Satisfied)
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.with_state(WatchState::Cancelled)
    }

    /// Applications that did not converge.
    pub fn pending(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, s)| **s != WatchState::Satisfied)
            .map(|(app, _)| app.clone())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.pending().is_empty()
    }

    /// Hard failures win over a timeout.
    pub fn into_result(self) -> Result<(), JujuError> {
        if !self.errors.is_empty() {
            return Err(JujuError::Wait {
                model: self.model,
                errors: self.errors,
            });
        }
        let pending = self.pending();
        if self.timed_out && !pending.is_empty() {
            return Err(JujuError::Timeout(format!(
                "Timed out while waiting for model {:?} to be ready (pending: {})",
                self.model,
                pending.join(", ")
            )));
        }
        Ok(())
    }

    /// Fold one joined task into the report. Returns true on a hard failure.
    fn record(
        &mut self,
        application: &str,
        outcome: Result<WatchState, JujuError>,
        events: Option<&EventBus>,
    ) -> bool {
        match outcome {
            Ok(state) => {
                if state == WatchState::Satisfied {
                    info!("Application {} in model {} is ready", application, self.model);
                    if let Some(events) = events {
                        events.emit(
                            APPLICATION_READY,
                            &json!({ "wait_id": self.wait_id, "model": self.model, "application": application }),
                        );
                    }
                }
                self.states.insert(application.to_string(), state);
                false
            }
            Err(err) => {
                warn!(
                    "Watch of {} in model {} failed: {}",
                    application, self.model, err
                );
                if let Some(events) = events {
                    events.emit(
                        APPLICATION_FAILED,
                        &json!({
                            "wait_id": self.wait_id,
                            "model": self.model,
                            "application": application,
                            "code": err.code().code_string(),
                            "error": err.to_string(),
                        }),
                    );
                }
                self.states.insert(application.to_string(), WatchState::Failed);
                self.errors.push(err);
                true
            }
        }
    }
}

// ── Watch tasks ────────────────────────────────────────────────────────────

struct WatchTask {
    model: String,
    application: String,
    units: Option<Vec<String>>,
    desired: Arc<DesiredStatus>,
    ticker: StatusTicker,
    queue: Option<mpsc::Sender<String>>,
}

impl WatchTask {
    async fn run(mut self) -> Result<WatchState, JujuError> {
        loop {
            let Some(snapshot) = self.ticker.next().await? else {
                debug!("Watch of {} cancelled", self.application);
                return Ok(WatchState::Cancelled);
            };
            let verdict = judge(
                &snapshot,
                &self.model,
                &self.application,
                self.units.as_deref(),
                &self.desired,
            )?;
            match verdict {
                Verdict::Satisfied => {
                    post_ready(self.queue.as_ref(), &self.application);
                    return Ok(WatchState::Satisfied);
                }
                Verdict::Pending(reason) => {
                    debug!(
                        "Snapshot {} not converged: {}",
                        self.ticker.generation(),
                        reason
                    );
                }
            }
        }
    }
}

/// Evaluate one application against a snapshot. An application missing from
/// the snapshot is a hard failure.
fn judge(
    snapshot: &StatusSnapshot,
    model: &str,
    application: &str,
    units: Option<&[String]>,
    desired: &DesiredStatus,
) -> Result<Verdict, JujuError> {
    let status = snapshot
        .application(application)
        .ok_or_else(|| JujuError::UnknownApplication {
            application: application.to_string(),
            model: model.to_string(),
        })?;
    Ok(evaluate(status, units, desired))
}

fn post_ready(queue: Option<&mpsc::Sender<String>>, application: &str) {
    if let Some(queue) = queue
        && let Err(err) = queue.try_send(application.to_string())
    {
        warn!("Could not post {} to the result queue: {}", application, err);
    }
}

/// Outcome of a watch cancelled by a hard failure elsewhere, judged against
/// the last published snapshot so that every application sees it once.
fn settle(
    latest: Option<&StatusSnapshot>,
    model: &str,
    application: &str,
    spec: &WaitSpec,
) -> Result<WatchState, JujuError> {
    let Some(snapshot) = latest else {
        return Ok(WatchState::Cancelled);
    };
    let units = spec.units_for(application);
    match judge(snapshot, model, application, units.as_deref(), &spec.desired)? {
        Verdict::Satisfied => {
            post_ready(spec.queue.as_ref(), application);
            Ok(WatchState::Satisfied)
        }
        Verdict::Pending(_) => Ok(WatchState::Cancelled),
    }
}

/// Watch every application of `spec` against `updater` for at most `timeout`.
pub async fn watch_all(updater: &SharedStatusUpdater, spec: WaitSpec, timeout: Duration) -> WaitReport {
    let model = updater.model().to_string();
    let mut report = WaitReport::new(&model, &spec.applications);
    let span = info_span!("wait", model = %model, wait_id = %report.wait_id);
    let events = spec.events.clone();
    let start = Instant::now();

    async {
        info!(
            "Waiting up to {:?} for {} application(s) in model {}",
            timeout,
            spec.applications.len(),
            model
        );
        if let Some(events) = &events {
            events.emit(
                WAIT_STARTED,
                &json!({
                    "wait_id": report.wait_id,
                    "model": model,
                    "applications": spec.applications,
                    "timeout_secs": timeout.as_secs(),
                }),
            );
        }

        let token = CancellationToken::new();
        let desired = Arc::new(spec.desired.clone());
        let mut tasks = JoinSet::new();
        let mut names: HashMap<Id, String> = HashMap::new();
        for application in &spec.applications {
            let task = WatchTask {
                model: model.clone(),
                application: application.clone(),
                units: spec.units_for(application),
                desired: Arc::clone(&desired),
                ticker: updater.tick_status().cancelled_by(token.clone()),
                queue: spec.queue.clone(),
            };
            let handle = tasks.spawn(
                task.run()
                    .instrument(info_span!("watch", application = %application)),
            );
            names.insert(handle.id(), application.clone());
            report.states.insert(application.clone(), WatchState::Polling);
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                joined = tasks.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    let (application, outcome) = unpack(joined, &names);
                    if report.record(&application, outcome, events.as_ref()) {
                        break;
                    }
                }
                _ = &mut deadline => {
                    report.timed_out = true;
                    break;
                }
            }
        }

        token.cancel();
        let failed_fast = !report.timed_out && !report.errors.is_empty();
        let latest = updater.latest();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (application, mut outcome) = unpack(joined, &names);
            if failed_fast && matches!(outcome, Ok(WatchState::Cancelled)) {
                outcome = settle(latest.as_deref(), &model, &application, &spec);
            }
            report.record(&application, outcome, events.as_ref());
        }

        report.elapsed = start.elapsed();
        if let Some(events) = &events {
            if report.timed_out {
                events.emit(
                    WAIT_TIMED_OUT,
                    &json!({ "wait_id": report.wait_id, "model": model, "pending": report.pending() }),
                );
            }
            events.emit(
                WAIT_COMPLETED,
                &json!({
                    "wait_id": report.wait_id,
                    "model": model,
                    "elapsed_ms": u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
                    "satisfied": report.satisfied(),
                    "failed": report.errors.len(),
                }),
            );
        }
        info!(
            "Wait on model {} finished in {:?}: {} ready, {} failed, timed out: {}",
            model,
            report.elapsed,
            report.satisfied().len(),
            report.errors.len(),
            report.timed_out
        );
    }
    .instrument(span)
    .await;

    report
}

fn unpack(
    joined: Result<(Id, Result<WatchState, JujuError>), JoinError>,
    names: &HashMap<Id, String>,
) -> (String, Result<WatchState, JujuError>) {
    match joined {
        Ok((id, outcome)) => (names.get(&id).cloned().unwrap_or_default(), outcome),
        Err(err) => {
            let application = names.get(&err.id()).cloned().unwrap_or_default();
            if err.is_cancelled() {
                (application, Ok(WatchState::Cancelled))
            } else {
                let reason = format!("watch task for {application} panicked: {err}");
                (application, Err(JujuError::Api(reason)))
            }
        }
    }
}

// ── Waiter ─────────────────────────────────────────────────────────────────

/// Waits for applications of a model to converge.
pub struct ConvergenceWaiter {
    manager: Arc<ConnectionManager>,
    updater_config: UpdaterConfig,
    default_timeout: Duration,
}

impl ConvergenceWaiter {
    pub fn new(manager: Arc<ConnectionManager>, settings: &WaitSettings) -> Self {
        Self {
            manager,
            updater_config: UpdaterConfig::from_settings(settings),
            default_timeout: settings.timeout,
        }
    }

    /// Run a wait and report per-application outcomes.
    ///
    /// Fails early only for invalid arguments or when the model cannot be
    /// opened; wait outcomes are in the report.
    pub async fn run(&self, model: &str, spec: WaitSpec) -> Result<WaitReport, JujuError> {
        spec.validate()?;
        if spec.applications.is_empty() {
            return Ok(WaitReport::new(model, &[]));
        }
        let timeout = spec.timeout.unwrap_or(self.default_timeout);
        let guard =
            SharedStatusUpdater::start(Arc::clone(&self.manager), model, self.updater_config)
                .await?;
        let report = watch_all(guard.updater(), spec, timeout).await;
        guard.shutdown().await;
        Ok(report)
    }

    /// Wait for every application of `spec` to reach its desired status.
    pub async fn wait_until_desired_status(
        &self,
        model: &str,
        spec: WaitSpec,
    ) -> Result<(), JujuError> {
        self.run(model, spec).await?.into_result()
    }
}
