//! High-level facade over one controller.
//!
//! Every operation opens a model connection, does its work and releases the
//! connection again. Single-purpose waits poll status with
//! [`poll::wait_for_condition`]; multi-application waits go through the
//! [`ConvergenceWaiter`].

use crate::connection::{
    ConnectionManager, Controller, DeployRequest, MachineRequest, ModelConnection,
};
use crate::events::EventBus;
use crate::poll::{self, CondCheckError, PollError};
use crate::status::{ApplicationStatus, StatusSnapshot};
use crate::waiter::{ConvergenceWaiter, WaitSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use sunbeam_common::JujuError;
use sunbeam_common::config::WaitSettings;
use sunbeam_common::types::{Endpoint, UnitName};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// Message MAAS reports once a machine is provisioned.
const DEPLOYED: &str = "Deployed";

/// Convenience API for deployment steps.
pub struct JujuHelper {
    manager: Arc<ConnectionManager>,
    waiter: ConvergenceWaiter,
    settings: WaitSettings,
    events: Option<EventBus>,
}

impl JujuHelper {
    pub fn new(controller: Arc<dyn Controller>, settings: WaitSettings) -> Self {
        let manager = Arc::new(ConnectionManager::new(controller));
        let waiter = ConvergenceWaiter::new(Arc::clone(&manager), &settings);
        Self {
            manager,
            waiter,
            settings,
            events: None,
        }
    }

    /// Publish convergence-wait progress on `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn settings(&self) -> &WaitSettings {
        &self.settings
    }

    /// Close every open connection and the controller.
    pub async fn disconnect(&self) {
        self.manager.disconnect_all().await;
    }

    async fn with_model<T, F, Fut>(&self, model: &str, op: F) -> Result<T, JujuError>
    where
        F: FnOnce(Arc<dyn ModelConnection>) -> Fut,
        Fut: Future<Output = Result<T, JujuError>>,
    {
        let handle = self.manager.open_model(model).await?;
        let connection = Arc::clone(handle.connection()?);
        let result = op(connection).await;
        handle.release().await;
        result
    }

    // ── Models ─────────────────────────────────────────────────────────────

    pub async fn list_models(&self) -> Result<Vec<String>, JujuError> {
        self.manager.controller().list_models().await
    }

    pub async fn model_exists(&self, model: &str) -> Result<bool, JujuError> {
        Ok(self.list_models().await?.iter().any(|m| m == model))
    }

    /// Status of `model`, restricted to `applications` when non-empty.
    pub async fn get_model_status(
        &self,
        model: &str,
        applications: &[String],
    ) -> Result<StatusSnapshot, JujuError> {
        self.with_model(model, |conn| async move { conn.get_status(applications).await })
            .await
    }

    pub async fn get_application_names(&self, model: &str) -> Result<Vec<String>, JujuError> {
        Ok(self.get_model_status(model, &[]).await?.application_names())
    }

    pub async fn get_application(
        &self,
        model: &str,
        application: &str,
    ) -> Result<ApplicationStatus, JujuError> {
        let filter = [application.to_string()];
        let snapshot = self.get_model_status(model, &filter).await?;
        snapshot
            .applications
            .get(application)
            .cloned()
            .ok_or_else(|| application_not_found(application, model))
    }

    pub async fn get_charm_channel(
        &self,
        model: &str,
        application: &str,
    ) -> Result<Option<String>, JujuError> {
        Ok(self.get_application(model, application).await?.charm_channel)
    }

    // ── Applications and units ─────────────────────────────────────────────

    pub async fn deploy(&self, model: &str, request: &DeployRequest) -> Result<(), JujuError> {
        info!(
            "Deploying {} as {} in model {}",
            request.charm, request.application, model
        );
        self.with_model(model, |conn| async move { conn.deploy(request).await })
            .await
    }

    /// Add one unit per placement, or a single unit when none are given.
    pub async fn add_unit(
        &self,
        model: &str,
        application: &str,
        placements: &[String],
    ) -> Result<(), JujuError> {
        self.with_model(model, |conn| async move {
            require_application(conn.as_ref(), application).await?;
            let count = placements.len().max(1);
            info!("Adding {} unit(s) to {}", count, application);
            conn.add_unit(application, count, placements).await
        })
        .await
    }

    pub async fn remove_unit(&self, model: &str, unit: &str) -> Result<(), JujuError> {
        let unit = UnitName::parse(unit)?;
        self.with_model(model, |conn| async move {
            let snapshot = conn.get_status(&[unit.application().to_string()]).await?;
            let application = snapshot
                .application(unit.application())
                .ok_or_else(|| application_not_found(unit.application(), model))?;
            if !application.units.contains_key(unit.as_str()) {
                return Err(unit_not_found(unit.as_str(), model));
            }
            info!("Removing unit {} from model {}", unit, model);
            conn.remove_unit(&unit).await
        })
        .await
    }

    pub async fn get_leader_unit(&self, model: &str, application: &str) -> Result<String, JujuError> {
        let app = self.get_application(model, application).await?;
        app.leader()
            .map(str::to_string)
            .ok_or_else(|| JujuError::LeaderNotFound {
                application: application.to_string(),
                model: model.to_string(),
            })
    }

    /// The unit of `application` placed on `machine`.
    pub async fn get_unit_from_machine(
        &self,
        model: &str,
        application: &str,
        machine: &str,
    ) -> Result<String, JujuError> {
        let snapshot = self.get_model_status(model, &[]).await?;
        if !snapshot.machines.is_empty() && !snapshot.machines.contains_key(machine) {
            return Err(JujuError::MachineNotFound {
                machine: machine.to_string(),
                model: model.to_string(),
            });
        }
        let app = snapshot
            .application(application)
            .ok_or_else(|| application_not_found(application, model))?;
        app.units
            .iter()
            .find(|(_, unit)| unit.machine.as_deref() == Some(machine))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| unit_not_found(&format!("{application} on machine {machine}"), model))
    }

    pub async fn set_application_config(
        &self,
        model: &str,
        application: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<(), JujuError> {
        self.with_model(model, |conn| async move {
            require_application(conn.as_ref(), application).await?;
            conn.set_config(application, config).await
        })
        .await
    }

    /// Relate two endpoints; both applications must exist.
    pub async fn integrate(
        &self,
        model: &str,
        provider: &Endpoint,
        requirer: &Endpoint,
    ) -> Result<(), JujuError> {
        self.with_model(model, |conn| async move {
            require_application(conn.as_ref(), &provider.application).await?;
            require_application(conn.as_ref(), &requirer.application).await?;
            info!("Integrating {} with {}", provider, requirer);
            conn.integrate(provider, requirer).await
        })
        .await
    }

    pub async fn remove_relation(
        &self,
        model: &str,
        first: &Endpoint,
        second: &Endpoint,
    ) -> Result<(), JujuError> {
        self.with_model(model, |conn| async move {
            conn.remove_relation(first, second).await
        })
        .await
    }

    pub async fn add_machine(
        &self,
        model: &str,
        request: &MachineRequest,
    ) -> Result<String, JujuError> {
        let id = self
            .with_model(model, |conn| async move { conn.add_machine(request).await })
            .await?;
        info!("Added machine {} to model {}", id, model);
        Ok(id)
    }

    // ── Actions ────────────────────────────────────────────────────────────

    /// Run `action` on `unit` and return its results.
    pub async fn run_action(
        &self,
        model: &str,
        unit: &str,
        action: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, JujuError> {
        let unit = UnitName::parse(unit)?;
        self.with_model(model, |conn| async move {
            let snapshot = conn.get_status(&[unit.application().to_string()]).await?;
            if snapshot.unit(unit.as_str()).is_none() {
                return Err(unit_not_found(unit.as_str(), model));
            }
            debug!("Running action {} on {}", action, unit);
            let outcome = conn.run_action(unit.as_str(), action, params).await?;
            if !outcome.is_completed() {
                return Err(JujuError::ActionFailed {
                    unit: unit.to_string(),
                    action: action.to_string(),
                    status: outcome.status,
                    output: outcome.results,
                });
            }
            Ok(outcome.results)
        })
        .await
    }

    // ── Secrets ────────────────────────────────────────────────────────────

    /// Create a secret and return its URI.
    pub async fn add_secret(
        &self,
        model: &str,
        name: &str,
        data: &BTreeMap<String, String>,
        info: Option<&str>,
    ) -> Result<String, JujuError> {
        self.with_model(model, |conn| async move {
            conn.add_secret(name, data, info).await
        })
        .await
    }

    pub async fn grant_secret(
        &self,
        model: &str,
        name: &str,
        application: &str,
    ) -> Result<(), JujuError> {
        self.with_model(model, |conn| async move {
            conn.grant_secret(name, application).await
        })
        .await
    }

    pub async fn get_secret(
        &self,
        model: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, JujuError> {
        self.with_model(model, |conn| async move { conn.get_secret(name).await })
            .await
    }

    pub async fn remove_secret(&self, model: &str, name: &str) -> Result<(), JujuError> {
        self.with_model(model, |conn| async move { conn.remove_secret(name).await })
            .await
    }

    // ── Single-purpose waits ───────────────────────────────────────────────

    /// Poll status of `model` until `check` yields a value.
    ///
    /// Transport failures are retried on a reopened connection. Any other
    /// error, from the fetch or from `check`, ends the wait.
    async fn poll_status<T, F>(
        &self,
        model: &str,
        timeout: Option<Duration>,
        timeout_message: String,
        check: F,
    ) -> Result<T, JujuError>
    where
        F: Fn(&StatusSnapshot) -> Result<Option<T>, JujuError>,
    {
        let timeout = timeout.unwrap_or(self.settings.timeout);
        let handle = Mutex::new(self.manager.open_model(model).await?);
        let (handle_ref, check_ref, manager) = (&handle, &check, &self.manager);

        let outcome = poll::wait_for_condition(
            move || async move {
                let mut guard = handle_ref.lock().await;
                if !manager.is_connected(&guard)
                    && let Err(err) = manager.reopen_model(&mut guard).await
                {
                    warn!("Reconnecting to model {} failed: {}", guard.model(), err);
                    return Err(CondCheckError::<JujuError>::NotYet);
                }
                let connection = Arc::clone(guard.connection()?);
                drop(guard);
                match connection.get_status(&[]).await {
                    Ok(snapshot) => check_ref(&snapshot)?.ok_or(CondCheckError::NotYet),
                    Err(err) if err.is_transport() => {
                        warn!("Status fetch for model {} failed: {}", connection.model(), err);
                        Err(CondCheckError::NotYet)
                    }
                    Err(err) => Err(CondCheckError::Failed(err)),
                }
            },
            self.settings.poll_interval,
            timeout,
        )
        .await;

        handle.into_inner().release().await;
        outcome.map_err(|err| match err {
            PollError::TimedOut(elapsed) => {
                debug!("Gave up after {:?}", elapsed);
                JujuError::Timeout(timeout_message)
            }
            PollError::PermanentError(err) => err,
        })
    }

    /// Wait for the application-level status of `application` to be in
    /// `accepted` (default `active`).
    ///
    /// Returns immediately when the application is not deployed.
    pub async fn wait_application_ready(
        &self,
        model: &str,
        application: &str,
        accepted: Option<&[String]>,
        timeout: Option<Duration>,
    ) -> Result<(), JujuError> {
        let accepted = accepted_set(accepted, "active");
        let filter = [application.to_string()];
        if self.get_model_status(model, &filter).await?.application(application).is_none() {
            debug!("Application {} not deployed, nothing to wait for", application);
            return Ok(());
        }
        info!("Waiting for application {} to be ready", application);
        self.poll_status(
            model,
            timeout,
            format!("Timed out while waiting for application {application:?} to be ready"),
            |snapshot| {
                let ready = snapshot
                    .application(application)
                    .and_then(|app| app.status.as_ref())
                    .is_some_and(|status| accepted.contains(&status.current));
                Ok(ready.then_some(()))
            },
        )
        .await
    }

    /// Wait for every unit in `units` to report an accepted agent status
    /// (default `idle`) and workload status (default `active`).
    ///
    /// Returns immediately when any of the units is absent.
    pub async fn wait_units_ready(
        &self,
        model: &str,
        units: &[String],
        accepted_agent: Option<&[String]>,
        accepted_workload: Option<&[String]>,
        timeout: Option<Duration>,
    ) -> Result<(), JujuError> {
        for unit in units {
            UnitName::parse(unit)?;
        }
        let agent = accepted_set(accepted_agent, "idle");
        let workload = accepted_set(accepted_workload, "active");
        let current = self.get_model_status(model, &[]).await?;
        if let Some(missing) = units.iter().find(|u| current.unit(u).is_none()) {
            debug!("Unit {} not deployed, nothing to wait for", missing);
            return Ok(());
        }
        info!("Waiting for units {} to be ready", units.join(","));
        self.poll_status(
            model,
            timeout,
            format!(
                "Timed out while waiting for units {} to be ready",
                units.join(",")
            ),
            |snapshot| {
                let ready = units.iter().all(|name| {
                    snapshot.unit(name).is_some_and(|unit| {
                        unit.agent
                            .as_ref()
                            .is_some_and(|s| agent.contains(&s.current))
                            && unit
                                .workload
                                .as_ref()
                                .is_some_and(|s| workload.contains(&s.current))
                    })
                });
                Ok(ready.then_some(()))
            },
        )
        .await
    }

    /// Wait until none of `units` is present.
    pub async fn wait_units_gone(
        &self,
        model: &str,
        units: &[String],
        timeout: Option<Duration>,
    ) -> Result<(), JujuError> {
        info!("Waiting for units {} to be removed", units.join(","));
        self.poll_status(
            model,
            timeout,
            format!(
                "Timed out while waiting for units {} to be removed",
                units.join(",")
            ),
            |snapshot| Ok(units.iter().all(|u| snapshot.unit(u).is_none()).then_some(())),
        )
        .await
    }

    /// Wait until none of `applications` is present.
    pub async fn wait_application_gone(
        &self,
        model: &str,
        applications: &[String],
        timeout: Option<Duration>,
    ) -> Result<(), JujuError> {
        info!("Waiting for applications {} to be removed", applications.join(","));
        self.poll_status(
            model,
            timeout,
            format!(
                "Timed out while waiting for applications {} to be removed",
                applications.join(",")
            ),
            |snapshot| {
                let gone = applications
                    .iter()
                    .all(|app| snapshot.application(app).is_none());
                Ok(gone.then_some(()))
            },
        )
        .await
    }

    /// Wait until every machine of `model` reports `Deployed`.
    pub async fn wait_all_machines_deployed(
        &self,
        model: &str,
        timeout: Option<Duration>,
    ) -> Result<(), JujuError> {
        info!("Waiting for machines of model {} to be deployed", model);
        self.poll_status(
            model,
            timeout,
            "Timed out while waiting for machines to be deployed".to_string(),
            |snapshot| {
                let deployed = snapshot
                    .machines
                    .values()
                    .all(|machine| machine.status_message() == DEPLOYED);
                Ok(deployed.then_some(()))
            },
        )
        .await
    }

    /// Wait until `model` no longer exists on the controller.
    pub async fn wait_model_gone(
        &self,
        model: &str,
        timeout: Option<Duration>,
    ) -> Result<(), JujuError> {
        info!("Waiting for model {} to be removed", model);
        let controller = self.manager.controller();
        poll::wait_for_condition(
            || async move {
                match controller.list_models().await {
                    Ok(models) if models.iter().any(|m| m == model) => {
                        Err(CondCheckError::NotYet)
                    }
                    Ok(_) => Ok(()),
                    Err(err) if err.is_transport() => {
                        warn!("Listing models failed: {}", err);
                        Err(CondCheckError::NotYet)
                    }
                    Err(err) => Err(CondCheckError::Failed(err)),
                }
            },
            self.settings.poll_interval,
            timeout.unwrap_or(self.settings.timeout),
        )
        .await
        .map_err(|err| match err {
            PollError::TimedOut(_) => {
                JujuError::Timeout(format!("Timed out while waiting for model {model:?} to be removed"))
            }
            PollError::PermanentError(err) => err,
        })
    }

    // ── Convergence waits ──────────────────────────────────────────────────

    /// Wait for the applications of `spec` to reach their desired status.
    pub async fn wait_until_desired_status(
        &self,
        model: &str,
        mut spec: WaitSpec,
    ) -> Result<(), JujuError> {
        if spec.events.is_none() {
            spec.events = self.events.clone();
        }
        self.waiter.wait_until_desired_status(model, spec).await
    }

    /// Wait for `applications`, or every application of the model, to be
    /// active.
    pub async fn wait_until_active(
        &self,
        model: &str,
        applications: Option<Vec<String>>,
        timeout: Option<Duration>,
        queue: Option<mpsc::Sender<String>>,
    ) -> Result<(), JujuError> {
        let applications = match applications {
            Some(apps) => apps,
            None => self.get_application_names(model).await?,
        };
        let mut spec = WaitSpec::new(applications).status(["active"]);
        if let Some(timeout) = timeout {
            spec = spec.timeout(timeout);
        }
        if let Some(queue) = queue {
            spec = spec.queue(queue);
        }
        self.wait_until_desired_status(model, spec).await
    }
}

fn accepted_set(accepted: Option<&[String]>, default: &str) -> BTreeSet<String> {
    match accepted {
        Some(values) if !values.is_empty() => values.iter().cloned().collect(),
        _ => BTreeSet::from([default.to_string()]),
    }
}

async fn require_application(
    conn: &dyn ModelConnection,
    application: &str,
) -> Result<(), JujuError> {
    let snapshot = conn.get_status(&[application.to_string()]).await?;
    if snapshot.application(application).is_some() {
        Ok(())
    } else {
        Err(application_not_found(application, conn.model()))
    }
}

fn application_not_found(application: &str, model: &str) -> JujuError {
    JujuError::ApplicationNotFound {
        application: application.to_string(),
        model: model.to_string(),
    }
}

fn unit_not_found(unit: &str, model: &str) -> JujuError {
    JujuError::UnitNotFound {
        unit: unit.to_string(),
        model: model.to_string(),
    }
}
