//! Scripted in-memory control plane.
//!
//! [`MockControlPlane`] implements [`Controller`] and hands out model
//! connections that replay scripted status results FIFO, falling back to the
//! model's current snapshot once the script is exhausted. Every call is
//! recorded so tests can assert on what the engine did.

use crate::connection::{
    ActionOutcome, Controller, DeployRequest, Liveness, MachineRequest, ModelConnection,
};
use crate::status::StatusSnapshot;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use sunbeam_common::JujuError;
use sunbeam_common::types::{Endpoint, UnitName};

/// A mutation recorded by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Deploy(DeployRequest),
    AddUnit {
        application: String,
        count: usize,
        placements: Vec<String>,
    },
    RemoveUnit(String),
    RunAction {
        unit: String,
        action: String,
        params: serde_json::Map<String, serde_json::Value>,
    },
    Integrate(String, String),
    RemoveRelation(String, String),
    AddMachine(MachineRequest),
    SetConfig {
        application: String,
        config: BTreeMap<String, String>,
    },
    AddSecret(String),
    GrantSecret {
        name: String,
        application: String,
    },
    RemoveSecret(String),
}

struct ModelState {
    current: StatusSnapshot,
    scripted: VecDeque<Result<StatusSnapshot, JujuError>>,
    liveness: Option<Liveness>,
    fetches: usize,
    opens: usize,
    disconnects: usize,
    fetch_delay: Option<Duration>,
}

impl ModelState {
    fn new(current: StatusSnapshot) -> Self {
        Self {
            current,
            scripted: VecDeque::new(),
            liveness: None,
            fetches: 0,
            opens: 0,
            disconnects: 0,
            fetch_delay: None,
        }
    }
}

struct State {
    controller_liveness: Liveness,
    controller_reconnects: usize,
    reconnect_failures: VecDeque<JujuError>,
    models: BTreeMap<String, ModelState>,
    actions: VecDeque<ActionOutcome>,
    secrets: BTreeMap<String, BTreeMap<String, String>>,
    grants: BTreeMap<String, Vec<String>>,
    calls: Vec<MockCall>,
}

/// Scripted control plane for tests and offline runs.
#[derive(Clone)]
pub struct MockControlPlane {
    name: String,
    state: Arc<Mutex<State>>,
}

impl MockControlPlane {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(State {
                controller_liveness: Liveness::Alive,
                controller_reconnects: 0,
                reconnect_failures: VecDeque::new(),
                models: BTreeMap::new(),
                actions: VecDeque::new(),
                secrets: BTreeMap::new(),
                grants: BTreeMap::new(),
                calls: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_model_state<T>(&self, model: &str, f: impl FnOnce(&mut ModelState) -> T) -> T {
        let mut state = self.lock();
        f(state
            .models
            .entry(model.to_string())
            .or_insert_with(|| ModelState::new(StatusSnapshot::new(model))))
    }

    /// Like `with_model_state`, but a removed model is an error.
    fn with_existing_model<T>(
        &self,
        model: &str,
        f: impl FnOnce(&mut ModelState) -> T,
    ) -> Result<T, JujuError> {
        let mut state = self.lock();
        state
            .models
            .get_mut(model)
            .map(f)
            .ok_or_else(|| JujuError::ModelNotFound(model.to_string()))
    }

    /// Add a model whose current status is `snapshot`.
    #[must_use]
    pub fn with_model(self, model: &str, snapshot: StatusSnapshot) -> Self {
        self.set_status(model, snapshot);
        self
    }

    /// Replace the status returned once the script is exhausted.
    pub fn set_status(&self, model: &str, snapshot: StatusSnapshot) {
        self.with_model_state(model, |m| m.current = snapshot);
    }

    /// Queue a status result. Results are consumed FIFO.
    pub fn push_status(&self, model: &str, result: Result<StatusSnapshot, JujuError>) {
        self.with_model_state(model, |m| m.scripted.push_back(result));
    }

    /// Delay every status fetch of `model`.
    pub fn set_fetch_delay(&self, model: &str, delay: Duration) {
        self.with_model_state(model, |m| m.fetch_delay = Some(delay));
    }

    pub fn remove_model(&self, model: &str) {
        self.lock().models.remove(model);
    }

    pub fn set_model_liveness(&self, model: &str, liveness: Liveness) {
        self.with_model_state(model, |m| m.liveness = Some(liveness));
    }

    pub fn set_controller_liveness(&self, liveness: Liveness) {
        self.lock().controller_liveness = liveness;
    }

    pub fn controller_liveness(&self) -> Liveness {
        self.lock().controller_liveness
    }

    /// Make the next controller reconnect fail with `error`.
    pub fn push_reconnect_failure(&self, error: JujuError) {
        self.lock().reconnect_failures.push_back(error);
    }

    /// Queue an action outcome; unscripted actions complete with empty results.
    pub fn push_action(&self, outcome: ActionOutcome) {
        self.lock().actions.push_back(outcome);
    }

    pub fn fetches(&self, model: &str) -> usize {
        self.lock().models.get(model).map_or(0, |m| m.fetches)
    }

    pub fn opens(&self, model: &str) -> usize {
        self.lock().models.get(model).map_or(0, |m| m.opens)
    }

    pub fn disconnects(&self, model: &str) -> usize {
        self.lock().models.get(model).map_or(0, |m| m.disconnects)
    }

    pub fn controller_reconnects(&self) -> usize {
        self.lock().controller_reconnects
    }

    /// Snapshot of all mutations received by the mock.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn grants(&self, secret: &str) -> Vec<String> {
        self.lock().grants.get(secret).cloned().unwrap_or_default()
    }

    fn record(&self, call: MockCall) {
        self.lock().calls.push(call);
    }
}

#[async_trait]
impl Controller for MockControlPlane {
    fn name(&self) -> &str {
        &self.name
    }

    fn liveness(&self) -> Liveness {
        self.lock().controller_liveness
    }

    async fn reconnect(&self) -> Result<(), JujuError> {
        let mut state = self.lock();
        state.controller_reconnects += 1;
        if let Some(error) = state.reconnect_failures.pop_front() {
            return Err(error);
        }
        state.controller_liveness = Liveness::Alive;
        Ok(())
    }

    async fn open_model(&self, model: &str) -> Result<Arc<dyn ModelConnection>, JujuError> {
        let mut state = self.lock();
        if !state.controller_liveness.is_alive() {
            return Err(JujuError::ConnectionClosed(format!(
                "controller {} is not connected",
                self.name
            )));
        }
        let entry = state
            .models
            .get_mut(model)
            .ok_or_else(|| JujuError::ModelNotFound(model.to_string()))?;
        entry.opens += 1;
        entry.liveness = Some(Liveness::Alive);
        Ok(Arc::new(MockModel {
            plane: self.clone(),
            model: model.to_string(),
        }))
    }

    async fn list_models(&self) -> Result<Vec<String>, JujuError> {
        Ok(self.lock().models.keys().cloned().collect())
    }

    async fn disconnect(&self) {
        self.lock().controller_liveness = Liveness::SocketClosed;
    }
}

/// Model connection handed out by [`MockControlPlane`].
pub struct MockModel {
    plane: MockControlPlane,
    model: String,
}

impl MockModel {
    fn snapshot(&self) -> Result<StatusSnapshot, JujuError> {
        self.plane
            .with_existing_model(&self.model, |m| m.current.clone())
    }

    fn require_application(&self, application: &str) -> Result<(), JujuError> {
        if self.snapshot()?.application(application).is_some() {
            Ok(())
        } else {
            Err(JujuError::ApplicationNotFound {
                application: application.to_string(),
                model: self.model.clone(),
            })
        }
    }
}

#[async_trait]
impl ModelConnection for MockModel {
    fn model(&self) -> &str {
        &self.model
    }

    fn liveness(&self) -> Liveness {
        let state = self.plane.lock();
        state
            .models
            .get(&self.model)
            .and_then(|m| m.liveness)
            .unwrap_or(Liveness::SocketClosed)
    }

    async fn get_status(&self, filter: &[String]) -> Result<StatusSnapshot, JujuError> {
        let delay = self.plane.with_existing_model(&self.model, |m| {
            m.fetches += 1;
            m.fetch_delay
        })?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.plane.with_existing_model(&self.model, |m| {
            let next = m
                .scripted
                .pop_front()
                .unwrap_or_else(|| Ok(m.current.clone()));
            if matches!(next, Err(JujuError::ConnectionClosed(_))) {
                m.liveness = Some(Liveness::SocketClosed);
            }
            next
        })?;
        result.map(|snapshot| snapshot.filtered(filter))
    }

    async fn disconnect(&self) {
        let _ = self.plane.with_existing_model(&self.model, |m| {
            m.disconnects += 1;
            m.liveness = Some(Liveness::SocketClosed);
        });
    }

    async fn deploy(&self, request: &DeployRequest) -> Result<(), JujuError> {
        self.plane.record(MockCall::Deploy(request.clone()));
        Ok(())
    }

    async fn add_unit(
        &self,
        application: &str,
        count: usize,
        placements: &[String],
    ) -> Result<(), JujuError> {
        self.plane.record(MockCall::AddUnit {
            application: application.to_string(),
            count,
            placements: placements.to_vec(),
        });
        Ok(())
    }

    async fn remove_unit(&self, unit: &UnitName) -> Result<(), JujuError> {
        self.plane.record(MockCall::RemoveUnit(unit.to_string()));
        Ok(())
    }

    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ActionOutcome, JujuError> {
        self.plane.record(MockCall::RunAction {
            unit: unit.to_string(),
            action: action.to_string(),
            params: params.clone(),
        });
        let scripted = self.plane.lock().actions.pop_front();
        Ok(scripted.unwrap_or_else(|| ActionOutcome::completed(serde_json::json!({}))))
    }

    async fn integrate(&self, provider: &Endpoint, requirer: &Endpoint) -> Result<(), JujuError> {
        self.plane
            .record(MockCall::Integrate(provider.to_string(), requirer.to_string()));
        Ok(())
    }

    async fn remove_relation(&self, first: &Endpoint, second: &Endpoint) -> Result<(), JujuError> {
        self.plane
            .record(MockCall::RemoveRelation(first.to_string(), second.to_string()));
        Ok(())
    }

    async fn add_machine(&self, request: &MachineRequest) -> Result<String, JujuError> {
        self.plane.record(MockCall::AddMachine(request.clone()));
        let next = self.snapshot()?.machines.len();
        Ok(next.to_string())
    }

    async fn set_config(
        &self,
        application: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<(), JujuError> {
        self.require_application(application)?;
        self.plane.record(MockCall::SetConfig {
            application: application.to_string(),
            config: config.clone(),
        });
        Ok(())
    }

    async fn add_secret(
        &self,
        name: &str,
        data: &BTreeMap<String, String>,
        _info: Option<&str>,
    ) -> Result<String, JujuError> {
        self.plane.record(MockCall::AddSecret(name.to_string()));
        self.plane
            .lock()
            .secrets
            .insert(name.to_string(), data.clone());
        Ok(format!("secret:{}/{name}", self.model))
    }

    async fn grant_secret(&self, name: &str, application: &str) -> Result<(), JujuError> {
        let mut state = self.plane.lock();
        if !state.secrets.contains_key(name) {
            return Err(JujuError::SecretNotFound(name.to_string()));
        }
        state
            .grants
            .entry(name.to_string())
            .or_default()
            .push(application.to_string());
        state.calls.push(MockCall::GrantSecret {
            name: name.to_string(),
            application: application.to_string(),
        });
        Ok(())
    }

    async fn get_secret(&self, name: &str) -> Result<BTreeMap<String, String>, JujuError> {
        self.plane
            .lock()
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| JujuError::SecretNotFound(name.to_string()))
    }

    async fn remove_secret(&self, name: &str) -> Result<(), JujuError> {
        let mut state = self.plane.lock();
        if state.secrets.remove(name).is_none() {
            return Err(JujuError::SecretNotFound(name.to_string()));
        }
        state.calls.push(MockCall::RemoveSecret(name.to_string()));
        Ok(())
    }
}
