//! Controller and model connections.
//!
//! [`Controller`] and [`ModelConnection`] are the seams to the Juju control
//! plane. [`ConnectionManager`] owns one controller and a registry of open
//! model connections, each handed out as a [`ModelHandle`] guard that is
//! always disconnected, either by [`ModelHandle::release`] or on drop.

use crate::status::StatusSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use sunbeam_common::JujuError;
use sunbeam_common::types::{Endpoint, UnitName};
use tracing::{debug, info, warn};

/// Liveness of a controller or model connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Alive,
    /// The transport is gone.
    SocketClosed,
    /// The transport is up but the login session is no longer valid.
    SessionExpired,
}

impl Liveness {
    pub fn is_alive(self) -> bool {
        self == Self::Alive
    }
}

// ── Requests and results ───────────────────────────────────────────────────

/// Parameters for deploying a charm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub application: String,
    pub charm: String,
    pub channel: Option<String>,
    pub revision: Option<u32>,
    pub base: Option<String>,
    /// Machine placements; one unit is deployed per placement.
    pub to: Vec<String>,
    pub num_units: usize,
    pub config: BTreeMap<String, String>,
    pub trust: bool,
}

impl DeployRequest {
    pub fn new(application: impl Into<String>, charm: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            charm: charm.into(),
            num_units: 1,
            ..Self::default()
        }
    }
}

/// Parameters for adding a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRequest {
    /// Placement directive, e.g. `ssh:ubuntu@10.0.0.4` or a MAAS hostname.
    pub placement: Option<String>,
    pub base: Option<String>,
    pub constraints: Option<String>,
}

/// Result of running an action on a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub status: String,
    #[serde(default)]
    pub results: serde_json::Value,
}

impl ActionOutcome {
    pub fn completed(results: serde_json::Value) -> Self {
        Self {
            status: "completed".to_string(),
            results,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

// ── Control plane seams ────────────────────────────────────────────────────

/// Controller-level connection.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Controller name, used in error messages.
    fn name(&self) -> &str;

    /// Non-blocking liveness check.
    fn liveness(&self) -> Liveness;

    /// Re-establish the controller connection.
    async fn reconnect(&self) -> Result<(), JujuError>;

    /// Open a connection to `model`.
    async fn open_model(&self, model: &str) -> Result<Arc<dyn ModelConnection>, JujuError>;

    async fn list_models(&self) -> Result<Vec<String>, JujuError>;

    async fn disconnect(&self);
}

/// Connection to one model.
#[async_trait]
pub trait ModelConnection: Send + Sync {
    fn model(&self) -> &str;

    /// Non-blocking liveness check.
    fn liveness(&self) -> Liveness;

    /// Fetch a status snapshot; an empty filter returns every application.
    async fn get_status(&self, filter: &[String]) -> Result<StatusSnapshot, JujuError>;

    async fn disconnect(&self);

    async fn deploy(&self, request: &DeployRequest) -> Result<(), JujuError>;

    async fn add_unit(
        &self,
        application: &str,
        count: usize,
        placements: &[String],
    ) -> Result<(), JujuError>;

    async fn remove_unit(&self, unit: &UnitName) -> Result<(), JujuError>;

    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ActionOutcome, JujuError>;

    async fn integrate(&self, provider: &Endpoint, requirer: &Endpoint) -> Result<(), JujuError>;

    async fn remove_relation(&self, first: &Endpoint, second: &Endpoint) -> Result<(), JujuError>;

    /// Add a machine, returning its id.
    async fn add_machine(&self, request: &MachineRequest) -> Result<String, JujuError>;

    async fn set_config(
        &self,
        application: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<(), JujuError>;

    /// Create a secret, returning its URI.
    async fn add_secret(
        &self,
        name: &str,
        data: &BTreeMap<String, String>,
        info: Option<&str>,
    ) -> Result<String, JujuError>;

    async fn grant_secret(&self, name: &str, application: &str) -> Result<(), JujuError>;

    async fn get_secret(&self, name: &str) -> Result<BTreeMap<String, String>, JujuError>;

    async fn remove_secret(&self, name: &str) -> Result<(), JujuError>;
}

// ── Connection manager ─────────────────────────────────────────────────────

type Registry = Mutex<HashMap<u64, Arc<dyn ModelConnection>>>;

fn lock_registry(
    registry: &Registry,
) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<dyn ModelConnection>>> {
    registry
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Owns the controller connection and every open model connection.
pub struct ConnectionManager {
    controller: Arc<dyn Controller>,
    registry: Arc<Registry>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(controller: Arc<dyn Controller>) -> Self {
        Self {
            controller,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    pub fn controller_liveness(&self) -> Liveness {
        self.controller.liveness()
    }

    /// Number of model connections currently open.
    pub fn open_connections(&self) -> usize {
        lock_registry(&self.registry).len()
    }

    /// Whether the model behind `handle` is usable.
    pub fn is_connected(&self, handle: &ModelHandle) -> bool {
        handle.liveness().is_alive()
    }

    /// Reconnect the controller unless it is already alive.
    pub async fn reconnect_controller(&self) -> Result<(), JujuError> {
        if self.controller.liveness().is_alive() {
            return Ok(());
        }
        info!("Reconnecting to controller {}", self.controller.name());
        self.controller
            .reconnect()
            .await
            .map_err(|err| JujuError::ControllerNotReachable {
                controller: self.controller.name().to_string(),
                reason: err.to_string(),
            })
    }

    /// Open and register a model connection.
    pub async fn open_model(&self, model: &str) -> Result<ModelHandle, JujuError> {
        let connection = self.controller.open_model(model).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock_registry(&self.registry).insert(id, connection.clone());
        debug!("Opened connection {} to model {}", id, model);
        Ok(ModelHandle {
            id,
            model: model.to_string(),
            connection: Some(connection),
            registry: Arc::clone(&self.registry),
        })
    }

    /// Replace a dead model connection; a live one is left alone.
    ///
    /// The stale connection is disconnected before it is replaced, whether
    /// its socket closed or its session expired.
    pub async fn reopen_model(&self, handle: &mut ModelHandle) -> Result<(), JujuError> {
        let liveness = handle.liveness();
        if liveness.is_alive() {
            return Ok(());
        }
        if let Some(old) = handle.connection.as_ref() {
            debug!(
                "Disconnecting stale connection to model {} ({:?})",
                handle.model, liveness
            );
            old.disconnect().await;
        }
        let fresh = self.controller.open_model(&handle.model).await?;
        lock_registry(&self.registry).insert(handle.id, fresh.clone());
        handle.connection = Some(fresh);
        info!("Reconnected to model {}", handle.model);
        Ok(())
    }

    /// Disconnect every registered model, then the controller.
    pub async fn disconnect_all(&self) {
        let connections: Vec<_> = lock_registry(&self.registry)
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        for connection in connections {
            connection.disconnect().await;
        }
        self.controller.disconnect().await;
    }
}

/// A registered model connection.
///
/// Release with [`ModelHandle::release`]; a dropped handle unregisters itself
/// and disconnects on the current runtime.
pub struct ModelHandle {
    id: u64,
    model: String,
    connection: Option<Arc<dyn ModelConnection>>,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ModelHandle {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn liveness(&self) -> Liveness {
        self.connection
            .as_ref()
            .map_or(Liveness::SocketClosed, |conn| conn.liveness())
    }

    /// The underlying connection.
    pub fn connection(&self) -> Result<&Arc<dyn ModelConnection>, JujuError> {
        self.connection
            .as_ref()
            .ok_or_else(|| JujuError::ConnectionClosed(format!("model {} released", self.model)))
    }

    /// Unregister and disconnect.
    ///
    /// A handle already closed by [`ConnectionManager::disconnect_all`] is
    /// not disconnected twice.
    pub async fn release(mut self) {
        let registered = lock_registry(&self.registry).remove(&self.id).is_some();
        if let Some(connection) = self.connection.take()
            && registered
        {
            connection.disconnect().await;
            debug!("Released connection {} to model {}", self.id, self.model);
        }
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if lock_registry(&self.registry).remove(&self.id).is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { connection.disconnect().await });
            }
            Err(_) => warn!(
                "Model handle for {} dropped outside a runtime; connection not closed",
                self.model
            ),
        }
    }
}
