//! Status snapshots of a Juju model.
//!
//! A [`StatusSnapshot`] is an immutable point-in-time view of one model. It is
//! built either from the `juju status --format json` document, validated at
//! the parse boundary, or programmatically through the builder methods.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use sunbeam_common::JujuError;
use sunbeam_common::types::{UnitName, unit_belongs_to};

/// A status value with its optional human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub current: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusInfo {
    pub fn new(current: impl Into<String>) -> Self {
        Self {
            current: current.into(),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Message, if present and non-empty.
    pub fn non_empty_message(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.is_empty())
    }
}

/// Status of one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub workload: Option<StatusInfo>,
    pub agent: Option<StatusInfo>,
    pub leader: bool,
    pub machine: Option<String>,
}

impl UnitStatus {
    pub fn new(workload: &str, agent: &str) -> Self {
        Self {
            workload: Some(StatusInfo::new(workload)),
            agent: Some(StatusInfo::new(agent)),
            leader: false,
            machine: None,
        }
    }

    #[must_use]
    pub fn leader(mut self) -> Self {
        self.leader = true;
        self
    }

    #[must_use]
    pub fn on_machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = Some(machine.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        if let Some(workload) = self.workload.take() {
            self.workload = Some(workload.with_message(message));
        }
        self
    }
}

/// Status of one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    pub name: String,
    /// Application-level workload status.
    pub status: Option<StatusInfo>,
    pub units: BTreeMap<String, UnitStatus>,
    /// Principals this application is subordinate to.
    pub subordinate_to: Vec<String>,
    /// Expected unit count, when the model reports one.
    pub scale: Option<usize>,
    pub charm_channel: Option<String>,
}

impl ApplicationStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: None,
            units: BTreeMap::new(),
            subordinate_to: Vec::new(),
            scale: None,
            charm_channel: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, current: &str) -> Self {
        self.status = Some(StatusInfo::new(current));
        self
    }

    #[must_use]
    pub fn with_scale(mut self, scale: usize) -> Self {
        self.scale = Some(scale);
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>, status: UnitStatus) -> Self {
        self.units.insert(unit.into(), status);
        self
    }

    #[must_use]
    pub fn subordinate_of(mut self, principal: impl Into<String>) -> Self {
        self.subordinate_to.push(principal.into());
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.charm_channel = Some(channel.into());
        self
    }

    /// Subordinates are judged on their application-level status.
    pub fn is_subordinate(&self) -> bool {
        !self.subordinate_to.is_empty()
    }

    /// Name of the leader unit, if one is elected.
    pub fn leader(&self) -> Option<&str> {
        self.units
            .iter()
            .find(|(_, unit)| unit.leader)
            .map(|(name, _)| name.as_str())
    }
}

/// Status of one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStatus {
    pub id: String,
    /// Machine agent status.
    pub agent: Option<StatusInfo>,
    /// Provider instance status; MAAS reports `Deployed` here once provisioned.
    pub instance: Option<StatusInfo>,
}

impl MachineStatus {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent: None,
            instance: None,
        }
    }

    #[must_use]
    pub fn with_instance(mut self, current: &str, message: &str) -> Self {
        self.instance = Some(StatusInfo::new(current).with_message(message));
        self
    }

    /// Instance status message, empty when absent.
    pub fn status_message(&self) -> &str {
        self.instance
            .as_ref()
            .and_then(|s| s.message.as_deref())
            .unwrap_or_default()
    }
}

/// Immutable point-in-time view of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub model: String,
    pub applications: BTreeMap<String, ApplicationStatus>,
    pub machines: BTreeMap<String, MachineStatus>,
}

impl StatusSnapshot {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            applications: BTreeMap::new(),
            machines: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_application(mut self, application: ApplicationStatus) -> Self {
        self.applications
            .insert(application.name.clone(), application);
        self
    }

    #[must_use]
    pub fn with_machine(mut self, machine: MachineStatus) -> Self {
        self.machines.insert(machine.id.clone(), machine);
        self
    }

    pub fn application(&self, name: &str) -> Option<&ApplicationStatus> {
        self.applications.get(name)
    }

    /// Look up a unit across all applications.
    pub fn unit(&self, name: &str) -> Option<&UnitStatus> {
        let app = sunbeam_common::application_of_unit(name)?;
        self.applications.get(app)?.units.get(name)
    }

    pub fn application_names(&self) -> Vec<String> {
        self.applications.keys().cloned().collect()
    }

    /// Restrict the snapshot to `applications`; an empty filter keeps everything.
    pub fn filtered(&self, applications: &[String]) -> StatusSnapshot {
        if applications.is_empty() {
            return self.clone();
        }
        StatusSnapshot {
            model: self.model.clone(),
            applications: self
                .applications
                .iter()
                .filter(|(name, _)| applications.contains(name))
                .map(|(name, app)| (name.clone(), app.clone()))
                .collect(),
            machines: self.machines.clone(),
        }
    }

    /// Parse and validate a `juju status --format json` document.
    pub fn from_juju_json(model: &str, json: &str) -> Result<Self, JujuError> {
        let raw: RawStatus = serde_json::from_str(json).map_err(|e| JujuError::InvalidStatus {
            model: model.to_string(),
            reason: e.to_string(),
        })?;
        raw.validate(model)
    }
}

// ── Raw `juju status` payload ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(default)]
    applications: BTreeMap<String, RawApplication>,
    #[serde(default)]
    machines: BTreeMap<String, RawMachine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawApplication {
    #[serde(default)]
    application_status: Option<StatusInfo>,
    #[serde(default)]
    units: BTreeMap<String, RawUnit>,
    #[serde(default)]
    subordinate_to: Vec<String>,
    #[serde(default)]
    scale: Option<usize>,
    #[serde(default)]
    charm_channel: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawUnit {
    #[serde(default)]
    workload_status: Option<StatusInfo>,
    #[serde(default)]
    juju_status: Option<StatusInfo>,
    #[serde(default)]
    leader: bool,
    #[serde(default)]
    machine: Option<String>,
    /// Subordinate units riding on this unit.
    #[serde(default)]
    subordinates: BTreeMap<String, RawUnit>,
}

impl RawUnit {
    fn into_status(self, machine: Option<String>) -> UnitStatus {
        UnitStatus {
            workload: self.workload_status,
            agent: self.juju_status,
            leader: self.leader,
            machine: self.machine.or(machine),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawMachine {
    #[serde(default)]
    juju_status: Option<StatusInfo>,
    #[serde(default)]
    machine_status: Option<StatusInfo>,
}

impl RawStatus {
    fn validate(self, model: &str) -> Result<StatusSnapshot, JujuError> {
        let invalid = |reason: String| JujuError::InvalidStatus {
            model: model.to_string(),
            reason,
        };

        let mut snapshot = StatusSnapshot::new(model);
        let mut subordinate_units: Vec<(String, UnitStatus)> = Vec::new();
        for (name, raw) in self.applications {
            if !raw.subordinate_to.is_empty() && !raw.units.is_empty() {
                return Err(invalid(format!(
                    "subordinate application {name:?} reports units of its own"
                )));
            }
            let mut units = BTreeMap::new();
            for (unit_name, mut unit) in raw.units {
                let parsed = UnitName::parse(&unit_name)
                    .map_err(|_| invalid(format!("malformed unit name {unit_name:?}")))?;
                if !unit_belongs_to(parsed.as_str(), &name) {
                    return Err(invalid(format!(
                        "unit {unit_name:?} listed under application {name:?}"
                    )));
                }
                for (sub_name, sub) in std::mem::take(&mut unit.subordinates) {
                    UnitName::parse(&sub_name)
                        .map_err(|_| invalid(format!("malformed unit name {sub_name:?}")))?;
                    subordinate_units.push((sub_name, sub.into_status(unit.machine.clone())));
                }
                units.insert(unit_name, unit.into_status(None));
            }
            snapshot.applications.insert(
                name.clone(),
                ApplicationStatus {
                    name,
                    status: raw.application_status,
                    units,
                    subordinate_to: raw.subordinate_to,
                    scale: raw.scale,
                    charm_channel: raw.charm_channel,
                },
            );
        }
        // A filtered status can list subordinate units without their application.
        for (unit_name, unit) in subordinate_units {
            if let Some(owner) = sunbeam_common::application_of_unit(&unit_name)
                .and_then(|app| snapshot.applications.get_mut(app))
                .filter(|app| app.is_subordinate())
            {
                owner.units.insert(unit_name, unit);
            }
        }
        for (id, raw) in self.machines {
            snapshot.machines.insert(
                id.clone(),
                MachineStatus {
                    id,
                    agent: raw.juju_status,
                    instance: raw.machine_status,
                },
            );
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_JSON: &str = r#"{
        "model": {"name": "openstack", "type": "caas"},
        "machines": {
            "0": {
                "juju-status": {"current": "started"},
                "machine-status": {"current": "running", "message": "Deployed"}
            }
        },
        "applications": {
            "keystone": {
                "charm-channel": "2024.1/stable",
                "scale": 2,
                "application-status": {"current": "active", "message": ""},
                "units": {
                    "keystone/0": {
                        "workload-status": {"current": "active"},
                        "juju-status": {"current": "idle"},
                        "leader": true,
                        "machine": "0"
                    },
                    "keystone/1": {
                        "workload-status": {"current": "waiting", "message": "db not ready"},
                        "juju-status": {"current": "executing"}
                    }
                }
            },
            "ovn-chassis": {
                "application-status": {"current": "active"},
                "subordinate-to": ["openstack-hypervisor"]
            }
        }
    }"#;

    #[test]
    fn test_from_juju_json_parses_applications() {
        let snapshot = StatusSnapshot::from_juju_json("openstack", STATUS_JSON).unwrap();
        assert_eq!(snapshot.model, "openstack");
        let keystone = snapshot.application("keystone").unwrap();
        assert_eq!(keystone.scale, Some(2));
        assert_eq!(keystone.charm_channel.as_deref(), Some("2024.1/stable"));
        assert_eq!(keystone.leader(), Some("keystone/0"));
        let unit = &keystone.units["keystone/1"];
        assert_eq!(unit.workload.as_ref().unwrap().current, "waiting");
        assert_eq!(
            unit.workload.as_ref().unwrap().non_empty_message(),
            Some("db not ready")
        );
        assert_eq!(unit.agent.as_ref().unwrap().current, "executing");
        assert!(snapshot.application("ovn-chassis").unwrap().is_subordinate());
        assert_eq!(snapshot.machines["0"].status_message(), "Deployed");
    }

    #[test]
    fn test_from_juju_json_lifts_nested_subordinate_units() {
        let json = r#"{"applications": {
            "nova": {"scale": 1, "units": {"nova/0": {
                "workload-status": {"current": "active"},
                "juju-status": {"current": "idle"},
                "machine": "3",
                "subordinates": {"ovn-chassis/0": {
                    "workload-status": {"current": "waiting"},
                    "juju-status": {"current": "executing"}
                }}
            }}},
            "ovn-chassis": {
                "application-status": {"current": "waiting"},
                "subordinate-to": ["nova"]
            }
        }}"#;
        let snapshot = StatusSnapshot::from_juju_json("openstack", json).unwrap();
        let unit = snapshot.unit("ovn-chassis/0").unwrap();
        assert_eq!(unit.workload.as_ref().unwrap().current, "waiting");
        assert_eq!(unit.machine.as_deref(), Some("3"));
        assert!(snapshot.application("nova").unwrap().units.contains_key("nova/0"));
        assert!(!snapshot.application("nova").unwrap().units.contains_key("ovn-chassis/0"));
    }

    #[test]
    fn test_from_juju_json_skips_subordinates_outside_filter() {
        let json = r#"{"applications": {"nova": {"units": {"nova/0": {
            "subordinates": {"ovn-chassis/0": {}}
        }}}}}"#;
        let snapshot = StatusSnapshot::from_juju_json("openstack", json).unwrap();
        assert!(snapshot.unit("ovn-chassis/0").is_none());
        assert!(snapshot.unit("nova/0").is_some());
    }

    #[test]
    fn test_from_juju_json_rejects_foreign_unit() {
        let json = r#"{"applications": {"mysql": {"units": {"keystone/0": {}}}}}"#;
        let err = StatusSnapshot::from_juju_json("m", json).unwrap_err();
        assert!(matches!(err, JujuError::InvalidStatus { ref reason, .. } if reason.contains("keystone/0")));
    }

    #[test]
    fn test_from_juju_json_rejects_malformed_unit() {
        let json = r#"{"applications": {"mysql": {"units": {"mysql": {}}}}}"#;
        assert!(matches!(
            StatusSnapshot::from_juju_json("m", json),
            Err(JujuError::InvalidStatus { .. })
        ));
    }

    #[test]
    fn test_from_juju_json_rejects_subordinate_with_units() {
        let json = r#"{"applications": {"ovn-chassis": {
            "subordinate-to": ["nova"],
            "units": {"ovn-chassis/0": {}}
        }}}"#;
        assert!(matches!(
            StatusSnapshot::from_juju_json("m", json),
            Err(JujuError::InvalidStatus { .. })
        ));
    }

    #[test]
    fn test_from_juju_json_rejects_garbage() {
        let err = StatusSnapshot::from_juju_json("m", "not json").unwrap_err();
        assert_eq!(err.code().code_string(), "SB-E206");
    }

    #[test]
    fn test_filtered_keeps_requested_applications() {
        let snapshot = StatusSnapshot::from_juju_json("openstack", STATUS_JSON).unwrap();
        let filtered = snapshot.filtered(&["keystone".to_string(), "absent".to_string()]);
        assert_eq!(filtered.application_names(), vec!["keystone".to_string()]);
        assert_eq!(snapshot.filtered(&[]), snapshot);
    }

    #[test]
    fn test_unit_lookup() {
        let snapshot = StatusSnapshot::new("m").with_application(
            ApplicationStatus::new("mysql").with_unit("mysql/0", UnitStatus::new("active", "idle")),
        );
        assert!(snapshot.unit("mysql/0").is_some());
        assert!(snapshot.unit("mysql/1").is_none());
        assert!(snapshot.unit("mysql").is_none());
    }
}
