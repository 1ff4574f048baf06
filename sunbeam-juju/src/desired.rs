//! Desired-status evaluation.
//!
//! A pure check of one application's status against a [`DesiredStatus`].
//! Convergence is all-or-nothing: one unit outside the accepted set fails the
//! whole application.

use crate::status::ApplicationStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Accepted statuses for an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredStatus {
    /// Accepted workload statuses.
    pub workload: BTreeSet<String>,
    /// Accepted agent statuses; unconstrained when `None`.
    pub agent: Option<BTreeSet<String>>,
    /// Accepted non-empty workload messages; unconstrained when `None`.
    pub messages: Option<BTreeSet<String>>,
}

impl Default for DesiredStatus {
    fn default() -> Self {
        Self::workload(["active"])
    }
}

impl DesiredStatus {
    pub fn workload<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            workload: statuses.into_iter().map(Into::into).collect(),
            agent: None,
            messages: None,
        }
    }

    #[must_use]
    pub fn with_agent<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent = Some(statuses.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.messages = Some(messages.into_iter().map(Into::into).collect());
        self
    }
}

/// Outcome of evaluating one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Satisfied,
    /// Not converged yet, with the first reason found.
    Pending(String),
}

impl Verdict {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Evaluate `application` against `desired`.
///
/// `units` restricts the check to the named units; `None` or an empty slice
/// means every unit of the application.
pub fn evaluate(
    application: &ApplicationStatus,
    units: Option<&[String]>,
    desired: &DesiredStatus,
) -> Verdict {
    if application.is_subordinate() {
        return match &application.status {
            Some(status) if desired.workload.contains(&status.current) => Verdict::Satisfied,
            Some(status) => Verdict::Pending(format!(
                "subordinate {} is {}",
                application.name, status.current
            )),
            None => Verdict::Pending(format!("subordinate {} has no status", application.name)),
        };
    }

    let units = units.filter(|u| !u.is_empty());
    let selected: Vec<_> = application
        .units
        .iter()
        .filter(|(name, _)| units.is_none_or(|wanted| wanted.contains(name)))
        .collect();

    let expected = match units {
        Some(wanted) => Some(wanted.iter().collect::<BTreeSet<_>>().len()),
        None => application.scale,
    };
    if let Some(expected) = expected
        && selected.len() != expected
    {
        return Verdict::Pending(format!(
            "{} has {} of {} units",
            application.name,
            selected.len(),
            expected
        ));
    }

    let mut workload = BTreeSet::new();
    let mut agent = BTreeSet::new();
    let mut messages = BTreeSet::new();
    for (_, unit) in &selected {
        if let Some(status) = &unit.workload {
            workload.insert(status.current.as_str());
            if let Some(message) = status.non_empty_message() {
                messages.insert(message);
            }
        }
        if let Some(status) = &unit.agent {
            agent.insert(status.current.as_str());
        }
    }

    if workload.is_empty() {
        return Verdict::Pending(format!("{} has no workload status", application.name));
    }
    if let Some(outlier) = workload.iter().find(|s| !desired.workload.contains(**s)) {
        return Verdict::Pending(format!("{} workload is {outlier}", application.name));
    }
    if let Some(accepted) = &desired.agent
        && let Some(outlier) = agent.iter().find(|s| !accepted.contains(**s))
    {
        return Verdict::Pending(format!("{} agent is {outlier}", application.name));
    }
    if let Some(accepted) = &desired.messages
        && let Some(outlier) = messages.iter().find(|m| !accepted.contains(**m))
    {
        return Verdict::Pending(format!("{} reports {outlier:?}", application.name));
    }
    Verdict::Satisfied
}

/// Whether `application` has reached `desired`.
pub fn is_desired_status_achieved(
    application: &ApplicationStatus,
    units: Option<&[String]>,
    desired: &DesiredStatus,
) -> bool {
    evaluate(application, units, desired).is_satisfied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{StatusInfo, UnitStatus};
    use proptest::prelude::*;

    fn k8s() -> ApplicationStatus {
        ApplicationStatus::new("k8s")
            .with_status("active")
            .with_scale(1)
            .with_unit("k8s/0", UnitStatus::new("active", "idle"))
    }

    #[test]
    fn test_single_active_unit_is_satisfied() {
        assert!(is_desired_status_achieved(
            &k8s(),
            None,
            &DesiredStatus::default()
        ));
    }

    #[test]
    fn test_one_blocked_unit_fails_application() {
        let app = ApplicationStatus::new("k8s")
            .with_status("active")
            .with_scale(2)
            .with_unit("k8s/0", UnitStatus::new("active", "idle"))
            .with_unit("k8s/1", UnitStatus::new("blocked", "idle"));
        let verdict = evaluate(&app, None, &DesiredStatus::default());
        assert_eq!(verdict, Verdict::Pending("k8s workload is blocked".into()));
    }

    #[test]
    fn test_scale_mismatch_is_pending() {
        let app = k8s().with_scale(3);
        assert!(!is_desired_status_achieved(&app, None, &DesiredStatus::default()));
    }

    #[test]
    fn test_unknown_scale_skips_count_check() {
        let mut app = k8s();
        app.scale = None;
        assert!(is_desired_status_achieved(&app, None, &DesiredStatus::default()));
    }

    #[test]
    fn test_no_units_is_pending() {
        let app = ApplicationStatus::new("mysql").with_status("active");
        assert!(!is_desired_status_achieved(&app, None, &DesiredStatus::default()));
    }

    #[test]
    fn test_unit_subset_counts_named_units() {
        let app = ApplicationStatus::new("nova")
            .with_scale(3)
            .with_unit("nova/0", UnitStatus::new("active", "idle"))
            .with_unit("nova/1", UnitStatus::new("blocked", "idle"))
            .with_unit("nova/2", UnitStatus::new("active", "idle"));
        let subset = ["nova/0".to_string(), "nova/2".to_string()];
        assert!(is_desired_status_achieved(
            &app,
            Some(&subset),
            &DesiredStatus::default()
        ));

        let missing = ["nova/0".to_string(), "nova/7".to_string()];
        assert!(!is_desired_status_achieved(
            &app,
            Some(&missing),
            &DesiredStatus::default()
        ));
    }

    #[test]
    fn test_repeated_unit_in_subset_counts_once() {
        let app = ApplicationStatus::new("nova")
            .with_scale(2)
            .with_unit("nova/0", UnitStatus::new("active", "idle"))
            .with_unit("nova/1", UnitStatus::new("blocked", "idle"));
        let subset = ["nova/0".to_string(), "nova/0".to_string()];
        assert!(is_desired_status_achieved(
            &app,
            Some(&subset),
            &DesiredStatus::default()
        ));
    }

    #[test]
    fn test_empty_unit_subset_means_all_units() {
        assert!(is_desired_status_achieved(
            &k8s(),
            Some(&[]),
            &DesiredStatus::default()
        ));
    }

    #[test]
    fn test_agent_constraint() {
        let app = ApplicationStatus::new("k8s")
            .with_unit("k8s/0", UnitStatus::new("active", "executing"));
        let desired = DesiredStatus::default().with_agent(["idle"]);
        assert!(!is_desired_status_achieved(&app, None, &desired));
        assert!(is_desired_status_achieved(&app, None, &DesiredStatus::default()));
    }

    #[test]
    fn test_message_constraint_ignores_empty_messages() {
        let app = ApplicationStatus::new("cinder")
            .with_unit(
                "cinder/0",
                UnitStatus::new("blocked", "idle").with_message("(ceph) integration missing"),
            )
            .with_unit(
                "cinder/1",
                UnitStatus::new("blocked", "idle").with_message(""),
            );
        let desired = DesiredStatus::workload(["blocked"])
            .with_messages(["(ceph) integration missing"]);
        assert!(is_desired_status_achieved(&app, None, &desired));

        let other = DesiredStatus::workload(["blocked"]).with_messages(["ready"]);
        assert!(!is_desired_status_achieved(&app, None, &other));
    }

    #[test]
    fn test_subordinate_uses_application_status_only() {
        let app = ApplicationStatus::new("ovn-chassis")
            .subordinate_of("openstack-hypervisor")
            .with_status("active")
            .with_scale(5);
        let desired = DesiredStatus::default().with_agent(["idle"]);
        assert!(is_desired_status_achieved(&app, None, &desired));

        let mut waiting = app.clone();
        waiting.status = Some(StatusInfo::new("waiting"));
        assert!(!is_desired_status_achieved(&waiting, None, &desired));
    }

    fn status_strategy() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("active"),
            Just("blocked"),
            Just("waiting"),
            Just("maintenance"),
            Just("error"),
        ]
    }

    fn application_strategy() -> impl Strategy<Value = ApplicationStatus> {
        (
            prop::collection::vec((status_strategy(), status_strategy()), 0..6),
            prop::option::of(0usize..7),
        )
            .prop_map(|(units, scale)| {
                let mut app = ApplicationStatus::new("app");
                app.scale = scale;
                for (idx, (workload, agent)) in units.into_iter().enumerate() {
                    app = app.with_unit(format!("app/{idx}"), UnitStatus::new(workload, agent));
                }
                app
            })
    }

    proptest! {
        #[test]
        fn prop_evaluation_is_deterministic(app in application_strategy()) {
            let desired = DesiredStatus::workload(["active", "blocked"]);
            let before = app.clone();
            let first = evaluate(&app, None, &desired);
            let second = evaluate(&app, None, &desired);
            prop_assert_eq!(first, second);
            prop_assert_eq!(app, before);
        }

        #[test]
        fn prop_any_unit_outside_accepted_set_fails(
            app in application_strategy(),
            accepted in prop::collection::btree_set(status_strategy(), 1..4),
        ) {
            let desired = DesiredStatus::workload(accepted.iter().copied());
            let outlier = app.units.values().any(|u| {
                u.workload.as_ref().is_some_and(|s| !accepted.contains(s.current.as_str()))
            });
            if outlier {
                prop_assert!(!is_desired_status_achieved(&app, None, &desired));
            }
        }

        #[test]
        fn prop_scale_mismatch_fails(app in application_strategy()) {
            if let Some(scale) = app.scale {
                if scale != app.units.len() {
                    let everything = DesiredStatus::workload(
                        ["active", "blocked", "waiting", "maintenance", "error"],
                    );
                    prop_assert!(!is_desired_status_achieved(&app, None, &everything));
                }
            }
        }

        #[test]
        fn prop_subordinate_ignores_units_and_agent(
            app in application_strategy(),
            status in status_strategy(),
        ) {
            let mut sub = app.clone();
            sub.units.clear();
            sub.subordinate_to = vec!["principal".into()];
            sub.status = Some(StatusInfo::new(status));
            let desired = DesiredStatus::workload([status]).with_agent(["never"]);
            prop_assert!(is_desired_status_achieved(&sub, None, &desired));
        }
    }
}
