//! Wait commands.

use anyhow::Result;
use colored::Colorize;
use std::time::{Duration, Instant};
use sunbeam_juju::WaitSpec;
use tokio::sync::mpsc;
use tracing::debug;

use super::Context;
use super::helpers::humanize_duration;

/// Arguments of `sunbeam wait`.
#[derive(Debug, Clone, Default)]
pub struct WaitRequest {
    pub apps: Vec<String>,
    pub units: Vec<String>,
    pub statuses: Vec<String>,
    pub agent_statuses: Vec<String>,
    pub messages: Vec<String>,
    pub timeout: Option<Duration>,
}

impl WaitRequest {
    /// Empty flag lists leave the corresponding default in place.
    fn into_spec(self) -> WaitSpec {
        let mut spec = WaitSpec::new(self.apps);
        if !self.units.is_empty() {
            spec = spec.units(self.units);
        }
        if !self.statuses.is_empty() {
            spec = spec.status(self.statuses);
        }
        if !self.agent_statuses.is_empty() {
            spec = spec.agent_status(self.agent_statuses);
        }
        if !self.messages.is_empty() {
            spec = spec.messages(self.messages);
        }
        if let Some(timeout) = self.timeout {
            spec = spec.timeout(timeout);
        }
        spec
    }
}

pub async fn desired(context: &Context, model: &str, request: WaitRequest) -> Result<()> {
    let started = Instant::now();
    let apps = request.apps.join(", ");
    context
        .helper
        .wait_until_desired_status(model, request.into_spec())
        .await?;
    done(&format!("{apps} reached the desired status"), started);
    Ok(())
}

/// Wait for `apps`, or every application of `model`, to be active, reporting
/// each one as it settles.
pub async fn active(
    context: &Context,
    model: &str,
    apps: Vec<String>,
    timeout: Option<Duration>,
) -> Result<()> {
    let started = Instant::now();
    let apps = if apps.is_empty() {
        context.helper.get_application_names(model).await?
    } else {
        apps
    };
    debug!("Waiting for {} applications of {} to be active", apps.len(), model);

    let (tx, mut rx) = mpsc::channel(apps.len().max(1));
    let printer = tokio::spawn(async move {
        while let Some(app) = rx.recv().await {
            println!("  {} {} active", "✔".green(), app);
        }
    });
    let outcome = context
        .helper
        .wait_until_active(model, Some(apps), timeout, Some(tx))
        .await;
    // The sender went away with the spec, so the printer drains and stops.
    let _ = printer.await;
    outcome?;
    done(&format!("model {model} is active"), started);
    Ok(())
}

pub async fn units(
    context: &Context,
    model: &str,
    units: &[String],
    workload: &[String],
    agent: &[String],
    timeout: Option<Duration>,
) -> Result<()> {
    let started = Instant::now();
    context
        .helper
        .wait_units_ready(model, units, Some(agent), Some(workload), timeout)
        .await?;
    done(&format!("{} ready", units.join(", ")), started);
    Ok(())
}

pub async fn gone(
    context: &Context,
    model: &str,
    apps: &[String],
    units: &[String],
    timeout: Option<Duration>,
) -> Result<()> {
    let started = Instant::now();
    if apps.is_empty() {
        context.helper.wait_units_gone(model, units, timeout).await?;
        done(&format!("{} removed", units.join(", ")), started);
    } else {
        context
            .helper
            .wait_application_gone(model, apps, timeout)
            .await?;
        done(&format!("{} removed", apps.join(", ")), started);
    }
    Ok(())
}

pub async fn machines(context: &Context, model: &str, timeout: Option<Duration>) -> Result<()> {
    let started = Instant::now();
    context
        .helper
        .wait_all_machines_deployed(model, timeout)
        .await?;
    done(&format!("machines of {model} deployed"), started);
    Ok(())
}

fn done(what: &str, started: Instant) {
    println!(
        "{} {} ({})",
        "✔".green().bold(),
        what,
        humanize_duration(started.elapsed().as_secs())
    );
}
