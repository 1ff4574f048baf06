//! Control plane backed by the `juju` command-line client.
//!
//! Each operation runs one `juju` subcommand with JSON output and a bounded
//! runtime. Failures are classified from stderr: connection failures mark the
//! connection `SocketClosed` and surface as [`JujuError::ConnectionClosed`],
//! so the status updater retries them after a reconnect.

use crate::connection::{
    ActionOutcome, Controller, DeployRequest, Liveness, MachineRequest, ModelConnection,
};
use crate::status::StatusSnapshot;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use sunbeam_common::JujuError;
use sunbeam_common::config::JujuSettings;
use sunbeam_common::types::{Endpoint, UnitName};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

const CONNECTION_FAILURES: &[&str] = &[
    "connection refused",
    "cannot connect",
    "unable to connect",
    "connection is shut down",
    "connection reset",
    "no route to host",
    "i/o timeout",
];

const SESSION_FAILURES: &[&str] = &[
    "cannot log into controller",
    "please enter password",
    "login failed",
    "macaroon discharge required",
];

// ── Command runner ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct LivenessCell(Arc<Mutex<Liveness>>);

impl LivenessCell {
    fn new(liveness: Liveness) -> Self {
        Self(Arc::new(Mutex::new(liveness)))
    }

    fn get(&self) -> Liveness {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, liveness: Liveness) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = liveness;
    }
}

/// Captured output of a successful command.
#[derive(Debug)]
struct CommandOutput {
    stdout: String,
    stderr: String,
}

#[derive(Clone)]
struct Runner {
    binary: PathBuf,
    command_timeout: Duration,
    liveness: LivenessCell,
}

impl Runner {
    async fn run(&self, args: Vec<String>) -> Result<CommandOutput, JujuError> {
        let command = format!("juju {}", args.join(" "));
        debug!("Running {}", command);

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(JujuError::CommandFailed {
                    command,
                    stderr: err.to_string(),
                });
            }
            Err(_) => {
                self.liveness.set(Liveness::SocketClosed);
                return Err(JujuError::ConnectionClosed(format!(
                    "`{command}` timed out after {:?}",
                    self.command_timeout
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            return Ok(CommandOutput { stdout, stderr });
        }
        let (liveness, error) = classify_failure(&command, &stderr);
        if let Some(liveness) = liveness {
            warn!("{} failed, marking connection {:?}", command, liveness);
            self.liveness.set(liveness);
        }
        Err(error)
    }
}

/// Map a failed command's stderr to a liveness change and an error.
fn classify_failure(command: &str, stderr: &str) -> (Option<Liveness>, JujuError) {
    let lower = stderr.to_lowercase();
    if CONNECTION_FAILURES.iter().any(|needle| lower.contains(needle)) {
        return (
            Some(Liveness::SocketClosed),
            JujuError::ConnectionClosed(stderr.to_string()),
        );
    }
    if SESSION_FAILURES.iter().any(|needle| lower.contains(needle)) {
        return (
            Some(Liveness::SessionExpired),
            JujuError::ConnectionClosed(stderr.to_string()),
        );
    }
    if lower.contains("model") && lower.contains("not found") {
        return (None, JujuError::ModelNotFound(model_from_stderr(stderr)));
    }
    (
        None,
        JujuError::CommandFailed {
            command: command.to_string(),
            stderr: stderr.to_string(),
        },
    )
}

fn model_from_stderr(stderr: &str) -> String {
    stderr
        .split('"')
        .nth(1)
        .unwrap_or(stderr)
        .to_string()
}

// ── Argument builders ──────────────────────────────────────────────────────

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn status_args(model: &str, filter: &[String]) -> Vec<String> {
    let mut out = args(["status", "-m", model, "--format", "json"]);
    out.extend(filter.iter().cloned());
    out
}

fn models_args(controller: Option<&str>) -> Vec<String> {
    let mut out = args(["models", "--format", "json"]);
    if let Some(controller) = controller {
        out.extend(args(["-c", controller]));
    }
    out
}

fn show_controller_args(controller: Option<&str>) -> Vec<String> {
    let mut out = args(["show-controller"]);
    out.extend(controller.map(str::to_string));
    out.extend(args(["--format", "json"]));
    out
}

fn show_model_args(model: &str) -> Vec<String> {
    args(["show-model", model, "--format", "json"])
}

fn deploy_args(model: &str, request: &DeployRequest) -> Vec<String> {
    let mut out = args(["deploy", "-m", model, &request.charm, &request.application]);
    if let Some(channel) = &request.channel {
        out.extend(args(["--channel", channel]));
    }
    if let Some(revision) = request.revision {
        out.extend(args(["--revision", &revision.to_string()]));
    }
    if let Some(base) = &request.base {
        out.extend(args(["--base", base]));
    }
    let units = if request.to.is_empty() {
        request.num_units
    } else {
        request.to.len()
    };
    out.extend(args(["-n", &units.to_string()]));
    if !request.to.is_empty() {
        out.extend(args(["--to", &request.to.join(",")]));
    }
    for (key, value) in &request.config {
        out.extend(args(["--config", &format!("{key}={value}")]));
    }
    if request.trust {
        out.push("--trust".to_string());
    }
    out
}

fn add_unit_args(model: &str, application: &str, count: usize, placements: &[String]) -> Vec<String> {
    let mut out = args(["add-unit", "-m", model, application, "-n", &count.to_string()]);
    if !placements.is_empty() {
        out.extend(args(["--to", &placements.join(",")]));
    }
    out
}

fn remove_unit_args(model: &str, unit: &UnitName) -> Vec<String> {
    args(["remove-unit", "-m", model, unit.as_str(), "--no-prompt"])
}

fn run_args(
    model: &str,
    unit: &str,
    action: &str,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Vec<String> {
    let mut out = args(["run", "-m", model, unit, action]);
    out.extend(params.iter().map(|(key, value)| match value {
        serde_json::Value::String(text) => format!("{key}={text}"),
        other => format!("{key}={other}"),
    }));
    out.extend(args(["--format", "json"]));
    out
}

fn integrate_args(model: &str, provider: &Endpoint, requirer: &Endpoint) -> Vec<String> {
    args([
        "integrate",
        "-m",
        model,
        &provider.to_string(),
        &requirer.to_string(),
    ])
}

fn remove_relation_args(model: &str, first: &Endpoint, second: &Endpoint) -> Vec<String> {
    args([
        "remove-relation",
        "-m",
        model,
        &first.to_string(),
        &second.to_string(),
    ])
}

fn add_machine_args(model: &str, request: &MachineRequest) -> Vec<String> {
    let mut out = args(["add-machine", "-m", model]);
    out.extend(request.placement.clone());
    if let Some(base) = &request.base {
        out.extend(args(["--base", base]));
    }
    if let Some(constraints) = &request.constraints {
        out.extend(args(["--constraints", constraints]));
    }
    out
}

fn config_args(model: &str, application: &str, config: &BTreeMap<String, String>) -> Vec<String> {
    let mut out = args(["config", "-m", model, application]);
    out.extend(config.iter().map(|(key, value)| format!("{key}={value}")));
    out
}

fn add_secret_args(
    model: &str,
    name: &str,
    data: &BTreeMap<String, String>,
    info: Option<&str>,
) -> Vec<String> {
    let mut out = args(["add-secret", "-m", model, name]);
    out.extend(data.iter().map(|(key, value)| format!("{key}={value}")));
    if let Some(info) = info {
        out.extend(args(["--info", info]));
    }
    out
}

fn grant_secret_args(model: &str, name: &str, application: &str) -> Vec<String> {
    args(["grant-secret", "-m", model, name, application])
}

fn show_secret_args(model: &str, name: &str) -> Vec<String> {
    args(["show-secret", "-m", model, name, "--reveal", "--format", "json"])
}

fn remove_secret_args(model: &str, name: &str) -> Vec<String> {
    args(["remove-secret", "-m", model, name])
}

// ── Output parsers ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ModelsOutput {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
    #[serde(rename = "short-name")]
    short_name: Option<String>,
}

fn api_error(context: &str, err: impl std::fmt::Display) -> JujuError {
    JujuError::Api(format!("unexpected {context} output: {err}"))
}

fn parse_models(stdout: &str) -> Result<Vec<String>, JujuError> {
    let parsed: ModelsOutput = serde_json::from_str(stdout).map_err(|e| api_error("models", e))?;
    Ok(parsed
        .models
        .into_iter()
        .map(|entry| match entry.short_name {
            Some(short) => short,
            None => entry
                .name
                .rsplit_once('/')
                .map_or(entry.name.clone(), |(_, short)| short.to_string()),
        })
        .collect())
}

#[derive(Deserialize)]
struct RunEntry {
    status: String,
    #[serde(default)]
    results: serde_json::Value,
}

fn parse_action(unit: &str, stdout: &str) -> Result<ActionOutcome, JujuError> {
    let mut parsed: BTreeMap<String, RunEntry> =
        serde_json::from_str(stdout).map_err(|e| api_error("run", e))?;
    let entry = parsed
        .remove(unit)
        .ok_or_else(|| api_error("run", format!("no result for {unit}")))?;
    Ok(ActionOutcome {
        status: entry.status,
        results: entry.results,
    })
}

/// Id of the machine announced by `add-machine`, e.g. `created machine 3`.
fn parse_created_machine(output: &CommandOutput) -> Result<String, JujuError> {
    [output.stdout.as_str(), output.stderr.as_str()]
        .iter()
        .flat_map(|text| text.lines())
        .find_map(|line| line.trim().strip_prefix("created machine "))
        .map(|id| id.trim().to_string())
        .ok_or_else(|| api_error("add-machine", output.stderr.trim()))
}

#[derive(Deserialize)]
struct SecretEntry {
    content: SecretContent,
}

#[derive(Deserialize)]
struct SecretContent {
    #[serde(rename = "Data", default)]
    data: BTreeMap<String, String>,
}

fn parse_secret(name: &str, stdout: &str) -> Result<BTreeMap<String, String>, JujuError> {
    let parsed: BTreeMap<String, SecretEntry> =
        serde_json::from_str(stdout).map_err(|e| api_error("show-secret", e))?;
    parsed
        .into_values()
        .next()
        .map(|entry| entry.content.data)
        .ok_or_else(|| JujuError::SecretNotFound(name.to_string()))
}

fn secret_error(name: &str, err: JujuError) -> JujuError {
    match err {
        JujuError::CommandFailed { ref stderr, .. } if stderr.contains("not found") => {
            JujuError::SecretNotFound(name.to_string())
        }
        other => other,
    }
}

// ── Controller ─────────────────────────────────────────────────────────────

/// Controller reached through the `juju` client.
pub struct JujuCli {
    name: String,
    controller: Option<String>,
    runner: Runner,
}

impl JujuCli {
    pub fn new(binary: impl Into<PathBuf>, controller: Option<String>, command_timeout: Duration) -> Self {
        Self {
            name: controller.clone().unwrap_or_else(|| "current".to_string()),
            controller,
            runner: Runner {
                binary: binary.into(),
                command_timeout,
                // Verified by the first reconnect.
                liveness: LivenessCell::new(Liveness::Alive),
            },
        }
    }

    pub fn from_settings(settings: &JujuSettings, binary: PathBuf) -> Self {
        Self::new(binary, settings.controller.clone(), settings.command_timeout)
    }

    /// Model reference qualified with the controller, if one is configured.
    fn model_ref(&self, model: &str) -> String {
        match &self.controller {
            Some(controller) if !model.contains(':') => format!("{controller}:{model}"),
            _ => model.to_string(),
        }
    }
}

#[async_trait]
impl Controller for JujuCli {
    fn name(&self) -> &str {
        &self.name
    }

    fn liveness(&self) -> Liveness {
        self.runner.liveness.get()
    }

    async fn reconnect(&self) -> Result<(), JujuError> {
        self.runner
            .run(show_controller_args(self.controller.as_deref()))
            .await?;
        self.runner.liveness.set(Liveness::Alive);
        Ok(())
    }

    async fn open_model(&self, model: &str) -> Result<Arc<dyn ModelConnection>, JujuError> {
        let model_ref = self.model_ref(model);
        let runner = Runner {
            liveness: LivenessCell::new(Liveness::Alive),
            ..self.runner.clone()
        };
        runner.run(show_model_args(&model_ref)).await.map_err(|err| match err {
            JujuError::ModelNotFound(_) => JujuError::ModelNotFound(model.to_string()),
            other => other,
        })?;
        Ok(Arc::new(CliModel {
            model: model.to_string(),
            model_ref,
            runner,
        }))
    }

    async fn list_models(&self) -> Result<Vec<String>, JujuError> {
        let output = self
            .runner
            .run(models_args(self.controller.as_deref()))
            .await?;
        parse_models(&output.stdout)
    }

    async fn disconnect(&self) {
        self.runner.liveness.set(Liveness::SocketClosed);
    }
}

/// Model reached through the `juju` client.
pub struct CliModel {
    model: String,
    model_ref: String,
    runner: Runner,
}

impl CliModel {
    async fn run(&self, args: Vec<String>) -> Result<CommandOutput, JujuError> {
        self.runner.run(args).await
    }
}

#[async_trait]
impl ModelConnection for CliModel {
    fn model(&self) -> &str {
        &self.model
    }

    fn liveness(&self) -> Liveness {
        self.runner.liveness.get()
    }

    async fn get_status(&self, filter: &[String]) -> Result<StatusSnapshot, JujuError> {
        let output = self.run(status_args(&self.model_ref, filter)).await?;
        StatusSnapshot::from_juju_json(&self.model, &output.stdout)
    }

    async fn disconnect(&self) {
        self.runner.liveness.set(Liveness::SocketClosed);
    }

    async fn deploy(&self, request: &DeployRequest) -> Result<(), JujuError> {
        self.run(deploy_args(&self.model_ref, request)).await?;
        Ok(())
    }

    async fn add_unit(
        &self,
        application: &str,
        count: usize,
        placements: &[String],
    ) -> Result<(), JujuError> {
        self.run(add_unit_args(&self.model_ref, application, count, placements))
            .await?;
        Ok(())
    }

    async fn remove_unit(&self, unit: &UnitName) -> Result<(), JujuError> {
        self.run(remove_unit_args(&self.model_ref, unit)).await?;
        Ok(())
    }

    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ActionOutcome, JujuError> {
        let output = self
            .run(run_args(&self.model_ref, unit, action, params))
            .await?;
        parse_action(unit, &output.stdout)
    }

    async fn integrate(&self, provider: &Endpoint, requirer: &Endpoint) -> Result<(), JujuError> {
        self.run(integrate_args(&self.model_ref, provider, requirer))
            .await?;
        Ok(())
    }

    async fn remove_relation(&self, first: &Endpoint, second: &Endpoint) -> Result<(), JujuError> {
        self.run(remove_relation_args(&self.model_ref, first, second))
            .await?;
        Ok(())
    }

    async fn add_machine(&self, request: &MachineRequest) -> Result<String, JujuError> {
        let output = self.run(add_machine_args(&self.model_ref, request)).await?;
        parse_created_machine(&output)
    }

    async fn set_config(
        &self,
        application: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<(), JujuError> {
        self.run(config_args(&self.model_ref, application, config))
            .await?;
        Ok(())
    }

    async fn add_secret(
        &self,
        name: &str,
        data: &BTreeMap<String, String>,
        info: Option<&str>,
    ) -> Result<String, JujuError> {
        let output = self
            .run(add_secret_args(&self.model_ref, name, data, info))
            .await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn grant_secret(&self, name: &str, application: &str) -> Result<(), JujuError> {
        self.run(grant_secret_args(&self.model_ref, name, application))
            .await
            .map_err(|err| secret_error(name, err))?;
        Ok(())
    }

    async fn get_secret(&self, name: &str) -> Result<BTreeMap<String, String>, JujuError> {
        let output = self
            .run(show_secret_args(&self.model_ref, name))
            .await
            .map_err(|err| secret_error(name, err))?;
        parse_secret(name, &output.stdout)
    }

    async fn remove_secret(&self, name: &str) -> Result<(), JujuError> {
        self.run(remove_secret_args(&self.model_ref, name))
            .await
            .map_err(|err| secret_error(name, err))?;
        Ok(())
    }
}
