use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

const SUNBEAM_VARS: &[&str] = &[
    "SUNBEAM_CONFIG",
    "SUNBEAM_JUJU_BINARY",
    "SUNBEAM_CONTROLLER",
    "SUNBEAM_WAIT_TIMEOUT",
    "SUNBEAM_POLL_INTERVAL",
    "SUNBEAM_LOG_LEVEL",
];

/// A scripted `juju` client plus a config file pointing at it.
pub struct FakeJuju {
    pub dir: TempDir,
    pub binary: PathBuf,
    pub config: PathBuf,
}

impl FakeJuju {
    /// `status` is the JSON printed by `juju status`; every other command
    /// succeeds with an empty object.
    pub fn with_status(status: &str) -> Self {
        Self::with_script(&format!(
            "case \"$1\" in\n  status) echo '{status}' ;;\n  models) echo '{{\"models\":[]}}' ;;\n  *) echo '{{}}' ;;\nesac"
        ))
    }

    pub fn with_script(script: &str) -> Self {
        crate::test_log!("FIXTURE: Creating fake juju client");

        let dir = TempDir::new().expect("Failed to create temp dir");
        let binary = dir.path().join("juju");
        fs::write(&binary, format!("#!/bin/sh\n{script}\n")).expect("Failed to write juju");
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod juju");

        let config = dir.path().join("config.toml");
        fs::write(
            &config,
            format!(
                r#"[juju]
binary = "{}"
command_timeout = "10s"

[wait]
timeout = "30s"
poll_interval = "100ms"
"#,
                binary.display()
            ),
        )
        .expect("Failed to write config.toml");

        Self {
            dir,
            binary,
            config,
        }
    }

    /// Run the sunbeam binary against this fake client.
    pub fn run(&self, args: &[&str]) -> Output {
        let mut command = Command::new(env!("CARGO_BIN_EXE_sunbeam"));
        for var in SUNBEAM_VARS {
            command.env_remove(var);
        }
        command
            .env("NO_COLOR", "1")
            .env("RUST_LOG", "warn")
            .arg("--config")
            .arg(&self.config)
            .args(args)
            .output()
            .expect("Failed to run sunbeam")
    }
}
