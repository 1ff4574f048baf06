//! `sunbeam status`: one-shot summary of a model.

use anyhow::{Context as _, Result};
use colored::Colorize;
use sunbeam_juju::StatusSnapshot;

use super::Context;
use super::helpers::{paint_status, unit_progress};

pub async fn run(context: &Context, model: &str, apps: &[String], json: bool) -> Result<()> {
    let snapshot = context.helper.get_model_status(model, apps).await?;
    if json {
        let rendered =
            serde_json::to_string_pretty(&snapshot).context("serializing model status")?;
        println!("{rendered}");
    } else {
        print!("{}", render_table(&snapshot));
    }
    Ok(())
}

fn render_table(snapshot: &StatusSnapshot) -> String {
    let mut out = format!("{} {}\n", "Model".bold(), snapshot.model);
    if snapshot.applications.is_empty() {
        out.push_str("  no applications\n");
        return out;
    }
    let width = snapshot
        .applications
        .keys()
        .map(String::len)
        .max()
        .unwrap_or(0)
        .max("App".len());
    out.push_str(&format!(
        "{:<width$}  {:<12}  {:>5}  {}\n",
        "App".bold(),
        "Status".bold(),
        "Units".bold(),
        "Channel".bold(),
    ));
    for (name, app) in &snapshot.applications {
        let status = app.status.as_ref().map_or("unknown", |s| s.current.as_str());
        let (ready, total) = unit_progress(app);
        let units = if app.is_subordinate() {
            "-".to_string()
        } else {
            format!("{ready}/{total}")
        };
        out.push_str(&format!(
            "{:<width$}  {:<12}  {:>5}  {}\n",
            name,
            paint_status(status),
            units,
            app.charm_channel.as_deref().unwrap_or("-"),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sunbeam_juju::{ApplicationStatus, UnitStatus};

    #[test]
    fn test_render_table_lists_every_application() {
        colored::control::set_override(false);
        let snapshot = StatusSnapshot::new("openstack")
            .with_application(
                ApplicationStatus::new("keystone")
                    .with_status("active")
                    .with_scale(1)
                    .with_channel("2024.1/stable")
                    .with_unit("keystone/0", UnitStatus::new("active", "idle")),
            )
            .with_application(
                ApplicationStatus::new("keystone-mysql-router")
                    .with_status("waiting")
                    .subordinate_of("keystone"),
            );
        let table = render_table(&snapshot);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "Model openstack");
        assert!(lines[2].starts_with("keystone "));
        assert!(lines[2].contains("1/1"));
        assert!(lines[2].contains("2024.1/stable"));
        assert!(lines[3].contains("waiting"));
        assert!(lines[3].contains(" - "));
    }

    #[test]
    fn test_render_table_for_empty_model() {
        colored::control::set_override(false);
        let table = render_table(&StatusSnapshot::new("empty"));
        assert!(table.contains("no applications"));
    }
}
