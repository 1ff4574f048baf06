//! Formatting helpers shared by the Sunbeam commands.

use colored::{ColoredString, Colorize};
use sunbeam_juju::ApplicationStatus;

/// Indent each line of text with a given prefix.
pub fn indent_lines(text: &str, prefix: &str) -> String {
    let mut out = String::new();
    for (idx, line) in text.lines().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(prefix);
        out.push_str(line);
    }
    out
}

/// Format a duration in seconds as a human-readable string.
pub fn humanize_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Colour a workload status the way `juju status` does.
pub fn paint_status(status: &str) -> ColoredString {
    match status {
        "active" => status.green(),
        "blocked" | "error" => status.red().bold(),
        "waiting" | "maintenance" => status.yellow(),
        _ => status.dimmed(),
    }
}

/// Units that are `active` and `idle`, against the expected unit count.
pub fn unit_progress(app: &ApplicationStatus) -> (usize, usize) {
    let ready = app
        .units
        .values()
        .filter(|unit| {
            unit.workload.as_ref().is_some_and(|s| s.current == "active")
                && unit.agent.as_ref().is_some_and(|s| s.current == "idle")
        })
        .count();
    (ready, app.scale.unwrap_or(app.units.len()))
}
