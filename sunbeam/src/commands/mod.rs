//! Command implementations.

pub mod helpers;
pub mod status;
pub mod wait;

use std::sync::Arc;
use sunbeam_common::SunbeamConfig;
use sunbeam_juju::{EventBus, JujuCli, JujuHelper};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

/// Everything a command needs to talk to the controller.
pub struct Context {
    pub helper: JujuHelper,
    printer: Option<(EventBus, JoinHandle<()>)>,
}

impl Context {
    /// Build a helper over the `juju` client. With `events`, wait events are
    /// printed to stdout as JSON lines.
    pub fn new(config: &SunbeamConfig, events: bool) -> Self {
        let cli = JujuCli::from_settings(&config.juju, config.juju_binary());
        let helper = JujuHelper::new(Arc::new(cli), config.wait.clone());
        if !events {
            return Self {
                helper,
                printer: None,
            };
        }
        let bus = EventBus::default();
        let handle = print_events(&bus);
        Self {
            helper: helper.with_events(bus.clone()),
            printer: Some((bus, handle)),
        }
    }

    /// Disconnect and flush any pending events.
    pub async fn close(self) {
        self.helper.disconnect().await;
        drop(self.helper);
        if let Some((bus, handle)) = self.printer {
            drop(bus);
            if let Err(err) = handle.await {
                warn!("Event printer failed: {}", err);
            }
        }
    }
}

/// Print every event of `bus` as a JSON line until all senders are gone.
fn print_events(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(line) => println!("{line}"),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} wait events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
