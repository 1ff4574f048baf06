//! Juju status synchronization and convergence waits.
//!
//! A [`SharedStatusUpdater`] keeps one model connection alive and fans each
//! status snapshot out to every consumer. The [`ConvergenceWaiter`] runs one
//! watch per application against it, and [`JujuHelper`] wraps both behind a
//! single facade together with the day-to-day model operations.

pub mod cli;
pub mod connection;
pub mod desired;
pub mod events;
pub mod helper;
pub mod mock;
pub mod poll;
pub mod status;
pub mod updater;
pub mod waiter;

pub use cli::JujuCli;
pub use connection::{
    ActionOutcome, ConnectionManager, Controller, DeployRequest, Liveness, MachineRequest,
    ModelConnection, ModelHandle,
};
pub use desired::{DesiredStatus, Verdict, evaluate, is_desired_status_achieved};
pub use events::EventBus;
pub use helper::JujuHelper;
pub use mock::MockControlPlane;
pub use status::{ApplicationStatus, MachineStatus, StatusInfo, StatusSnapshot, UnitStatus};
pub use updater::{SharedStatusUpdater, StatusTicker, UpdaterConfig, UpdaterGuard};
pub use waiter::{ConvergenceWaiter, WaitReport, WaitSpec, WatchState, watch_all};
