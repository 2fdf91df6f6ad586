//! Synchronization layer: keeps the local world model in step with the
//! authority and drives the viewer's frame loop.
//!
//! # Invariants
//! - Only the coordinator writes the world model, one batch per write lock.
//! - Updates are applied in the order the authority sent them.
//! - Nothing that arrives after shutdown touches the world.

pub mod config;
pub mod coordinator;
pub mod driver;
pub mod viewer;

pub use config::{ConfigError, ViewerConfig};
pub use coordinator::{PumpReport, SyncCoordinator, SyncError, SyncStats, ViewerStatus};
pub use driver::{DriverReport, FrameDriver, StopHandle};
pub use viewer::{Viewer, ViewerError};
