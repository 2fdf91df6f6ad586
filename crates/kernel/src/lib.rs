//! World Kernel: local world model and fixed-timestep simulation clock.
//!
//! # Invariants
//! - World time advances only in whole multiples of the fixed step.
//! - The render fraction is always in `[0, 1)`.
//! - The world model is mutated only through explicit insert operations.

pub mod clock;
pub mod world;

pub use clock::{ClockConfig, ClockError, ClockState, FramePhases, FrameStats, Phases, SimulationLoop};
pub use world::{WorldEvent, WorldModel};
