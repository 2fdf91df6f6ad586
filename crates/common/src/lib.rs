//! Shared value types for the blockview client.
//!
//! # Invariants
//! - Block positions are integer lattice coordinates with a total order.
//! - Client ids are generated fresh per session and never reused.

mod types;

pub use types::{BlockFace, BlockPos, ClientId};
