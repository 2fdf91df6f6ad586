//! In-process world authority.
//!
//! Serves the update channel's transport seam from a worker thread holding
//! the authoritative block set. Used by the headless viewer and by tests
//! that need a real peer.
//!
//! # Invariants
//! - Broadcasts reach every client in the order the world changed.
//! - A client that asked for existing state sees every block before any live
//!   update.

mod server;
mod ticker;
mod world;

pub use server::{LocalAuthority, ReplyMode};
pub use ticker::{Sweep, Ticker};
pub use world::{AuthorityWorld, PlacementError};
