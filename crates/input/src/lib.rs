//! Pointer input mapped to viewer actions.
//!
//! # Invariants
//! - Raw pointer events never reach the world model.
//! - Camera actions are local; only placement travels to the authority.

pub mod action;
pub mod pointer;

pub use action::Action;
pub use pointer::{Modifiers, Movement, ORBIT_DEGREES_PER_PIXEL, PointerController};
