//! Update channel: the long-lived server-to-client world update stream.
//!
//! # Invariants
//! - Events reach the owner in the order the transport delivered them.
//! - Terminal stream states absorb every later notification.
//! - Nothing pushed after close reaches the owner; late action replies are
//!   dropped.
//! - The channel never reconnects on its own; a reconnect is a new session.

mod channel;
mod status;
mod transport;
mod wire;

pub use channel::{ChannelConfig, ChannelError, Session, UpdateChannel};
pub use status::{StreamKind, StreamStatus};
pub use transport::{
    ActionCallback, ActionError, ChannelEvent, ChannelStats, OverflowPolicy, StreamHandle,
    StreamItem, StreamSink, Transport, TransportError,
};
pub use wire::{BlockAdded, ClientData, Metadata, WorldAction, WorldUpdate};
