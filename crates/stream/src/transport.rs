//! The seam between the update channel and whatever carries bytes.
//!
//! A [`Transport`] opens streams and pushes what it receives into the
//! [`StreamSink`] it was handed. Sinks are cheap to clone and safe to use
//! from any thread; once the owning channel is closed every push becomes a
//! no-op.

use crate::status::{StreamKind, StreamStatus};
use crate::wire::{ClientData, Metadata, WorldAction, WorldUpdate};
use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Errors a transport reports synchronously when opening a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("stream rejected: {0}")]
    Rejected(String),
}

/// Why an outbound action did not take effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// The request never got an answer.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The authority answered with an error payload.
    #[error("rejected by authority: {0}")]
    Rejected(String),
}

/// Completion callback for a fire-and-forget action.
pub type ActionCallback = Box<dyn FnOnce(Result<(), ActionError>) + Send + 'static>;

/// Lets the channel terminate a stream it opened.
pub trait StreamHandle: Send {
    fn cancel(&mut self);
}

/// A transport capable of serving one viewer session.
pub trait Transport: Send + Sync {
    /// Open the world update stream for `client`.
    fn open_updates(
        &self,
        client: &ClientData,
        sink: StreamSink<WorldUpdate>,
    ) -> Result<Box<dyn StreamHandle>, TransportError>;

    /// Open the metadata side stream.
    fn open_metadata(
        &self,
        sink: StreamSink<Metadata>,
    ) -> Result<Box<dyn StreamHandle>, TransportError>;

    /// Send an action. `reply` runs exactly once, on any thread.
    fn modify_world(&self, action: WorldAction, reply: ActionCallback);
}

/// What to do with a data message when the channel queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// The pushing transport thread waits for the owner to drain.
    #[default]
    Block,
    /// The incoming data message is discarded and counted.
    DropNewest,
}

/// Everything the owner of an update channel can observe, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Update(WorldUpdate),
    Metadata(Metadata),
    Status {
        stream: StreamKind,
        status: StreamStatus,
    },
    /// Follows the terminal status of a stream. Nothing else arrives for it.
    StreamEnded { stream: StreamKind },
}

/// Data a sink can carry.
pub trait StreamItem: Send + 'static {
    const KIND: StreamKind;

    fn into_event(self) -> ChannelEvent;
}

impl StreamItem for WorldUpdate {
    const KIND: StreamKind = StreamKind::Updates;

    fn into_event(self) -> ChannelEvent {
        ChannelEvent::Update(self)
    }
}

impl StreamItem for Metadata {
    const KIND: StreamKind = StreamKind::Metadata;

    fn into_event(self) -> ChannelEvent {
        ChannelEvent::Metadata(self)
    }
}

/// Counters shared between a channel and its sinks.
#[derive(Debug, Default)]
pub struct ChannelStats {
    received: AtomicU64,
    dropped: AtomicU64,
    after_close: AtomicU64,
}

impl ChannelStats {
    /// Data messages accepted into the queue.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Data messages discarded by [`OverflowPolicy::DropNewest`].
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Pushes ignored because the channel was already closed.
    pub fn after_close(&self) -> u64 {
        self.after_close.load(Ordering::Relaxed)
    }
}

/// Push side of a channel, handed to the transport.
pub struct StreamSink<T> {
    tx: Sender<ChannelEvent>,
    alive: Arc<AtomicBool>,
    stats: Arc<ChannelStats>,
    overflow: OverflowPolicy,
    _item: PhantomData<fn(T)>,
}

impl<T> Clone for StreamSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            alive: self.alive.clone(),
            stats: self.stats.clone(),
            overflow: self.overflow,
            _item: PhantomData,
        }
    }
}

impl<T: StreamItem> StreamSink<T> {
    pub(crate) fn new(
        tx: Sender<ChannelEvent>,
        alive: Arc<AtomicBool>,
        stats: Arc<ChannelStats>,
        overflow: OverflowPolicy,
    ) -> Self {
        Self {
            tx,
            alive,
            stats,
            overflow,
            _item: PhantomData,
        }
    }

    /// False once the owning channel has been closed or dropped.
    pub fn is_open(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Hand one received message to the channel. Returns false if the
    /// channel is gone and the transport should stop writing.
    pub fn deliver(&self, item: T) -> bool {
        if !self.is_open() {
            self.stats.after_close.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let event = item.into_event();
        let accepted = match self.overflow {
            OverflowPolicy::Block => self.tx.send(event).is_ok(),
            OverflowPolicy::DropNewest => match self.tx.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(stream = ?T::KIND, "channel queue full, message dropped");
                    return true;
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        };
        if accepted {
            self.stats.received.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    /// Report a status change. Terminal statuses are followed by
    /// [`ChannelEvent::StreamEnded`]. Status is never subject to the
    /// overflow policy.
    pub fn status(&self, status: StreamStatus) -> bool {
        if !self.is_open() {
            self.stats.after_close.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let terminal = status.is_terminal();
        let sent = self
            .tx
            .send(ChannelEvent::Status {
                stream: T::KIND,
                status,
            })
            .is_ok();
        if sent && terminal {
            return self
                .tx
                .send(ChannelEvent::StreamEnded { stream: T::KIND })
                .is_ok();
        }
        sent
    }
}
