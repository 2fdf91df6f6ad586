use blockview_common::{BlockFace, BlockPos};
use blockview_kernel::{WorldEvent, WorldModel};
use blockview_stream::{
    ActionError, ChannelConfig, ChannelError, ChannelEvent, Metadata, Session, StreamKind,
    StreamStatus, Transport, UpdateChannel, WorldUpdate,
};
use parking_lot::{RwLock, RwLockReadGuard};
use std::fmt;
use std::sync::Arc;

/// Errors from the synchronization layer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("viewer has been shut down")]
    ShutDown,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Connection state shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerStatus {
    Connecting,
    Connected,
    Disconnected(String),
}

impl ViewerStatus {
    fn from_stream(status: &StreamStatus) -> Self {
        match status {
            StreamStatus::Connecting => Self::Connecting,
            StreamStatus::Open => Self::Connected,
            StreamStatus::Ended => Self::Disconnected("stream ended".into()),
            StreamStatus::Failed(reason) => Self::Disconnected(reason.clone()),
        }
    }
}

impl fmt::Display for ViewerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected(reason) => write!(f, "disconnected ({reason})"),
        }
    }
}

/// What one [`SyncCoordinator::pump`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PumpReport {
    /// Update events that changed the world.
    pub applied: usize,
    /// Update events that were no-ops: duplicates, unset or unknown kinds.
    pub ignored: usize,
    /// World changes produced by this batch, in the order they happened.
    pub changes: Vec<WorldEvent>,
}

/// Running totals across all pumps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub batches: u64,
    pub applied: u64,
    pub ignored: u64,
}

/// Owns the local world model and keeps it in step with the authority.
///
/// The coordinator is the only writer. Everyone else gets read access
/// through [`SyncCoordinator::read`] or a shared handle from
/// [`SyncCoordinator::world`].
pub struct SyncCoordinator {
    world: Arc<RwLock<WorldModel>>,
    channel: Option<UpdateChannel>,
    status: ViewerStatus,
    metadata: Option<Metadata>,
    stats: SyncStats,
}

impl SyncCoordinator {
    /// Open an update channel on `transport` and start with an empty world.
    pub fn connect(transport: Arc<dyn Transport>, config: ChannelConfig) -> Result<Self, SyncError> {
        let channel = UpdateChannel::open(transport, config)?;
        Ok(Self::from_channel(channel))
    }

    pub fn from_channel(channel: UpdateChannel) -> Self {
        tracing::debug!(client = %channel.session().client_id(), "sync coordinator attached");
        Self {
            world: Arc::new(RwLock::new(WorldModel::new())),
            status: ViewerStatus::from_stream(channel.status()),
            channel: Some(channel),
            metadata: None,
            stats: SyncStats::default(),
        }
    }

    /// Apply one update to `world`. Returns true if the world changed.
    ///
    /// Unset and unknown kinds are not errors.
    pub fn apply(world: &mut WorldModel, update: &WorldUpdate) -> bool {
        match update {
            WorldUpdate::BlockAdded(added) => world.insert_block(added.position_or_origin()),
            WorldUpdate::NotSet => {
                tracing::trace!("update with no kind ignored");
                false
            }
            WorldUpdate::Unrecognized { tag } => {
                tracing::trace!(tag, "unrecognized update ignored");
                false
            }
        }
    }

    /// Drain the channel and apply everything queued, in arrival order.
    ///
    /// The whole batch is applied under one write lock, so readers see the
    /// world either before or after it.
    pub fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();
        let Some(channel) = self.channel.as_mut() else {
            return report;
        };
        let events = channel.drain();
        if events.is_empty() {
            return report;
        }

        let mut world = self.world.write();
        for event in events {
            match event {
                ChannelEvent::Update(update) => {
                    if Self::apply(&mut world, &update) {
                        report.applied += 1;
                    } else {
                        report.ignored += 1;
                    }
                }
                ChannelEvent::Metadata(metadata) => {
                    tracing::trace!(total_blocks = metadata.total_blocks, "metadata received");
                    self.metadata = Some(metadata);
                }
                ChannelEvent::Status {
                    stream: StreamKind::Updates,
                    status,
                } => {
                    let next = ViewerStatus::from_stream(&status);
                    if next != self.status {
                        tracing::info!(from = %self.status, to = %next, "viewer status changed");
                        self.status = next;
                    }
                }
                ChannelEvent::Status {
                    stream: StreamKind::Metadata,
                    status,
                } => tracing::debug!(%status, "metadata stream status"),
                ChannelEvent::StreamEnded { stream } => {
                    tracing::debug!(?stream, "stream ended");
                }
            }
        }
        report.changes = world.drain_events();
        drop(world);

        self.stats.batches += 1;
        self.stats.applied += report.applied as u64;
        self.stats.ignored += report.ignored as u64;
        tracing::debug!(applied = report.applied, ignored = report.ignored, "update batch applied");
        report
    }

    /// Read access to the world for the duration of the guard.
    pub fn read(&self) -> RwLockReadGuard<'_, WorldModel> {
        self.world.read()
    }

    /// Shared handle for readers on other threads.
    pub fn world(&self) -> Arc<RwLock<WorldModel>> {
        self.world.clone()
    }

    pub fn status(&self) -> &ViewerStatus {
        &self.status
    }

    /// Latest metadata, if the side stream has sent any.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn session(&self) -> Option<&Session> {
        self.channel.as_ref().map(UpdateChannel::session)
    }

    pub fn is_shut_down(&self) -> bool {
        self.channel.is_none()
    }

    /// Ask the authority for a block next to `existing`.
    ///
    /// The world only changes when the authority broadcasts the new block.
    pub fn add_adjacent_block<F>(
        &self,
        existing: BlockPos,
        face: BlockFace,
        on_done: F,
    ) -> Result<(), SyncError>
    where
        F: FnOnce(Result<(), ActionError>) + Send + 'static,
    {
        let channel = self.channel.as_ref().ok_or(SyncError::ShutDown)?;
        channel.add_adjacent_block(existing, face, on_done);
        Ok(())
    }

    /// Replace the session with a fresh one. Events still queued on the old
    /// session are discarded; the new session replays existing state when
    /// configured to, and inserts are idempotent.
    ///
    /// The old session is closed first. If the new one cannot be opened the
    /// coordinator is left shut down and its status says why.
    pub fn reconnect(&mut self) -> Result<(), SyncError> {
        let channel = self.channel.take().ok_or(SyncError::ShutDown)?;
        match channel.reconnect() {
            Ok(channel) => {
                self.status = ViewerStatus::from_stream(channel.status());
                self.channel = Some(channel);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "reconnect failed");
                self.status = ViewerStatus::Disconnected(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Close the channel. Idempotent. The world keeps its last state.
    pub fn shutdown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
            self.status = ViewerStatus::Disconnected("shut down".into());
            tracing::debug!("sync coordinator shut down");
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("status", &self.status)
            .field("channel", &self.channel)
            .field("stats", &self.stats)
            .finish()
    }
}
