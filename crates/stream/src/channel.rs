use crate::status::{StreamKind, StreamStatus};
use crate::transport::{
    ActionCallback, ActionError, ChannelEvent, ChannelStats, OverflowPolicy, StreamHandle,
    StreamSink, Transport, TransportError,
};
use crate::wire::{ClientData, WorldAction};
use blockview_common::{BlockFace, BlockPos, ClientId};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, bounded};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Errors from opening an update channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid channel config: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Update channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Bound on queued, not yet polled events.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Also open the metadata side stream.
    pub stream_metadata: bool,
    /// Ask for a replay of existing blocks when the stream opens.
    pub send_existing_state: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            overflow: OverflowPolicy::Block,
            stream_metadata: true,
            send_existing_state: true,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.queue_capacity == 0 {
            return Err(ChannelError::InvalidConfig("queue_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// One connection lifetime of this viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    client_id: ClientId,
    /// 0 for the first session, +1 for every reconnect.
    generation: u32,
}

impl Session {
    fn fresh(generation: u32) -> Self {
        Self {
            client_id: ClientId::new(),
            generation,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn client_data(&self, send_existing_state: bool) -> ClientData {
        ClientData {
            name: self.client_id.to_string(),
            send_existing_state,
        }
    }
}

/// Long-lived server-to-client update stream plus optional metadata stream.
///
/// The owner polls [`UpdateChannel::poll`] (or drains) to receive events in
/// the order the authority sent them. Status transitions are validated here:
/// illegal ones and anything arriving on a stream after it ended are dropped.
/// The channel never reconnects by itself; [`UpdateChannel::reconnect`]
/// replaces the whole session.
pub struct UpdateChannel {
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    session: Session,
    rx: Option<Receiver<ChannelEvent>>,
    alive: Arc<AtomicBool>,
    stats: Arc<ChannelStats>,
    updates_handle: Option<Box<dyn StreamHandle>>,
    metadata_handle: Option<Box<dyn StreamHandle>>,
    update_status: StreamStatus,
    metadata_status: Option<StreamStatus>,
    /// Streams whose end marker the owner has already seen.
    ended: Vec<StreamKind>,
}

impl UpdateChannel {
    /// Open a new session on `transport`.
    pub fn open(transport: Arc<dyn Transport>, config: ChannelConfig) -> Result<Self, ChannelError> {
        Self::open_generation(transport, config, 0)
    }

    fn open_generation(
        transport: Arc<dyn Transport>,
        config: ChannelConfig,
        generation: u32,
    ) -> Result<Self, ChannelError> {
        config.validate()?;
        let session = Session::fresh(generation);
        let _span = tracing::info_span!("open_channel", client = %session.client_id).entered();

        let (tx, rx) = bounded(config.queue_capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(ChannelStats::default());

        let mut channel = Self {
            transport: transport.clone(),
            config,
            session,
            rx: Some(rx),
            alive: alive.clone(),
            stats: stats.clone(),
            updates_handle: None,
            metadata_handle: None,
            update_status: StreamStatus::Connecting,
            metadata_status: None,
            ended: Vec::new(),
        };

        if config.stream_metadata {
            let sink = StreamSink::new(tx.clone(), alive.clone(), stats.clone(), config.overflow);
            channel.metadata_handle = Some(transport.open_metadata(sink)?);
            channel.metadata_status = Some(StreamStatus::Connecting);
        }

        let client = channel.session.client_data(config.send_existing_state);
        let sink = StreamSink::new(tx, alive, stats, config.overflow);
        channel.updates_handle = Some(transport.open_updates(&client, sink)?);

        tracing::debug!(generation, "update channel opened");
        Ok(channel)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Current status of the update stream.
    pub fn status(&self) -> &StreamStatus {
        &self.update_status
    }

    /// Current status of the metadata stream, if one was requested.
    pub fn metadata_status(&self) -> Option<&StreamStatus> {
        self.metadata_status.as_ref()
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// True after [`UpdateChannel::close`].
    pub fn is_closed(&self) -> bool {
        self.rx.is_none()
    }

    /// Number of events waiting to be polled.
    pub fn pending(&self) -> usize {
        self.rx.as_ref().map_or(0, Receiver::len)
    }

    /// Next event, without blocking.
    pub fn poll(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.rx.as_ref()?.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return None,
            };
            if let Some(event) = self.admit(event) {
                return Some(event);
            }
        }
    }

    /// Next event, waiting up to `timeout`.
    pub fn poll_timeout(&mut self, timeout: Duration) -> Option<ChannelEvent> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let event = match self.rx.as_ref()?.recv_timeout(remaining) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            };
            if let Some(event) = self.admit(event) {
                return Some(event);
            }
        }
    }

    /// Everything currently queued, in arrival order.
    pub fn drain(&mut self) -> Vec<ChannelEvent> {
        std::iter::from_fn(|| self.poll()).collect()
    }

    /// Request a block next to `existing` on `face`.
    ///
    /// Fire-and-forget: `on_done` reports a transport failure or the
    /// authority's error. It is silently skipped if it fires after the
    /// channel was closed. Nothing is retried.
    pub fn add_adjacent_block<F>(&self, existing: BlockPos, face: BlockFace, on_done: F)
    where
        F: FnOnce(Result<(), ActionError>) + Send + 'static,
    {
        let action = WorldAction::AddAdjacentBlock { existing, face };
        if self.is_closed() {
            tracing::debug!(?action, "action after close ignored");
            return;
        }
        let alive = self.alive.clone();
        let reply: ActionCallback = Box::new(move |result| {
            if !alive.load(Ordering::Acquire) {
                tracing::trace!("action reply after close ignored");
                return;
            }
            if let Err(err) = &result {
                tracing::warn!(%err, "world action failed");
            }
            on_done(result);
        });
        tracing::debug!(?action, "sending world action");
        self.transport.modify_world(action, reply);
    }

    /// Terminate both streams. Idempotent. Late transport pushes and action
    /// replies become no-ops.
    pub fn close(&mut self) {
        if self.rx.is_none() {
            return;
        }
        self.alive.store(false, Ordering::Release);
        if let Some(mut h) = self.updates_handle.take() {
            h.cancel();
        }
        if let Some(mut h) = self.metadata_handle.take() {
            h.cancel();
        }
        // Dropping the receiver unblocks any transport thread waiting on a
        // full queue.
        self.rx = None;
        tracing::debug!(client = %self.session.client_id, "update channel closed");
    }

    /// Close this session and open a new one with a fresh client id on the
    /// same transport.
    pub fn reconnect(mut self) -> Result<Self, ChannelError> {
        self.close();
        let generation = self.session.generation + 1;
        tracing::info!(generation, "reconnecting with a new session");
        Self::open_generation(self.transport.clone(), self.config, generation)
    }

    /// Apply status bookkeeping; None means the event is dropped.
    fn admit(&mut self, event: ChannelEvent) -> Option<ChannelEvent> {
        match &event {
            ChannelEvent::Update(_) => {
                if self.update_status.is_terminal() {
                    tracing::debug!("update after end of stream dropped");
                    return None;
                }
            }
            ChannelEvent::Metadata(_) => {
                if self.metadata_status.as_ref().is_some_and(StreamStatus::is_terminal) {
                    return None;
                }
            }
            ChannelEvent::Status { stream, status } => {
                let current = match stream {
                    StreamKind::Updates => &mut self.update_status,
                    StreamKind::Metadata => self.metadata_status.as_mut()?,
                };
                if !current.can_transition_to(status) {
                    tracing::debug!(?stream, from = %current, to = %status, "status transition ignored");
                    return None;
                }
                tracing::debug!(?stream, from = %current, to = %status, "stream status changed");
                *current = status.clone();
            }
            ChannelEvent::StreamEnded { stream } => {
                let terminal = match stream {
                    StreamKind::Updates => self.update_status.is_terminal(),
                    StreamKind::Metadata => {
                        self.metadata_status.as_ref().is_some_and(StreamStatus::is_terminal)
                    }
                };
                if !terminal || self.ended.contains(stream) {
                    tracing::debug!(?stream, "duplicate end of stream dropped");
                    return None;
                }
                self.ended.push(*stream);
            }
        }
        Some(event)
    }
}

impl Drop for UpdateChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for UpdateChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateChannel")
            .field("session", &self.session)
            .field("status", &self.update_status)
            .field("metadata_status", &self.metadata_status)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Metadata, WorldUpdate};
    use parking_lot::Mutex;

    /// Transport that records what it was asked and hands sinks back to the test.
    #[derive(Default)]
    struct FakeTransport {
        updates: Mutex<Vec<(ClientData, StreamSink<WorldUpdate>)>>,
        metadata: Mutex<Vec<StreamSink<Metadata>>>,
        actions: Mutex<Vec<(WorldAction, ActionCallback)>>,
        cancelled: Arc<Mutex<u32>>,
        refuse: bool,
    }

    struct FakeHandle(Arc<Mutex<u32>>);

    impl StreamHandle for FakeHandle {
        fn cancel(&mut self) {
            *self.0.lock() += 1;
        }
    }

    impl Transport for FakeTransport {
        fn open_updates(
            &self,
            client: &ClientData,
            sink: StreamSink<WorldUpdate>,
        ) -> Result<Box<dyn StreamHandle>, TransportError> {
            if self.refuse {
                return Err(TransportError::Unavailable("no route".into()));
            }
            self.updates.lock().push((client.clone(), sink));
            Ok(Box::new(FakeHandle(self.cancelled.clone())))
        }

        fn open_metadata(
            &self,
            sink: StreamSink<Metadata>,
        ) -> Result<Box<dyn StreamHandle>, TransportError> {
            self.metadata.lock().push(sink);
            Ok(Box::new(FakeHandle(self.cancelled.clone())))
        }

        fn modify_world(&self, action: WorldAction, reply: ActionCallback) {
            self.actions.lock().push((action, reply));
        }
    }

    fn open(transport: &Arc<FakeTransport>, config: ChannelConfig) -> UpdateChannel {
        UpdateChannel::open(transport.clone(), config).unwrap()
    }

    fn update_sink(t: &FakeTransport, i: usize) -> StreamSink<WorldUpdate> {
        t.updates.lock()[i].1.clone()
    }

    #[test]
    fn open_sends_fresh_client_id() {
        let t = Arc::new(FakeTransport::default());
        let ch = open(&t, ChannelConfig::default());
        let (client, _) = &t.updates.lock()[0];
        assert_eq!(client.name, ch.session().client_id().to_string());
        assert!(client.send_existing_state);
        assert_eq!(ch.status(), &StreamStatus::Connecting);
        assert_eq!(ch.metadata_status(), Some(&StreamStatus::Connecting));
    }

    #[test]
    fn metadata_stream_is_optional() {
        let t = Arc::new(FakeTransport::default());
        let ch = open(
            &t,
            ChannelConfig {
                stream_metadata: false,
                ..ChannelConfig::default()
            },
        );
        assert!(t.metadata.lock().is_empty());
        assert_eq!(ch.metadata_status(), None);
    }

    #[test]
    fn zero_capacity_rejected() {
        let t = Arc::new(FakeTransport::default());
        let err = UpdateChannel::open(
            t,
            ChannelConfig {
                queue_capacity: 0,
                ..ChannelConfig::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidConfig(_)));
    }

    #[test]
    fn open_failure_is_typed() {
        let t = Arc::new(FakeTransport {
            refuse: true,
            ..FakeTransport::default()
        });
        let err = UpdateChannel::open(t, ChannelConfig::default()).unwrap_err();
        assert_eq!(
            err,
            ChannelError::Transport(TransportError::Unavailable("no route".into()))
        );
    }

    #[test]
    fn events_arrive_in_order_with_status() {
        let t = Arc::new(FakeTransport::default());
        let mut ch = open(&t, ChannelConfig::default());
        let sink = update_sink(&t, 0);

        sink.status(StreamStatus::Open);
        for x in 1..=3 {
            sink.deliver(WorldUpdate::block_added(BlockPos::new(x, 0, 0)));
        }
        sink.status(StreamStatus::Ended);

        let events = ch.drain();
        assert_eq!(events.len(), 6);
        assert!(matches!(
            events[0],
            ChannelEvent::Status {
                status: StreamStatus::Open,
                ..
            }
        ));
        for (i, x) in (1..=3).enumerate() {
            assert_eq!(
                events[i + 1],
                ChannelEvent::Update(WorldUpdate::block_added(BlockPos::new(x, 0, 0)))
            );
        }
        assert_eq!(
            events[5],
            ChannelEvent::StreamEnded {
                stream: StreamKind::Updates
            }
        );
        assert_eq!(ch.status(), &StreamStatus::Ended);
    }

    #[test]
    fn updates_after_end_are_dropped() {
        let t = Arc::new(FakeTransport::default());
        let mut ch = open(&t, ChannelConfig::default());
        let sink = update_sink(&t, 0);
        sink.status(StreamStatus::Open);
        sink.status(StreamStatus::Ended);
        sink.deliver(WorldUpdate::block_added(BlockPos::ORIGIN));
        sink.status(StreamStatus::Open);

        let updates = ch
            .drain()
            .into_iter()
            .filter(|e| matches!(e, ChannelEvent::Update(_)))
            .count();
        assert_eq!(updates, 0);
        assert_eq!(ch.status(), &StreamStatus::Ended);
    }

    #[test]
    fn stream_ends_only_once() {
        let t = Arc::new(FakeTransport::default());
        let mut ch = open(&t, ChannelConfig::default());
        let sink = update_sink(&t, 0);
        sink.status(StreamStatus::Open);
        sink.status(StreamStatus::Ended);
        sink.status(StreamStatus::Failed("late".into()));

        let ends = ch
            .drain()
            .into_iter()
            .filter(|e| matches!(e, ChannelEvent::StreamEnded { .. }))
            .count();
        assert_eq!(ends, 1);
        assert_eq!(ch.status(), &StreamStatus::Ended);
    }

    #[test]
    fn failure_reason_is_kept() {
        let t = Arc::new(FakeTransport::default());
        let mut ch = open(&t, ChannelConfig::default());
        let sink = update_sink(&t, 0);
        sink.status(StreamStatus::Open);
        sink.status(StreamStatus::Failed("connection reset".into()));
        ch.drain();
        assert_eq!(ch.status(), &StreamStatus::Failed("connection reset".into()));
    }

    #[test]
    fn close_cancels_streams_and_silences_sinks() {
        let t = Arc::new(FakeTransport::default());
        let mut ch = open(&t, ChannelConfig::default());
        let sink = update_sink(&t, 0);

        ch.close();
        ch.close();

        assert!(ch.is_closed());
        assert_eq!(*t.cancelled.lock(), 2);
        assert!(!sink.is_open());
        assert!(!sink.deliver(WorldUpdate::NotSet));
        assert_eq!(ch.poll(), None);
    }

    #[test]
    fn close_releases_sender_blocked_on_full_queue() {
        let t = Arc::new(FakeTransport::default());
        let mut ch = open(
            &t,
            ChannelConfig {
                queue_capacity: 1,
                stream_metadata: false,
                ..ChannelConfig::default()
            },
        );
        let sink = update_sink(&t, 0);
        assert!(sink.deliver(WorldUpdate::NotSet));

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let pusher = std::thread::spawn(move || {
            let accepted = sink.deliver(WorldUpdate::block_added(BlockPos::ORIGIN));
            let _ = done_tx.send(accepted);
        });

        // Still parked on the full queue.
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        ch.close();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(false));
        pusher.join().unwrap();
    }

    #[test]
    fn action_reply_after_close_is_ignored() {
        let t = Arc::new(FakeTransport::default());
        let mut ch = open(&t, ChannelConfig::default());
        let fired = Arc::new(Mutex::new(false));
        let flag = fired.clone();
        ch.add_adjacent_block(BlockPos::ORIGIN, BlockFace::PosX, move |_| {
            *flag.lock() = true;
        });

        ch.close();
        let (action, reply) = t.actions.lock().pop().unwrap();
        assert_eq!(
            action,
            WorldAction::AddAdjacentBlock {
                existing: BlockPos::ORIGIN,
                face: BlockFace::PosX
            }
        );
        reply(Err(ActionError::Transport("late".into())));
        assert!(!*fired.lock());
    }

    #[test]
    fn action_reply_reaches_caller() {
        let t = Arc::new(FakeTransport::default());
        let ch = open(&t, ChannelConfig::default());
        let result = Arc::new(Mutex::new(None));
        let slot = result.clone();
        ch.add_adjacent_block(BlockPos::ORIGIN, BlockFace::NegY, move |r| {
            *slot.lock() = Some(r);
        });
        let (_, reply) = t.actions.lock().pop().unwrap();
        reply(Err(ActionError::Rejected("adjacent block already exists".into())));
        assert_eq!(
            result.lock().take(),
            Some(Err(ActionError::Rejected(
                "adjacent block already exists".into()
            )))
        );
    }

    #[test]
    fn reconnect_replaces_session() {
        let t = Arc::new(FakeTransport::default());
        let ch = open(&t, ChannelConfig::default());
        let first = ch.session().clone();
        let old_sink = update_sink(&t, 0);

        let ch = ch.reconnect().unwrap();

        assert_eq!(ch.session().generation(), first.generation() + 1);
        assert_ne!(ch.session().client_id(), first.client_id());
        assert!(!old_sink.is_open());
        assert!(update_sink(&t, 1).is_open());
        assert_eq!(ch.status(), &StreamStatus::Connecting);
    }

    #[test]
    fn poll_timeout_waits_for_transport_thread() {
        let t = Arc::new(FakeTransport::default());
        let mut ch = open(&t, ChannelConfig::default());
        let sink = update_sink(&t, 0);
        let pusher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sink.status(StreamStatus::Open);
        });
        let event = ch.poll_timeout(Duration::from_secs(5));
        pusher.join().unwrap();
        assert!(matches!(event, Some(ChannelEvent::Status { .. })));
        assert_eq!(ch.status(), &StreamStatus::Open);
    }
}
