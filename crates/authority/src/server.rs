use crate::world::AuthorityWorld;
use blockview_common::BlockPos;
use blockview_stream::{
    ActionCallback, ActionError, ClientData, Metadata, StreamHandle, StreamSink, StreamStatus,
    Transport, TransportError, WorldAction, WorldUpdate,
};
use crossbeam_channel::{Receiver, SendError, Sender, unbounded};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

/// How the authority answers world actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplyMode {
    /// Answer as soon as the action is processed.
    #[default]
    Immediate,
    /// Process the action but keep the answer until [`LocalAuthority::release_replies`].
    Held,
    /// Do not process; answer with a transport failure.
    Unreachable,
}

pub(crate) enum Command {
    OpenUpdates {
        key: u64,
        client: ClientData,
        sink: StreamSink<WorldUpdate>,
    },
    OpenMetadata {
        key: u64,
        sink: StreamSink<Metadata>,
    },
    Close {
        key: u64,
    },
    Modify {
        action: WorldAction,
        reply: ActionCallback,
    },
    Place(BlockPos),
    Broadcast(WorldUpdate),
    EndStreams,
    FailStreams(String),
    SetReplyMode(ReplyMode),
    ReleaseReplies,
    Blocks(Sender<Vec<BlockPos>>),
    Flush(Sender<()>),
    Shutdown,
}

/// An authority running on its own thread inside this process.
///
/// Every stream, action and inspection request becomes a command processed
/// in order by one worker, so broadcasts reach clients in the order the
/// world changed. Callers never wait on the worker except through
/// [`LocalAuthority::flush`] and [`LocalAuthority::blocks`].
pub struct LocalAuthority {
    commands: Sender<Command>,
    next_key: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LocalAuthority {
    /// Start an authority whose world holds a single block at the origin.
    pub fn start() -> Self {
        Self::with_world(AuthorityWorld::new())
    }

    pub fn with_world(world: AuthorityWorld) -> Self {
        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("local-authority".into())
            .spawn(move || Worker::new(world).run(rx));
        let worker = match handle {
            Ok(h) => Some(h),
            Err(err) => {
                // The command receiver was dropped with the closure; every
                // request will report the authority as unavailable.
                tracing::error!(%err, "failed to spawn authority worker");
                None
            }
        };
        Self {
            commands: tx,
            next_key: AtomicU64::new(1),
            worker: Mutex::new(worker),
        }
    }

    pub fn set_reply_mode(&self, mode: ReplyMode) {
        let _ = self.commands.send(Command::SetReplyMode(mode));
    }

    /// Answer every held action reply, in the order they were processed.
    pub fn release_replies(&self) {
        let _ = self.commands.send(Command::ReleaseReplies);
    }

    /// Place a block directly and broadcast it, as the authority's own
    /// simulation would.
    pub fn place(&self, pos: BlockPos) {
        let _ = self.commands.send(Command::Place(pos));
    }

    /// Send a raw update to every open update stream without touching the
    /// authority's world.
    pub fn broadcast(&self, update: WorldUpdate) {
        let _ = self.commands.send(Command::Broadcast(update));
    }

    /// End every open stream normally.
    pub fn end_streams(&self) {
        let _ = self.commands.send(Command::EndStreams);
    }

    /// Fail every open stream with `reason`.
    pub fn fail_streams(&self, reason: impl Into<String>) {
        let _ = self.commands.send(Command::FailStreams(reason.into()));
    }

    /// Wait until every command sent so far has been processed.
    ///
    /// Do not call this from the thread that drains a channel using
    /// `OverflowPolicy::Block`: if that queue is full the worker waits for
    /// the drain while the caller waits for the worker.
    pub fn flush(&self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        if self.commands.send(Command::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// The authority's blocks after all earlier commands.
    ///
    /// Same caveat as [`LocalAuthority::flush`]: a full blocking queue owned
    /// by the calling thread deadlocks it.
    pub fn blocks(&self) -> Vec<BlockPos> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        if self.commands.send(Command::Blocks(tx)).is_err() {
            return Vec::new();
        }
        rx.recv().unwrap_or_default()
    }

    /// Stop the worker. Open streams are ended first. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!("authority worker panicked");
        }
    }

    pub(crate) fn command_sender(&self) -> Sender<Command> {
        self.commands.clone()
    }

    fn next_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for LocalAuthority {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Transport for LocalAuthority {
    fn open_updates(
        &self,
        client: &ClientData,
        sink: StreamSink<WorldUpdate>,
    ) -> Result<Box<dyn StreamHandle>, TransportError> {
        let key = self.next_key();
        self.commands
            .send(Command::OpenUpdates {
                key,
                client: client.clone(),
                sink,
            })
            .map_err(|_| TransportError::Unavailable("authority is shut down".into()))?;
        Ok(Box::new(AuthorityStream {
            key,
            commands: self.commands.clone(),
        }))
    }

    fn open_metadata(
        &self,
        sink: StreamSink<Metadata>,
    ) -> Result<Box<dyn StreamHandle>, TransportError> {
        let key = self.next_key();
        self.commands
            .send(Command::OpenMetadata { key, sink })
            .map_err(|_| TransportError::Unavailable("authority is shut down".into()))?;
        Ok(Box::new(AuthorityStream {
            key,
            commands: self.commands.clone(),
        }))
    }

    fn modify_world(&self, action: WorldAction, reply: ActionCallback) {
        if let Err(SendError(Command::Modify { reply, .. })) =
            self.commands.send(Command::Modify { action, reply })
        {
            reply(Err(ActionError::Transport("authority is shut down".into())));
        }
    }
}

/// Cancels one stream on the authority.
struct AuthorityStream {
    key: u64,
    commands: Sender<Command>,
}

impl StreamHandle for AuthorityStream {
    fn cancel(&mut self) {
        let _ = self.commands.send(Command::Close { key: self.key });
    }
}

struct UpdateClient {
    name: String,
    sink: StreamSink<WorldUpdate>,
}

struct Worker {
    world: AuthorityWorld,
    updates: BTreeMap<u64, UpdateClient>,
    metadata: BTreeMap<u64, StreamSink<Metadata>>,
    reply_mode: ReplyMode,
    held: Vec<(ActionCallback, Result<(), ActionError>)>,
}

impl Worker {
    fn new(world: AuthorityWorld) -> Self {
        Self {
            world,
            updates: BTreeMap::new(),
            metadata: BTreeMap::new(),
            reply_mode: ReplyMode::Immediate,
            held: Vec::new(),
        }
    }

    fn run(mut self, commands: Receiver<Command>) {
        let _span = tracing::info_span!("authority").entered();
        tracing::debug!(blocks = self.world.len(), "authority running");
        for command in commands.iter() {
            match command {
                Command::OpenUpdates { key, client, sink } => self.open_updates(key, client, sink),
                Command::OpenMetadata { key, sink } => {
                    sink.status(StreamStatus::Open);
                    sink.deliver(self.metadata_message());
                    self.metadata.insert(key, sink);
                }
                Command::Close { key } => {
                    if let Some(client) = self.updates.remove(&key) {
                        tracing::debug!(name = %client.name, "client left");
                        self.send_metadata();
                    }
                    self.metadata.remove(&key);
                }
                Command::Modify { action, reply } => self.modify(action, reply),
                Command::Place(pos) => {
                    let fresh = self.world.place(pos);
                    self.broadcast(WorldUpdate::block_added(pos));
                    if fresh {
                        self.send_metadata();
                    }
                }
                Command::Broadcast(update) => self.broadcast(update),
                Command::EndStreams => self.terminate_streams(StreamStatus::Ended),
                Command::FailStreams(reason) => {
                    self.terminate_streams(StreamStatus::Failed(reason));
                }
                Command::SetReplyMode(mode) => self.reply_mode = mode,
                Command::ReleaseReplies => {
                    for (reply, result) in self.held.drain(..) {
                        reply(result);
                    }
                }
                Command::Blocks(tx) => {
                    let _ = tx.send(self.world.blocks().collect());
                }
                Command::Flush(tx) => {
                    let _ = tx.send(());
                }
                Command::Shutdown => break,
            }
        }
        self.terminate_streams(StreamStatus::Ended);
        tracing::debug!("authority stopped");
    }

    fn open_updates(&mut self, key: u64, client: ClientData, sink: StreamSink<WorldUpdate>) {
        tracing::debug!(name = %client.name, replay = client.send_existing_state, "client connected");
        sink.status(StreamStatus::Open);
        if client.send_existing_state {
            for pos in self.world.blocks() {
                if !sink.deliver(WorldUpdate::block_added(pos)) {
                    return;
                }
            }
        }
        self.updates.insert(
            key,
            UpdateClient {
                name: client.name,
                sink,
            },
        );
        self.send_metadata();
    }

    fn modify(&mut self, action: WorldAction, reply: ActionCallback) {
        let result = match self.reply_mode {
            ReplyMode::Unreachable => Err(ActionError::Transport("authority unreachable".into())),
            ReplyMode::Immediate | ReplyMode::Held => match action {
                WorldAction::AddAdjacentBlock { existing, face } => {
                    match self.world.add_adjacent_block(existing, face) {
                        Ok(pos) => {
                            self.broadcast(WorldUpdate::block_added(pos));
                            self.send_metadata();
                            Ok(())
                        }
                        Err(err) => Err(ActionError::Rejected(err.to_string())),
                    }
                }
            },
        };
        if self.reply_mode == ReplyMode::Held {
            self.held.push((reply, result));
        } else {
            reply(result);
        }
    }

    fn broadcast(&mut self, update: WorldUpdate) {
        let before = self.updates.len();
        self.updates
            .retain(|_, client| client.sink.deliver(update.clone()));
        if self.updates.len() != before {
            tracing::debug!(gone = before - self.updates.len(), "dropped closed clients");
            self.send_metadata();
        }
    }

    fn metadata_message(&self) -> Metadata {
        Metadata {
            total_blocks: self.world.len() as u64,
            clients: self
                .updates
                .iter()
                .map(|(key, c)| (format!("stream-{key}"), c.name.clone()))
                .collect(),
        }
    }

    fn send_metadata(&mut self) {
        let message = self.metadata_message();
        self.metadata.retain(|_, sink| sink.deliver(message.clone()));
    }

    fn terminate_streams(&mut self, status: StreamStatus) {
        for (_, client) in std::mem::take(&mut self.updates) {
            client.sink.status(status.clone());
        }
        for (_, sink) in std::mem::take(&mut self.metadata) {
            sink.status(status.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockview_common::BlockFace;
    use blockview_stream::{ChannelConfig, ChannelEvent, StreamKind, UpdateChannel};
    use std::sync::Arc;
    use std::time::Duration;

    fn connect(authority: &Arc<LocalAuthority>, config: ChannelConfig) -> UpdateChannel {
        let transport: Arc<dyn Transport> = authority.clone();
        UpdateChannel::open(transport, config).unwrap()
    }

    fn updates(events: &[ChannelEvent]) -> Vec<WorldUpdate> {
        events
            .iter()
            .filter_map(|e| match e {
                ChannelEvent::Update(u) => Some(u.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn replays_existing_state_on_connect() {
        let authority = Arc::new(LocalAuthority::start());
        let mut ch = connect(&authority, ChannelConfig::default());
        authority.flush();

        let events = ch.drain();
        assert_eq!(
            updates(&events),
            vec![WorldUpdate::block_added(BlockPos::ORIGIN)]
        );
        assert_eq!(ch.status(), &StreamStatus::Open);
        assert_eq!(ch.metadata_status(), Some(&StreamStatus::Open));
    }

    #[test]
    fn no_replay_when_not_requested() {
        let authority = Arc::new(LocalAuthority::start());
        let mut ch = connect(
            &authority,
            ChannelConfig {
                send_existing_state: false,
                ..ChannelConfig::default()
            },
        );
        authority.flush();
        assert!(updates(&ch.drain()).is_empty());
    }

    #[test]
    fn metadata_lists_connected_clients() {
        let authority = Arc::new(LocalAuthority::start());
        let mut ch = connect(&authority, ChannelConfig::default());
        authority.flush();

        let latest = ch
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                ChannelEvent::Metadata(m) => Some(m),
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!(latest.total_blocks, 1);
        let name = ch.session().client_id().to_string();
        assert!(latest.clients.values().any(|n| *n == name));
    }

    #[test]
    fn accepted_action_is_broadcast_to_every_client() {
        let authority = Arc::new(LocalAuthority::start());
        let mut a = connect(&authority, ChannelConfig::default());
        let mut b = connect(&authority, ChannelConfig::default());
        authority.flush();
        a.drain();
        b.drain();

        let (tx, rx) = crossbeam_channel::bounded(1);
        a.add_adjacent_block(BlockPos::ORIGIN, BlockFace::PosX, move |r| {
            let _ = tx.send(r);
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok(()));
        authority.flush();

        let expected = vec![WorldUpdate::block_added(BlockPos::new(1, 0, 0))];
        assert_eq!(updates(&a.drain()), expected);
        assert_eq!(updates(&b.drain()), expected);
    }

    #[test]
    fn rejected_action_reports_authority_error() {
        let authority = Arc::new(LocalAuthority::start());
        let ch = connect(&authority, ChannelConfig::default());
        let (tx, rx) = crossbeam_channel::bounded(1);
        ch.add_adjacent_block(BlockPos::new(9, 9, 9), BlockFace::PosX, move |r| {
            let _ = tx.send(r);
        });
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(ActionError::Rejected("existing block does not exist".into()))
        );
    }

    #[test]
    fn placement_past_lattice_edge_is_rejected() {
        let authority = Arc::new(LocalAuthority::start());
        let edge = BlockPos::new(i32::MAX, 0, 0);
        authority.place(edge);
        let ch = connect(&authority, ChannelConfig::default());
        let (tx, rx) = crossbeam_channel::bounded(1);
        ch.add_adjacent_block(edge, BlockFace::PosX, move |r| {
            let _ = tx.send(r);
        });
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(ActionError::Rejected(
                "adjacent position is outside the world".into()
            ))
        );
        // The worker is still serving.
        assert_eq!(authority.blocks(), vec![BlockPos::ORIGIN, edge]);
    }

    #[test]
    fn unreachable_mode_reports_transport_failure() {
        let authority = Arc::new(LocalAuthority::start());
        authority.set_reply_mode(ReplyMode::Unreachable);
        let ch = connect(&authority, ChannelConfig::default());
        let (tx, rx) = crossbeam_channel::bounded(1);
        ch.add_adjacent_block(BlockPos::ORIGIN, BlockFace::PosZ, move |r| {
            let _ = tx.send(r);
        });
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(ActionError::Transport(_))
        ));
        assert_eq!(authority.blocks(), vec![BlockPos::ORIGIN]);
    }

    #[test]
    fn closed_client_is_deregistered() {
        let authority = Arc::new(LocalAuthority::start());
        let mut watcher = connect(&authority, ChannelConfig::default());
        let mut leaver = connect(&authority, ChannelConfig::default());
        authority.flush();
        watcher.drain();

        leaver.close();
        authority.flush();

        let latest = watcher
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                ChannelEvent::Metadata(m) => Some(m),
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!(latest.clients.len(), 1);
    }

    #[test]
    fn fail_streams_surfaces_reason() {
        let authority = Arc::new(LocalAuthority::start());
        let mut ch = connect(&authority, ChannelConfig::default());
        authority.fail_streams("connection reset");
        authority.flush();

        let events = ch.drain();
        assert!(events.contains(&ChannelEvent::StreamEnded {
            stream: StreamKind::Updates
        }));
        assert_eq!(ch.status(), &StreamStatus::Failed("connection reset".into()));
    }

    #[test]
    fn shutdown_ends_streams_and_refuses_new_ones() {
        let authority = Arc::new(LocalAuthority::start());
        let mut ch = connect(&authority, ChannelConfig::default());
        authority.shutdown();
        ch.drain();
        assert_eq!(ch.status(), &StreamStatus::Ended);

        let transport: Arc<dyn Transport> = authority.clone();
        let err = UpdateChannel::open(transport, ChannelConfig::default()).unwrap_err();
        assert!(err.to_string().contains("shut down"));
    }

    #[test]
    fn held_replies_fire_on_release() {
        let authority = Arc::new(LocalAuthority::start());
        authority.set_reply_mode(ReplyMode::Held);
        let ch = connect(&authority, ChannelConfig::default());
        let (tx, rx) = crossbeam_channel::bounded(1);
        ch.add_adjacent_block(BlockPos::ORIGIN, BlockFace::NegX, move |r| {
            let _ = tx.send(r);
        });
        authority.flush();
        assert!(rx.try_recv().is_err());

        authority.release_replies();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok(()));
    }
}
