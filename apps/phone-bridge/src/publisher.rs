//! Debounced publication of bound-session state to connected wear peers.
//!
//! Each snapshot kind has its own `watch` slot. A native callback replaces the slot
//! value, and a per-kind task waits until the slot has been quiet for the debounce
//! window before computing and sending the snapshot from the latest value only.
//! Volume and app info skip the window but keep one sender task per kind, so a slow
//! send can delay a newer value and never overtake it. Replies and app lists are
//! delivered in order through a single outbound queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use media_proto::{
    codec, paths, ActionSet, AppInfo, BrowseList, QueueSnapshot, Reply, VolumeStatus,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use transport_bus::{send_over_channel, PeerId, Target, Transport};

use crate::config::BridgeConfig;
use crate::metrics;
use crate::native::{
    AudioInfo, NativeBrowseItem, NativeCustomAction, NativeMetadata, NativePlayback,
    NativeQueueItem,
};
use crate::peers::ConnectedPeers;
use crate::snapshot::{self, render_blocking, ArtworkPolicy};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerSource {
    pub playback: Option<NativePlayback>,
    pub metadata: Option<NativeMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionSource {
    pub custom: Vec<NativeCustomAction>,
    pub searchable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueSource {
    pub items: Vec<NativeQueueItem>,
    pub active_queue_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowseSource {
    pub parent_id: String,
    pub depth: usize,
    pub items: Vec<NativeBrowseItem>,
}

/// Per-peer traffic that must arrive in the order it was produced.
enum Outbound {
    Reply {
        peer: PeerId,
        path: &'static str,
        reply: Reply,
    },
    AppList {
        peer: PeerId,
        apps: Vec<AppInfo>,
    },
}

/// Handle to the publisher. Clones share the same slots; the sender tasks stop
/// when the last clone is dropped.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<Inner>,
}

struct Inner {
    shared: Arc<Shared>,
    player: watch::Sender<PlayerSource>,
    artwork: watch::Sender<Option<Bytes>>,
    actions: watch::Sender<Option<ActionSource>>,
    queue: watch::Sender<Option<QueueSource>>,
    browse: watch::Sender<Option<BrowseSource>>,
    volume: watch::Sender<Option<VolumeStatus>>,
    app_info: watch::Sender<Option<AppInfo>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    peers: ConnectedPeers,
    artwork_policy: ArtworkPolicy,
    icon_edge: u32,
    /// Outer `None` means nothing has been sent yet.
    last_queue: Mutex<Option<Option<QueueSnapshot>>>,
    last_artwork: Mutex<Option<Bytes>>,
    last_app_info: Mutex<Option<AppInfo>>,
    last_volume: Mutex<Option<VolumeStatus>>,
}

impl Publisher {
    /// Must be called from within a Tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, peers: ConnectedPeers, config: &BridgeConfig) -> Self {
        let shared = Arc::new(Shared {
            transport,
            peers,
            artwork_policy: config.artwork,
            icon_edge: config.icon_max_edge,
            last_queue: Mutex::new(None),
            last_artwork: Mutex::new(None),
            last_app_info: Mutex::new(None),
            last_volume: Mutex::new(None),
        });
        let window = config.debounce;

        let (player, player_rx) = watch::channel(PlayerSource::default());
        let (artwork, artwork_rx) = watch::channel(None::<Bytes>);
        let (actions, actions_rx) = watch::channel(None::<ActionSource>);
        let (queue, queue_rx) = watch::channel(None::<QueueSource>);
        let (browse, browse_rx) = watch::channel(None::<BrowseSource>);
        let (volume, volume_rx) = watch::channel(None::<VolumeStatus>);
        let (app_info, app_info_rx) = watch::channel(None::<AppInfo>);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

        let tasks = vec![
            spawn_debounced(player_rx, window, {
                let shared = Arc::clone(&shared);
                move |source| {
                    let shared = Arc::clone(&shared);
                    async move { shared.publish_player(source).await }
                }
            }),
            spawn_debounced(artwork_rx, window, {
                let shared = Arc::clone(&shared);
                move |raw| {
                    let shared = Arc::clone(&shared);
                    async move { shared.publish_artwork(raw).await }
                }
            }),
            spawn_debounced(actions_rx, window, {
                let shared = Arc::clone(&shared);
                move |source| {
                    let shared = Arc::clone(&shared);
                    async move { shared.publish_actions(source).await }
                }
            }),
            spawn_debounced(queue_rx, window, {
                let shared = Arc::clone(&shared);
                move |source| {
                    let shared = Arc::clone(&shared);
                    async move { shared.publish_queue(source).await }
                }
            }),
            spawn_debounced(browse_rx, window, {
                let shared = Arc::clone(&shared);
                move |source| {
                    let shared = Arc::clone(&shared);
                    async move { shared.publish_browse(source).await }
                }
            }),
            spawn_latest(volume_rx, {
                let shared = Arc::clone(&shared);
                move |status| {
                    let shared = Arc::clone(&shared);
                    async move {
                        if let Some(status) = status {
                            shared.publish_volume(status).await;
                        }
                    }
                }
            }),
            spawn_latest(app_info_rx, {
                let shared = Arc::clone(&shared);
                move |info| {
                    let shared = Arc::clone(&shared);
                    async move { shared.publish_app_info(info).await }
                }
            }),
            tokio::spawn({
                let shared = Arc::clone(&shared);
                async move {
                    while let Some(item) = outbound_rx.recv().await {
                        shared.deliver(item).await;
                    }
                }
            }),
        ];

        Self {
            inner: Arc::new(Inner {
                shared,
                player,
                artwork,
                actions,
                queue,
                browse,
                volume,
                app_info,
                outbound,
                tasks,
            }),
        }
    }

    pub fn peers(&self) -> &ConnectedPeers {
        &self.inner.shared.peers
    }

    pub fn update_player(&self, playback: Option<NativePlayback>, metadata: Option<NativeMetadata>) {
        let art = metadata.as_ref().and_then(|m| m.art.clone());
        self.inner.player.send_replace(PlayerSource { playback, metadata });
        self.inner.artwork.send_if_modified(|current| {
            if *current == art {
                false
            } else {
                *current = art;
                true
            }
        });
    }

    pub fn update_actions(&self, source: Option<ActionSource>) {
        self.inner.actions.send_replace(source);
    }

    pub fn update_queue(&self, source: Option<QueueSource>) {
        self.inner.queue.send_replace(source);
    }

    pub fn update_browse(&self, source: Option<BrowseSource>) {
        self.inner.browse.send_replace(source);
    }

    /// Replaces every debounced slot with its empty value, which publishes the
    /// unavailable player snapshot and tombstones for the collections.
    pub fn clear_all(&self) {
        self.update_player(None, None);
        self.update_actions(None);
        self.update_queue(None);
        self.update_browse(None);
    }

    /// Sent right away: volume changes follow user adjustments closely.
    pub fn publish_volume(&self, audio: AudioInfo) {
        let status = VolumeStatus {
            current: audio.current_volume,
            max: audio.max_volume,
        };
        *self.inner.shared.last_volume.lock() = Some(status);
        self.inner.volume.send_replace(Some(status));
    }

    /// `None` deletes the replicated item and sends an empty message.
    pub fn publish_app_info(&self, info: Option<AppInfo>) {
        *self.inner.shared.last_app_info.lock() = info.clone();
        self.inner.app_info.send_replace(info);
    }

    pub fn send_app_list(&self, peer: PeerId, apps: Vec<AppInfo>) {
        self.enqueue(Outbound::AppList { peer, apps });
    }

    pub fn reply(&self, peer: PeerId, path: &'static str, reply: Reply) {
        self.enqueue(Outbound::Reply { peer, path, reply });
    }

    fn enqueue(&self, item: Outbound) {
        if self.inner.outbound.send(item).is_err() {
            warn!(target = "bridge.publisher", "outbound queue closed; dropping message");
        }
    }

    /// Sends the current state of every kind to a newly connected peer without
    /// waiting for the next native callback.
    pub async fn sync_peer(&self, peer: &str) {
        let inner = &self.inner;
        let shared = &inner.shared;
        let target = vec![peer.to_string()];

        let player = inner.player.borrow().clone();
        if let Some(payload) = shared.player_payload(&player) {
            shared
                .message_to(target.clone(), paths::PLAYER_STATE, Some(payload))
                .await;
        }
        let artwork = shared.last_artwork.lock().clone();
        if artwork.is_some() {
            shared
                .message_to(target.clone(), paths::ARTWORK, artwork)
                .await;
        }
        let app_info = shared.last_app_info.lock().clone();
        if let Some(info) = app_info {
            if let Some(payload) = encode_or_warn(paths::PLAYER_APP_INFO, &info) {
                shared
                    .message_to(target.clone(), paths::PLAYER_APP_INFO, Some(payload))
                    .await;
            }
        }
        let volume = *shared.last_volume.lock();
        if let Some(status) = volume {
            shared
                .message_to(target.clone(), paths::VOLUME_STATUS, Some(status.encode()))
                .await;
        }

        let edge = shared.icon_edge;
        let actions = inner.actions.borrow().clone();
        if let Some(actions) = render_blocking("actions", move || action_payload(actions, edge)).await {
            if let Some(payload) = encode_or_warn(paths::ACTIONS_LIST, &actions) {
                shared
                    .channel_to(target.clone(), paths::ACTIONS_LIST, payload)
                    .await;
            }
        }
        let queue = inner.queue.borrow().clone();
        if let Some(queue) = render_blocking("queue", move || queue_payload(queue, edge)).await {
            if let Some(payload) = encode_or_warn(paths::QUEUE_LIST, &queue) {
                shared
                    .channel_to(target.clone(), paths::QUEUE_LIST, payload)
                    .await;
            }
        }
        let browse = inner.browse.borrow().clone();
        if let Some(browse) = render_blocking("browse", move || browse_payload(browse, edge)).await {
            if let Some(payload) = encode_or_warn(paths::BROWSE_LIST, &browse) {
                shared.channel_to(target, paths::BROWSE_LIST, payload).await;
            }
        }
        debug!(target = "bridge.publisher", peer, "synced new peer");
    }
}

fn action_payload(source: Option<ActionSource>, icon_edge: u32) -> Option<ActionSet> {
    source
        .map(|s| snapshot::action_set(&s.custom, s.searchable, icon_edge))
        .filter(|set| !set.is_empty())
}

fn queue_payload(source: Option<QueueSource>, icon_edge: u32) -> Option<QueueSnapshot> {
    source
        .map(|s| snapshot::queue_snapshot(&s.items, s.active_queue_id, icon_edge))
        .filter(|queue| !queue.is_empty())
}

fn browse_payload(source: Option<BrowseSource>, icon_edge: u32) -> Option<BrowseList> {
    source
        .map(|s| snapshot::browse_list(&s.parent_id, s.depth, &s.items, icon_edge))
        .filter(|list| !list.items.is_empty())
}

impl Shared {
    fn player_payload(&self, source: &PlayerSource) -> Option<Bytes> {
        let snapshot =
            snapshot::player_snapshot(source.playback.as_ref(), source.metadata.as_ref());
        encode_or_warn(paths::PLAYER_STATE, &snapshot)
    }

    async fn publish_player(&self, source: PlayerSource) {
        let Some(payload) = self.player_payload(&source) else {
            return;
        };
        self.message_to_peers(paths::PLAYER_STATE, Some(payload.clone()))
            .await;
        if let Err(err) = self.transport.put_data(paths::PLAYER_STATE, payload).await {
            warn!(target = "bridge.publisher", error = %err, "failed to replicate player state");
        }
        metrics::SNAPSHOTS_PUBLISHED.with_label_values(&["player"]).inc();
    }

    async fn publish_artwork(&self, raw: Option<Bytes>) {
        let policy = self.artwork_policy;
        let compressed = match raw {
            Some(raw) => render_blocking("artwork", move || {
                snapshot::compress_artwork(&raw, &policy)
            })
            .await
            .flatten(),
            None => None,
        };
        *self.last_artwork.lock() = compressed.clone();

        match compressed {
            Some(jpeg) => {
                trace!(target = "bridge.publisher", bytes = jpeg.len(), "publishing artwork");
                self.message_to_peers(paths::ARTWORK, Some(jpeg.clone())).await;
                if let Err(err) = self.transport.put_data(paths::ARTWORK, jpeg).await {
                    warn!(target = "bridge.publisher", error = %err, "failed to replicate artwork");
                }
            }
            None => {
                self.message_to_peers(paths::ARTWORK, None).await;
                if let Err(err) = self.transport.delete_data(paths::ARTWORK).await {
                    warn!(target = "bridge.publisher", error = %err, "failed to delete artwork");
                }
            }
        }
        metrics::SNAPSHOTS_PUBLISHED.with_label_values(&["artwork"]).inc();
    }

    async fn publish_actions(&self, source: Option<ActionSource>) {
        let edge = self.icon_edge;
        if let Some(actions) = render_blocking("actions", move || action_payload(source, edge)).await {
            self.publish_collection(paths::ACTIONS_LIST, "actions", &actions)
                .await;
        }
    }

    async fn publish_queue(&self, source: Option<QueueSource>) {
        let edge = self.icon_edge;
        let Some(queue) = render_blocking("queue", move || queue_payload(source, edge)).await else {
            return;
        };
        {
            let mut last = self.last_queue.lock();
            if last.as_ref() == Some(&queue) {
                debug!(target = "bridge.publisher", "queue unchanged; skipping");
                metrics::SNAPSHOTS_SUPPRESSED.with_label_values(&["queue"]).inc();
                return;
            }
            *last = Some(queue.clone());
        }
        self.publish_collection(paths::QUEUE_LIST, "queue", &queue)
            .await;
    }

    async fn publish_browse(&self, source: Option<BrowseSource>) {
        let edge = self.icon_edge;
        if let Some(browse) = render_blocking("browse", move || browse_payload(source, edge)).await {
            self.publish_collection(paths::BROWSE_LIST, "browse", &browse)
                .await;
        }
    }

    /// Channel send to every peer plus the replicated copy; `None` goes out as a
    /// `null` body and deletes the replicated item.
    async fn publish_collection<T: Serialize>(
        &self,
        path: &'static str,
        kind: &'static str,
        value: &Option<T>,
    ) {
        let Some(payload) = encode_or_warn(path, value) else {
            return;
        };
        self.channel_to_peers(path, payload.clone()).await;
        let replicated = match value {
            Some(_) => self.transport.put_data(path, payload).await,
            None => self.transport.delete_data(path).await,
        };
        if let Err(err) = replicated {
            warn!(target = "bridge.publisher", path, error = %err, "failed to replicate collection");
        }
        metrics::SNAPSHOTS_PUBLISHED.with_label_values(&[kind]).inc();
    }

    async fn publish_volume(&self, status: VolumeStatus) {
        self.message_to_peers(paths::VOLUME_STATUS, Some(status.encode()))
            .await;
        metrics::SNAPSHOTS_PUBLISHED.with_label_values(&["volume"]).inc();
    }

    async fn publish_app_info(&self, info: Option<AppInfo>) {
        match info {
            Some(info) => {
                let Some(payload) = encode_or_warn(paths::PLAYER_APP_INFO, &info) else {
                    return;
                };
                self.message_to_peers(paths::PLAYER_APP_INFO, Some(payload.clone()))
                    .await;
                if let Err(err) = self.transport.put_data(paths::PLAYER_APP_INFO, payload).await {
                    warn!(target = "bridge.publisher", error = %err, "failed to replicate app info");
                }
            }
            None => {
                self.message_to_peers(paths::PLAYER_APP_INFO, None).await;
                if let Err(err) = self.transport.delete_data(paths::PLAYER_APP_INFO).await {
                    warn!(target = "bridge.publisher", error = %err, "failed to delete app info");
                }
            }
        }
        metrics::SNAPSHOTS_PUBLISHED.with_label_values(&["app_info"]).inc();
    }

    async fn deliver(&self, item: Outbound) {
        match item {
            Outbound::Reply { peer, path, reply } => {
                let result = self
                    .transport
                    .send_message(Target::Peer(peer.clone()), path, Some(reply.encode()))
                    .await;
                if let Err(err) = result {
                    warn!(
                        target = "bridge.publisher",
                        peer = %peer,
                        path,
                        error = %err,
                        "failed to send reply"
                    );
                    metrics::PEER_SEND_FAILURES.with_label_values(&[path]).inc();
                }
            }
            Outbound::AppList { peer, apps } => {
                let Some(payload) = encode_or_warn(paths::APP_LIST, &apps) else {
                    return;
                };
                self.channel_to(vec![peer], paths::APP_LIST, payload).await;
                metrics::SNAPSHOTS_PUBLISHED.with_label_values(&["app_list"]).inc();
            }
        }
    }

    async fn message_to_peers(&self, path: &'static str, payload: Option<Bytes>) {
        let peers = self.peers.snapshot();
        self.message_to(peers, path, payload).await;
    }

    async fn channel_to_peers(&self, path: &'static str, payload: Bytes) {
        let peers = self.peers.snapshot();
        self.channel_to(peers, path, payload).await;
    }

    /// Concurrent per-peer send; a failing peer is logged and does not affect the rest.
    async fn message_to(&self, peers: Vec<PeerId>, path: &'static str, payload: Option<Bytes>) {
        let sends = peers.into_iter().map(|peer| {
            let payload = payload.clone();
            async move {
                let result = self
                    .transport
                    .send_message(Target::Peer(peer.clone()), path, payload)
                    .await;
                (peer, result)
            }
        });
        for (peer, result) in join_all(sends).await {
            if let Err(err) = result {
                warn!(
                    target = "bridge.publisher",
                    peer = %peer,
                    path,
                    error = %err,
                    "peer message failed"
                );
                metrics::PEER_SEND_FAILURES.with_label_values(&[path]).inc();
            }
        }
    }

    async fn channel_to(&self, peers: Vec<PeerId>, path: &'static str, payload: Bytes) {
        let sends = peers.into_iter().map(|peer| {
            let payload = payload.clone();
            async move {
                let result =
                    send_over_channel(self.transport.as_ref(), &peer, path, &payload).await;
                (peer, result)
            }
        });
        for (peer, result) in join_all(sends).await {
            if let Err(err) = result {
                warn!(
                    target = "bridge.publisher",
                    peer = %peer,
                    path,
                    error = %err,
                    "peer channel send failed"
                );
                metrics::PEER_SEND_FAILURES.with_label_values(&[path]).inc();
            }
        }
    }
}

fn encode_or_warn<T: Serialize + ?Sized>(path: &'static str, value: &T) -> Option<Bytes> {
    match codec::encode_json(value) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(target = "bridge.publisher", path, error = %err, "failed to encode snapshot");
            None
        }
    }
}

/// Runs `fire` with the slot value once the slot has stayed unchanged for `window`.
/// Every change inside the window restarts it.
fn spawn_debounced<T, F, Fut>(
    mut rx: watch::Receiver<T>,
    window: Duration,
    mut fire: F,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(window) => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
            let value = rx.borrow_and_update().clone();
            fire(value).await;
        }
    })
}

/// Runs `fire` for every change, one call at a time. Changes made while `fire` is
/// running collapse into the latest value.
fn spawn_latest<T, F, Fut>(mut rx: watch::Receiver<T>, mut fire: F) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let value = rx.borrow_and_update().clone();
            fire(value).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativePlaybackState;
    use async_trait::async_trait;
    use media_proto::{PlaybackState, PlayerSnapshot, Status};
    use std::sync::atomic::{AtomicBool, Ordering};
    use test_timeout::{paused_time_test, tokio_timeout_test};
    use tokio::sync::broadcast;
    use transport_bus::{BusResult, ChannelFrame, ChannelWriter, DataEvent, LocalHub, LocalNode, Message};

    /// Holds back the first message sent on `path`; everything else goes straight through.
    struct StallFirstSend {
        node: LocalNode,
        path: &'static str,
        delay: Duration,
        stalled: AtomicBool,
    }

    impl StallFirstSend {
        fn new(node: LocalNode, path: &'static str) -> Self {
            Self {
                node,
                path,
                delay: Duration::from_millis(100),
                stalled: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Transport for StallFirstSend {
        fn local_id(&self) -> &str {
            self.node.local_id()
        }

        async fn connected_peers(&self) -> BusResult<Vec<PeerId>> {
            self.node.connected_peers().await
        }

        async fn send_message(
            &self,
            target: Target,
            path: &str,
            payload: Option<Bytes>,
        ) -> BusResult<()> {
            if path == self.path && !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(self.delay).await;
            }
            self.node.send_message(target, path, payload).await
        }

        fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
            self.node.subscribe_messages()
        }

        async fn open_channel(&self, peer: &str, path: &str) -> BusResult<Box<dyn ChannelWriter>> {
            self.node.open_channel(peer, path).await
        }

        fn subscribe_channels(&self) -> broadcast::Receiver<ChannelFrame> {
            self.node.subscribe_channels()
        }

        async fn put_data(&self, path: &str, payload: Bytes) -> BusResult<()> {
            self.node.put_data(path, payload).await
        }

        async fn delete_data(&self, path: &str) -> BusResult<()> {
            self.node.delete_data(path).await
        }

        async fn get_data(&self, path: &str) -> BusResult<Option<Bytes>> {
            self.node.get_data(path).await
        }

        fn subscribe_data(&self) -> broadcast::Receiver<DataEvent> {
            self.node.subscribe_data()
        }
    }

    fn stalled_setup(path: &'static str) -> (LocalHub, Publisher) {
        let hub = LocalHub::new();
        let transport = StallFirstSend::new(hub.node("phone"), path);
        let peers = ConnectedPeers::new();
        peers.insert("watch");
        let publisher = Publisher::new(Arc::new(transport), peers, &config());
        (hub, publisher)
    }

    fn config() -> BridgeConfig {
        BridgeConfig::default()
    }

    fn setup(peers: &[&str]) -> (LocalHub, Publisher) {
        let hub = LocalHub::new();
        let phone = hub.node("phone");
        let connected = ConnectedPeers::new();
        for peer in peers {
            connected.insert(peer);
        }
        let publisher = Publisher::new(Arc::new(phone), connected, &config());
        (hub, publisher)
    }

    fn playing(title: &str, position_ms: i64) -> (Option<NativePlayback>, Option<NativeMetadata>) {
        let mut playback = NativePlayback::new(NativePlaybackState::Playing);
        playback.position_ms = position_ms;
        let metadata = NativeMetadata {
            title: Some(title.to_string()),
            artist: Some("Band".into()),
            duration_ms: 200_000,
            ..NativeMetadata::default()
        };
        (Some(playback), Some(metadata))
    }

    fn drain_messages(rx: &mut broadcast::Receiver<Message>, path: &str) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if message.path == path {
                out.push(message);
            }
        }
        out
    }

    fn drain_frames(rx: &mut broadcast::Receiver<ChannelFrame>, path: &str) -> Vec<ChannelFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if frame.path == path {
                out.push(frame);
            }
        }
        out
    }

    #[paused_time_test]
    async fn burst_inside_window_publishes_only_the_last_snapshot() {
        let (hub, publisher) = setup(&["watch"]);
        let mut inbox = hub.node("watch").subscribe_messages();

        for (step, title) in ["One", "Two", "Three"].iter().enumerate() {
            let (playback, metadata) = playing(title, step as i64 * 1_000);
            publisher.update_player(playback, metadata);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let sent = drain_messages(&mut inbox, paths::PLAYER_STATE);
        assert_eq!(sent.len(), 1);
        let snapshot: PlayerSnapshot =
            codec::decode_json(sent[0].payload.as_deref().expect("payload")).expect("decode");
        assert_eq!(snapshot.title.as_deref(), Some("Three"));
        assert_eq!(snapshot.position_ms, 2_000);
        assert_eq!(snapshot.playback_state, PlaybackState::Playing);
    }

    #[paused_time_test]
    async fn player_state_is_replicated_even_without_peers() {
        let (hub, publisher) = setup(&[]);
        let (playback, metadata) = playing("Solo", 0);
        publisher.update_player(playback, metadata);
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let stored = hub
            .data_snapshot()
            .get(paths::PLAYER_STATE)
            .cloned()
            .expect("replicated");
        let snapshot: PlayerSnapshot = codec::decode_json(&stored).expect("decode");
        assert_eq!(snapshot.title.as_deref(), Some("Solo"));
    }

    #[paused_time_test]
    async fn identical_queue_is_sent_once() {
        let (hub, publisher) = setup(&["watch"]);
        let mut frames = hub.node("watch").subscribe_channels();
        let queue = QueueSource {
            items: vec![NativeQueueItem {
                queue_id: 7,
                title: "Song".into(),
                subtitle: None,
                icon: None,
            }],
            active_queue_id: Some(7),
        };

        publisher.update_queue(Some(queue.clone()));
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        publisher.update_queue(Some(queue));
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let sent = drain_frames(&mut frames, paths::QUEUE_LIST);
        assert_eq!(sent.len(), 1);
        let decoded: Option<QueueSnapshot> = codec::decode_json(&sent[0].payload).expect("decode");
        assert_eq!(decoded.map(|q| q.active_queue_id), Some(Some(7)));
    }

    #[paused_time_test]
    async fn empty_collections_are_sent_as_null() {
        let (hub, publisher) = setup(&["watch"]);
        let mut frames = hub.node("watch").subscribe_channels();

        publisher.update_actions(Some(ActionSource {
            custom: Vec::new(),
            searchable: false,
        }));
        publisher.update_browse(None);
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let actions = drain_frames(&mut frames, paths::ACTIONS_LIST);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].payload.as_ref(), b"null");
    }

    #[paused_time_test]
    async fn unreachable_peer_does_not_block_the_others() {
        let (hub, publisher) = setup(&["watch-a", "watch-b"]);
        let mut inbox = hub.node("watch-b").subscribe_messages();
        hub.node("watch-a");
        hub.set_reachable("watch-a", false);

        let (playback, metadata) = playing("Shared", 0);
        publisher.update_player(playback, metadata);
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        assert_eq!(drain_messages(&mut inbox, paths::PLAYER_STATE).len(), 1);
    }

    #[paused_time_test]
    async fn clear_all_publishes_unavailable_snapshot() {
        let (hub, publisher) = setup(&["watch"]);
        let mut inbox = hub.node("watch").subscribe_messages();
        let (playback, metadata) = playing("Gone soon", 0);
        publisher.update_player(playback, metadata);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        publisher.clear_all();
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let sent = drain_messages(&mut inbox, paths::PLAYER_STATE);
        let last: PlayerSnapshot =
            codec::decode_json(sent.last().and_then(|m| m.payload.as_deref()).expect("payload"))
                .expect("decode");
        assert_eq!(last, PlayerSnapshot::cleared());
    }

    #[tokio_timeout_test]
    async fn volume_is_sent_without_debounce() {
        let (hub, publisher) = setup(&["watch"]);
        let mut inbox = hub.node("watch").subscribe_messages();
        publisher.publish_volume(AudioInfo {
            current_volume: 3,
            max_volume: 10,
        });

        let message = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .expect("in time")
            .expect("message");
        assert_eq!(message.path, paths::VOLUME_STATUS);
        let status = VolumeStatus::decode(message.payload.as_deref().expect("payload")).expect("decode");
        assert_eq!((status.current, status.max), (3, 10));
    }

    #[paused_time_test]
    async fn slow_volume_send_is_never_overtaken() {
        let (hub, publisher) = stalled_setup(paths::VOLUME_STATUS);
        let mut inbox = hub.node("watch").subscribe_messages();

        publisher.publish_volume(AudioInfo {
            current_volume: 3,
            max_volume: 10,
        });
        tokio::task::yield_now().await;
        publisher.publish_volume(AudioInfo {
            current_volume: 7,
            max_volume: 10,
        });
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let levels: Vec<i32> = drain_messages(&mut inbox, paths::VOLUME_STATUS)
            .iter()
            .filter_map(|m| m.payload.as_deref())
            .filter_map(|p| VolumeStatus::decode(p).ok())
            .map(|status| status.current)
            .collect();
        assert_eq!(levels.last(), Some(&7));
        assert!(levels.len() <= 2);
    }

    #[paused_time_test]
    async fn app_info_removal_cannot_land_after_a_newer_value() {
        let (hub, publisher) = stalled_setup(paths::PLAYER_APP_INFO);
        let info = AppInfo {
            package: "com.example.music".into(),
            label: "Example Music".into(),
            icon: None,
            searchable: true,
        };

        publisher.publish_app_info(None);
        tokio::task::yield_now().await;
        publisher.publish_app_info(Some(info.clone()));
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let stored = hub
            .data_snapshot()
            .get(paths::PLAYER_APP_INFO)
            .cloned()
            .expect("app info replicated");
        let decoded: AppInfo = codec::decode_json(&stored).expect("decode");
        assert_eq!(decoded, info);
    }

    #[paused_time_test]
    async fn replies_keep_their_order_behind_a_slow_send() {
        let (hub, publisher) = stalled_setup(paths::PLAY_FROM_SEARCH);
        let mut inbox = hub.node("watch").subscribe_messages();

        publisher.reply("watch".into(), paths::PLAY_FROM_SEARCH, Reply::Status(Status::Failure));
        publisher.reply("watch".into(), paths::PLAY_FROM_SEARCH, Reply::Status(Status::Timeout));
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let statuses: Vec<Status> = drain_messages(&mut inbox, paths::PLAY_FROM_SEARCH)
            .iter()
            .filter_map(|m| m.payload.as_deref())
            .filter_map(|p| Status::decode(p).ok())
            .collect();
        assert_eq!(statuses, vec![Status::Failure, Status::Timeout]);
    }

    #[paused_time_test]
    async fn collections_are_replicated_until_tombstoned() {
        let (hub, publisher) = setup(&["watch"]);
        publisher.update_queue(Some(QueueSource {
            items: vec![NativeQueueItem {
                queue_id: 3,
                title: "Song".into(),
                subtitle: None,
                icon: None,
            }],
            active_queue_id: None,
        }));
        publisher.update_actions(Some(ActionSource {
            custom: Vec::new(),
            searchable: true,
        }));
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let stored = hub.data_snapshot();
        let queue: Option<QueueSnapshot> =
            codec::decode_json(stored.get(paths::QUEUE_LIST).expect("queue replicated"))
                .expect("decode");
        assert_eq!(queue.map(|q| q.items.len()), Some(1));
        assert!(stored.contains_key(paths::ACTIONS_LIST));
        assert!(!stored.contains_key(paths::BROWSE_LIST));

        publisher.update_queue(None);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(!hub.data_snapshot().contains_key(paths::QUEUE_LIST));
    }
}
