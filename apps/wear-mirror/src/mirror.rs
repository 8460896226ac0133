//! Peer-side reconstruction of the phone's media state.
//!
//! Three inbound streams feed one actor: direct messages, channel frames and
//! replicated data events. Removals (deleted data items, empty messages, `null`
//! channel bodies) do not clear the display right away; they arm a per-slot
//! tombstone timer, and any new value for the slot before it fires cancels it.
//! The pager is recomposed on its own debounce after collection changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use media_proto::{
    codec, paths, ActionSet, AppInfo, BrowseList, PlayerSnapshot, QueueSnapshot, Reply,
};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use transport_bus::{ChannelFrame, DataEvent, Message, Transport};

use crate::commands::MirrorCommands;
use crate::config::MirrorConfig;
use crate::state::{MirrorState, StatusReply};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Player,
    Artwork,
    AppInfo,
    Actions,
    Queue,
    Browse,
}

enum Input {
    TombstoneElapsed { slot: Slot, epoch: u64 },
    PagerElapsed { epoch: u64 },
    Resume { reply: oneshot::Sender<()> },
    Shutdown,
}

/// Handle to a running mirror.
#[derive(Clone)]
pub struct Mirror {
    tx: mpsc::Sender<Input>,
    state: watch::Receiver<MirrorState>,
    commands: MirrorCommands,
}

impl Mirror {
    pub fn spawn(config: MirrorConfig, transport: Arc<dyn Transport>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(MirrorState::default());
        let commands = MirrorCommands::new(Arc::clone(&transport), config.phone_node.clone());
        let actor = MirrorActor {
            messages: transport.subscribe_messages(),
            frames: transport.subscribe_channels(),
            data: transport.subscribe_data(),
            transport,
            config,
            state: MirrorState::default(),
            published: state_tx,
            tombstones: HashMap::new(),
            epoch: 0,
            pager_epoch: 0,
            tx: tx.clone(),
        };
        let task = tokio::spawn(actor.run(rx));
        (
            Self {
                tx,
                state: state_rx,
                commands,
            },
            task,
        )
    }

    pub fn state(&self) -> MirrorState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MirrorState> {
        self.state.clone()
    }

    /// Resolves with the first state that satisfies `predicate`, or `None` once the
    /// mirror has stopped.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&MirrorState) -> bool,
    ) -> Option<MirrorState> {
        let mut state = self.state.clone();
        loop {
            {
                let current = state.borrow_and_update();
                if predicate(&current) {
                    return Some(current.clone());
                }
            }
            state.changed().await.ok()?;
        }
    }

    pub fn commands(&self) -> &MirrorCommands {
        &self.commands
    }

    /// Re-reads the replicated items, as after the watch UI comes back.
    pub async fn resume(&self) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Input::Resume { reply }).await.is_ok() {
            let _ = done.await;
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Input::Shutdown).await;
    }
}

struct MirrorActor {
    transport: Arc<dyn Transport>,
    config: MirrorConfig,
    messages: tokio::sync::broadcast::Receiver<Message>,
    frames: tokio::sync::broadcast::Receiver<ChannelFrame>,
    data: tokio::sync::broadcast::Receiver<DataEvent>,
    state: MirrorState,
    published: watch::Sender<MirrorState>,
    tombstones: HashMap<Slot, u64>,
    epoch: u64,
    pager_epoch: u64,
    tx: mpsc::Sender<Input>,
}

impl MirrorActor {
    async fn run(mut self, mut inputs: mpsc::Receiver<Input>) {
        loop {
            tokio::select! {
                message = self.messages.recv() => match message {
                    Ok(message) => self.on_message(message),
                    Err(RecvError::Lagged(skipped)) => warn!(target = "mirror", skipped, "message stream lagged"),
                    Err(RecvError::Closed) => break,
                },
                frame = self.frames.recv() => match frame {
                    Ok(frame) => self.on_frame(frame),
                    Err(RecvError::Lagged(skipped)) => warn!(target = "mirror", skipped, "channel stream lagged"),
                    Err(RecvError::Closed) => break,
                },
                event = self.data.recv() => match event {
                    Ok(event) => self.on_data(event),
                    Err(RecvError::Lagged(skipped)) => warn!(target = "mirror", skipped, "data stream lagged"),
                    Err(RecvError::Closed) => break,
                },
                input = inputs.recv() => match input {
                    Some(Input::TombstoneElapsed { slot, epoch }) => self.on_tombstone(slot, epoch),
                    Some(Input::PagerElapsed { epoch }) => self.on_pager(epoch),
                    Some(Input::Resume { reply }) => {
                        self.resume().await;
                        let _ = reply.send(());
                    }
                    Some(Input::Shutdown) | None => break,
                },
            }
            self.publish();
        }
        debug!(target = "mirror", "mirror stopped");
    }

    fn publish(&self) {
        self.published.send_if_modified(|current| {
            if *current == self.state {
                false
            } else {
                *current = self.state.clone();
                true
            }
        });
    }

    fn from_phone(&self, source: &str) -> bool {
        self.config
            .phone_node
            .as_deref()
            .map_or(true, |phone| phone == source)
    }

    fn on_message(&mut self, message: Message) {
        if !self.from_phone(&message.source) {
            trace!(target = "mirror", source = %message.source, "message from unknown node ignored");
            return;
        }
        match message.path.as_str() {
            paths::PLAYER_STATE => self.apply_player(message.payload.as_deref()),
            paths::ARTWORK => self.apply_artwork(message.payload),
            paths::PLAYER_APP_INFO => self.apply_app_info(message.payload.as_deref()),
            path => self.apply_reply(path, message.payload.as_deref()),
        }
    }

    fn on_frame(&mut self, frame: ChannelFrame) {
        if !self.from_phone(&frame.source) {
            return;
        }
        if frame.path == paths::APP_LIST {
            let value: Option<Option<Vec<AppInfo>>> = decode_body(&frame.path, &frame.payload);
            if let Some(apps) = value {
                self.state.apps = apps.unwrap_or_default();
            }
            return;
        }
        if !self.apply_collection_body(&frame.path, &frame.payload) {
            trace!(target = "mirror", path = %frame.path, "unhandled channel path");
        }
    }

    /// Applies a channel or replicated body for one of the collection paths.
    /// Returns `false` for any other path.
    fn apply_collection_body(&mut self, path: &str, payload: &[u8]) -> bool {
        match path {
            paths::ACTIONS_LIST => {
                if let Some(actions) = decode_body::<Option<ActionSet>>(path, payload) {
                    let actions = actions.filter(|a| !a.is_empty());
                    self.apply_collection(Slot::Actions, actions, |state, v| state.actions = v);
                }
            }
            paths::QUEUE_LIST => {
                if let Some(queue) = decode_body::<Option<QueueSnapshot>>(path, payload) {
                    let queue = queue.filter(|q| !q.is_empty());
                    self.apply_collection(Slot::Queue, queue, |state, v| state.queue = v);
                }
            }
            paths::BROWSE_LIST => {
                if let Some(browse) = decode_body::<Option<BrowseList>>(path, payload) {
                    let browse = browse.filter(|b| !b.items.is_empty());
                    self.apply_collection(Slot::Browse, browse, |state, v| state.browse = v);
                }
            }
            _ => return false,
        }
        true
    }

    fn apply_replicated(&mut self, path: &str, payload: Bytes) {
        match path {
            paths::PLAYER_STATE => self.apply_player(Some(&payload)),
            paths::ARTWORK => self.apply_artwork(Some(payload)),
            paths::PLAYER_APP_INFO => self.apply_app_info(Some(&payload)),
            other => {
                self.apply_collection_body(other, &payload);
            }
        }
    }

    fn on_data(&mut self, event: DataEvent) {
        match event {
            DataEvent::Changed { path, payload } => self.apply_replicated(&path, payload),
            DataEvent::Deleted { path } => {
                if let Some(slot) = replicated_slot(&path) {
                    self.arm_tombstone(slot);
                }
            }
        }
    }

    async fn resume(&mut self) {
        for &path in paths::REPLICATED_PATHS {
            match self.transport.get_data(path).await {
                Ok(Some(payload)) => self.apply_replicated(path, payload),
                Ok(None) => {
                    if let Some(slot) = replicated_slot(path) {
                        self.arm_tombstone(slot);
                    }
                }
                Err(err) => warn!(target = "mirror", path, error = %err, "failed to read replicated item"),
            }
        }
        debug!(target = "mirror", "resumed from replicated store");
    }

    /// A cleared snapshot empties the display at once; it is an explicit state,
    /// not a removal.
    fn apply_player(&mut self, payload: Option<&[u8]>) {
        let Some(payload) = payload.filter(|p| !p.is_empty()) else {
            self.arm_tombstone(Slot::Player);
            return;
        };
        let Some(snapshot) = decode_body::<PlayerSnapshot>(paths::PLAYER_STATE, payload) else {
            return;
        };
        self.tombstones.remove(&Slot::Player);
        let snapshot = snapshot.normalized();
        if snapshot.is_cleared() {
            self.state.artwork = None;
            self.tombstones.remove(&Slot::Artwork);
        }
        self.state.player = snapshot;
    }

    fn apply_artwork(&mut self, payload: Option<Bytes>) {
        match payload.filter(|p| !p.is_empty()) {
            Some(artwork) => {
                self.tombstones.remove(&Slot::Artwork);
                self.state.artwork = Some(artwork);
            }
            None => self.arm_tombstone(Slot::Artwork),
        }
    }

    fn apply_app_info(&mut self, payload: Option<&[u8]>) {
        let Some(payload) = payload.filter(|p| !p.is_empty()) else {
            self.arm_tombstone(Slot::AppInfo);
            return;
        };
        if let Some(info) = decode_body::<AppInfo>(paths::PLAYER_APP_INFO, payload) {
            self.tombstones.remove(&Slot::AppInfo);
            self.state.app = Some(info);
        }
    }

    fn apply_reply(&mut self, path: &str, payload: Option<&[u8]>) {
        let Some(payload) = payload else {
            return;
        };
        match Reply::decode(payload) {
            Ok(Reply::Volume(volume)) => self.state.volume = Some(volume),
            Ok(Reply::Status(status)) => {
                debug!(target = "mirror", path, status = status.label(), "status reply");
                self.state.last_reply = Some(StatusReply {
                    path: path.to_string(),
                    status,
                });
            }
            Err(err) => trace!(target = "mirror", path, error = %err, "unrecognized message"),
        }
    }

    fn apply_collection<T>(
        &mut self,
        slot: Slot,
        value: Option<T>,
        assign: impl FnOnce(&mut MirrorState, Option<T>),
    ) {
        match value {
            Some(value) => {
                self.tombstones.remove(&slot);
                assign(&mut self.state, Some(value));
                self.arm_pager();
            }
            None => self.arm_tombstone(slot),
        }
    }

    fn arm_tombstone(&mut self, slot: Slot) {
        if self.tombstones.contains_key(&slot) {
            return;
        }
        self.epoch += 1;
        let epoch = self.epoch;
        self.tombstones.insert(slot, epoch);
        trace!(target = "mirror", ?slot, "tombstone armed");
        let tx = self.tx.clone();
        let grace = self.config.tombstone_grace;
        spawn_timer(grace, tx, Input::TombstoneElapsed { slot, epoch });
    }

    fn on_tombstone(&mut self, slot: Slot, epoch: u64) {
        if self.tombstones.get(&slot) != Some(&epoch) {
            return;
        }
        self.tombstones.remove(&slot);
        debug!(target = "mirror", ?slot, "clearing after tombstone grace");
        match slot {
            Slot::Player => {
                self.state.player = PlayerSnapshot::cleared();
                self.state.artwork = None;
            }
            Slot::Artwork => self.state.artwork = None,
            Slot::AppInfo => self.state.app = None,
            Slot::Actions => self.state.actions = None,
            Slot::Queue => self.state.queue = None,
            Slot::Browse => self.state.browse = None,
        }
        if matches!(slot, Slot::Actions | Slot::Queue | Slot::Browse) {
            self.arm_pager();
        }
    }

    fn arm_pager(&mut self) {
        self.pager_epoch += 1;
        let epoch = self.pager_epoch;
        spawn_timer(
            self.config.pager_debounce,
            self.tx.clone(),
            Input::PagerElapsed { epoch },
        );
    }

    fn on_pager(&mut self, epoch: u64) {
        if epoch == self.pager_epoch {
            self.state.pager = self.state.desired_pager();
        }
    }
}

fn replicated_slot(path: &str) -> Option<Slot> {
    match path {
        paths::PLAYER_STATE => Some(Slot::Player),
        paths::ARTWORK => Some(Slot::Artwork),
        paths::PLAYER_APP_INFO => Some(Slot::AppInfo),
        paths::ACTIONS_LIST => Some(Slot::Actions),
        paths::QUEUE_LIST => Some(Slot::Queue),
        paths::BROWSE_LIST => Some(Slot::Browse),
        _ => None,
    }
}

fn spawn_timer(delay: Duration, tx: mpsc::Sender<Input>, input: Input) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(input).await;
    });
}

fn decode_body<T: DeserializeOwned>(path: &str, payload: &[u8]) -> Option<T> {
    match codec::decode_json(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(target = "mirror", path, error = %err, "undecodable payload dropped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_proto::{MediaAction, PlaybackState, Status, VolumeStatus};
    use test_timeout::paused_time_test;
    use tokio::time::{sleep, Instant};
    use transport_bus::{send_over_channel, LocalHub, LocalNode, Target};

    use crate::state::Page;

    fn config() -> MirrorConfig {
        MirrorConfig {
            phone_node: Some("phone".into()),
            ..MirrorConfig::default()
        }
    }

    fn playing(title: &str) -> Bytes {
        codec::encode_json(&PlayerSnapshot {
            playback_state: PlaybackState::Playing,
            title: Some(title.into()),
            artist: Some("Artist".into()),
            ..PlayerSnapshot::cleared()
        })
        .expect("encode")
    }

    fn start(hub: &LocalHub) -> (LocalNode, Mirror) {
        let phone = hub.node("phone");
        let (mirror, _task) = Mirror::spawn(config(), Arc::new(hub.node("watch")));
        (phone, mirror)
    }

    #[paused_time_test]
    async fn removal_clears_only_after_grace() {
        let hub = LocalHub::new();
        let (phone, mirror) = start(&hub);
        let grace = config().tombstone_grace;

        phone
            .put_data(paths::PLAYER_STATE, playing("Song"))
            .await
            .expect("put");
        mirror.wait_for(MirrorState::is_displaying).await.expect("displaying");

        let deleted_at = Instant::now();
        phone.delete_data(paths::PLAYER_STATE).await.expect("delete");
        sleep(grace / 2).await;
        assert!(mirror.state().is_displaying());

        mirror
            .wait_for(|state| !state.is_displaying())
            .await
            .expect("cleared");
        assert!(deleted_at.elapsed() >= grace);
    }

    #[paused_time_test]
    async fn new_value_cancels_pending_removal() {
        let hub = LocalHub::new();
        let (phone, mirror) = start(&hub);
        let grace = config().tombstone_grace;

        phone
            .put_data(paths::PLAYER_STATE, playing("First"))
            .await
            .expect("put");
        mirror.wait_for(MirrorState::is_displaying).await.expect("displaying");

        phone.delete_data(paths::PLAYER_STATE).await.expect("delete");
        sleep(grace / 2).await;
        phone
            .put_data(paths::PLAYER_STATE, playing("Second"))
            .await
            .expect("put");
        sleep(grace * 2).await;

        let state = mirror.state();
        assert!(state.is_displaying());
        assert_eq!(state.player.title.as_deref(), Some("Second"));
    }

    #[paused_time_test]
    async fn cleared_snapshot_applies_immediately() {
        let hub = LocalHub::new();
        let (phone, mirror) = start(&hub);

        phone
            .send_message(Target::peer("watch"), paths::PLAYER_STATE, Some(playing("Song")))
            .await
            .expect("send");
        phone
            .send_message(Target::peer("watch"), paths::ARTWORK, Some(Bytes::from_static(b"jpg")))
            .await
            .expect("send");
        mirror
            .wait_for(|state| state.is_displaying() && state.artwork.is_some())
            .await
            .expect("displaying");

        let sent_at = Instant::now();
        let cleared = codec::encode_json(&PlayerSnapshot::cleared()).expect("encode");
        phone
            .send_message(Target::peer("watch"), paths::PLAYER_STATE, Some(cleared))
            .await
            .expect("send");
        let state = mirror
            .wait_for(|state| !state.is_displaying())
            .await
            .expect("cleared");
        assert!(state.artwork.is_none());
        assert!(sent_at.elapsed() < config().tombstone_grace);
    }

    #[paused_time_test]
    async fn pager_recomposes_after_debounce() {
        let hub = LocalHub::new();
        let (phone, mirror) = start(&hub);
        let debounce = config().pager_debounce;

        let actions = ActionSet {
            actions: vec![MediaAction {
                action_id: "like".into(),
                label: "Like".into(),
                icon: None,
            }],
        };
        let body = codec::encode_json(&Some(actions)).expect("encode");
        let sent_at = Instant::now();
        send_over_channel(&phone, "watch", paths::ACTIONS_LIST, &body)
            .await
            .expect("channel");

        let state = mirror
            .wait_for(|state| state.actions.is_some())
            .await
            .expect("actions");
        assert!(!state.pager.contains(Page::CustomActions));

        mirror
            .wait_for(|state| state.pager.contains(Page::CustomActions))
            .await
            .expect("pager");
        assert!(sent_at.elapsed() >= debounce);
    }

    #[paused_time_test]
    async fn null_collection_is_a_tombstone() {
        let hub = LocalHub::new();
        let (phone, mirror) = start(&hub);
        let grace = config().tombstone_grace;

        let queue = QueueSnapshot {
            items: vec![media_proto::QueueItem {
                queue_id: 7,
                title: "Track".into(),
                subtitle: None,
                icon: None,
            }],
            active_queue_id: Some(7),
        };
        let body = codec::encode_json(&Some(queue)).expect("encode");
        send_over_channel(&phone, "watch", paths::QUEUE_LIST, &body)
            .await
            .expect("channel");
        mirror.wait_for(|state| state.queue.is_some()).await.expect("queue");

        send_over_channel(&phone, "watch", paths::QUEUE_LIST, b"null")
            .await
            .expect("channel");
        sleep(grace / 2).await;
        assert!(mirror.state().queue.is_some());

        let state = mirror
            .wait_for(|state| state.queue.is_none())
            .await
            .expect("queue cleared");
        assert!(!state.pager.contains(Page::Queue));
    }

    #[paused_time_test]
    async fn replies_update_volume_and_status() {
        let hub = LocalHub::new();
        let (phone, mirror) = start(&hub);

        let volume = VolumeStatus { current: 4, max: 15 };
        phone
            .send_message(Target::peer("watch"), paths::VOLUME_STATUS, Some(volume.encode()))
            .await
            .expect("send");
        phone
            .send_message(
                Target::peer("watch"),
                paths::PLAY_FROM_SEARCH,
                Some(Status::Timeout.encode()),
            )
            .await
            .expect("send");

        let state = mirror
            .wait_for(|state| state.volume.is_some() && state.last_reply.is_some())
            .await
            .expect("replies");
        assert_eq!(state.volume, Some(volume));
        assert_eq!(
            state.last_reply,
            Some(StatusReply {
                path: paths::PLAY_FROM_SEARCH.into(),
                status: Status::Timeout,
            })
        );
    }

    #[paused_time_test]
    async fn messages_from_other_nodes_are_ignored() {
        let hub = LocalHub::new();
        let (_phone, mirror) = start(&hub);
        let stranger = hub.node("tablet");

        stranger
            .send_message(Target::peer("watch"), paths::PLAYER_STATE, Some(playing("Song")))
            .await
            .expect("send");
        sleep(Duration::from_millis(50)).await;
        assert!(!mirror.state().is_displaying());
    }

    #[paused_time_test]
    async fn resume_reads_replicated_store() {
        let hub = LocalHub::new();
        let phone = hub.node("phone");
        phone
            .put_data(paths::PLAYER_STATE, playing("Stored"))
            .await
            .expect("put");

        let (mirror, _task) = Mirror::spawn(config(), Arc::new(hub.node("watch")));
        assert!(!mirror.state().is_displaying());
        mirror.resume().await;

        let state = mirror
            .wait_for(MirrorState::is_displaying)
            .await
            .expect("displaying");
        assert_eq!(state.player.title.as_deref(), Some("Stored"));
    }

    fn one_track_queue() -> Bytes {
        codec::encode_json(&Some(QueueSnapshot {
            items: vec![media_proto::QueueItem {
                queue_id: 4,
                title: "Stored track".into(),
                subtitle: None,
                icon: None,
            }],
            active_queue_id: Some(4),
        }))
        .expect("encode")
    }

    #[paused_time_test]
    async fn resume_restores_collection_pages() {
        let hub = LocalHub::new();
        let phone = hub.node("phone");
        let actions = ActionSet {
            actions: vec![MediaAction {
                action_id: "like".into(),
                label: "Like".into(),
                icon: None,
            }],
        };
        phone
            .put_data(paths::ACTIONS_LIST, codec::encode_json(&Some(actions)).expect("encode"))
            .await
            .expect("put");
        phone
            .put_data(paths::QUEUE_LIST, one_track_queue())
            .await
            .expect("put");

        let (mirror, _task) = Mirror::spawn(config(), Arc::new(hub.node("watch")));
        mirror.resume().await;

        let state = mirror
            .wait_for(|state| state.pager.contains(Page::Queue))
            .await
            .expect("pager");
        assert_eq!(state.queue.map(|q| q.active_queue_id), Some(Some(4)));
        assert!(state.pager.contains(Page::CustomActions));
        assert!(state.browse.is_none());
    }

    #[paused_time_test]
    async fn deleted_collection_item_clears_after_grace() {
        let hub = LocalHub::new();
        let (phone, mirror) = start(&hub);
        let grace = config().tombstone_grace;

        phone
            .put_data(paths::QUEUE_LIST, one_track_queue())
            .await
            .expect("put");
        mirror.wait_for(|state| state.queue.is_some()).await.expect("queue");

        let deleted_at = Instant::now();
        phone.delete_data(paths::QUEUE_LIST).await.expect("delete");
        sleep(grace / 2).await;
        assert!(mirror.state().queue.is_some());

        mirror
            .wait_for(|state| state.queue.is_none())
            .await
            .expect("queue cleared");
        assert!(deleted_at.elapsed() >= grace);
    }
}
