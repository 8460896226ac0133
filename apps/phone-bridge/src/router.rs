//! Inbound command dispatch keyed by message path.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use media_proto::{paths, Command, Reply, Status};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use transport_bus::{Message, PeerId, Transport};

use crate::bridge::{BridgeHandle, SelectedSession};
use crate::metrics;
use crate::peers::ConnectedPeers;
use crate::publisher::Publisher;
use crate::snapshot;

/// Whether the remote-control feature is exposed at all. Checked before every
/// inbound command.
#[derive(Clone, Debug)]
pub struct FeatureGate {
    enabled: Arc<AtomicBool>,
}

impl FeatureGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SlotKind {
    VolumeSet,
    VolumeStatus,
    ActionClick,
    QueueItemClick,
    Browse,
}

/// One in-flight unit of work per kind; starting a new one aborts the old one.
#[derive(Default)]
struct SupersedeSlots {
    slots: Mutex<HashMap<SlotKind, JoinHandle<()>>>,
}

impl SupersedeSlots {
    fn run<F>(&self, kind: SlotKind, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        if let Some(previous) = self.slots.lock().insert(kind, handle) {
            if !previous.is_finished() {
                debug!(target = "bridge.router", ?kind, "superseding in-flight command");
                previous.abort();
            }
        }
    }
}

impl Drop for SupersedeSlots {
    fn drop(&mut self) {
        for (_, handle) in self.slots.lock().drain() {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct CommandRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    bridge: BridgeHandle,
    publisher: Publisher,
    peers: ConnectedPeers,
    gate: FeatureGate,
    icon_edge: u32,
    slots: SupersedeSlots,
}

impl CommandRouter {
    pub fn new(
        bridge: BridgeHandle,
        publisher: Publisher,
        gate: FeatureGate,
        icon_edge: u32,
    ) -> Self {
        let peers = publisher.peers().clone();
        Self {
            inner: Arc::new(RouterInner {
                bridge,
                publisher,
                peers,
                gate,
                icon_edge,
                slots: SupersedeSlots::default(),
            }),
        }
    }

    /// Listens for inbound messages until the transport closes.
    pub fn spawn(&self, transport: &dyn Transport) -> JoinHandle<()> {
        let mut inbox = transport.subscribe_messages();
        let router = self.clone();
        tokio::spawn(async move {
            loop {
                match inbox.recv().await {
                    Ok(message) => router.dispatch(message).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target = "bridge.router", skipped, "command inbox lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn dispatch(&self, message: Message) {
        let Message {
            source,
            path,
            payload,
        } = message;
        let Some(path) = paths::COMMAND_PATHS.iter().copied().find(|p| *p == path) else {
            trace!(target = "bridge.router", path = %path, "not a command path");
            return;
        };
        let inner = &self.inner;

        if !inner.gate.is_enabled() {
            info!(target = "bridge.router", peer = %source, path, "command denied; feature disabled");
            metrics::COMMANDS_DENIED.with_label_values(&[path]).inc();
            inner
                .publisher
                .reply(source, path, Reply::Status(Status::PermissionDenied));
            return;
        }

        let command = match Command::decode(path, payload.as_deref()) {
            Ok(command) => command,
            Err(err) => {
                warn!(target = "bridge.router", peer = %source, path, error = %err, "malformed command");
                inner
                    .publisher
                    .reply(source, path, Reply::Status(Status::Failure));
                return;
            }
        };
        debug!(target = "bridge.router", peer = %source, ?command, "dispatching command");

        match command {
            Command::Connect(request) => self.connect(source, request).await,
            Command::Disconnect { force } => {
                inner.peers.remove(&source);
                if inner.peers.is_empty() {
                    if let Err(err) = inner.bridge.disconnect(force).await {
                        warn!(target = "bridge.router", error = %err, "disconnect failed");
                    }
                }
            }
            Command::Play => self.control(source, path, inner.bridge.play().await),
            Command::Pause => self.control(source, path, inner.bridge.pause().await),
            Command::Next => self.control(source, path, inner.bridge.next().await),
            Command::Previous => self.control(source, path, inner.bridge.previous().await),
            Command::PlayFromSearch(query) => {
                if let Err(err) = inner.bridge.play_from_search(source.clone(), query).await {
                    debug!(target = "bridge.router", error = %err, "play-from-search rejected");
                    metrics::SEARCH_OUTCOMES
                        .with_label_values(&[Status::Failure.label()])
                        .inc();
                    inner
                        .publisher
                        .reply(source, path, Reply::Status(Status::Failure));
                }
            }
            Command::VolumeUp => {
                if let Err(err) = inner.bridge.volume_up().await {
                    debug!(target = "bridge.router", error = %err, "volume up ignored");
                }
            }
            Command::VolumeDown => {
                if let Err(err) = inner.bridge.volume_down().await {
                    debug!(target = "bridge.router", error = %err, "volume down ignored");
                }
            }
            Command::VolumeSet(level) => {
                let router = self.clone();
                inner.slots.run(SlotKind::VolumeSet, async move {
                    let result = router.inner.bridge.set_volume(level).await;
                    router.volume_reply(source, result);
                });
            }
            Command::VolumeStatus => {
                let router = self.clone();
                inner.slots.run(SlotKind::VolumeStatus, async move {
                    let result = router.inner.bridge.volume_status().await;
                    router.volume_reply(source, result);
                });
            }
            Command::ActionClick(action_id) => {
                let bridge = inner.bridge.clone();
                inner.slots.run(SlotKind::ActionClick, async move {
                    if let Err(err) = bridge.action_click(action_id).await {
                        debug!(target = "bridge.router", error = %err, "action click ignored");
                    }
                });
            }
            Command::QueueItemClick(queue_id) => {
                let bridge = inner.bridge.clone();
                inner.slots.run(SlotKind::QueueItemClick, async move {
                    if let Err(err) = bridge.queue_item_click(queue_id).await {
                        debug!(target = "bridge.router", error = %err, "queue click ignored");
                    }
                });
            }
            Command::BrowseItemClick(media_id) => {
                let bridge = inner.bridge.clone();
                inner.slots.run(SlotKind::Browse, async move {
                    if let Err(err) = bridge.browse_item_click(media_id).await {
                        debug!(target = "bridge.router", error = %err, "browse click ignored");
                    }
                });
            }
            Command::BrowseBack => {
                let bridge = inner.bridge.clone();
                inner.slots.run(SlotKind::Browse, async move {
                    if let Err(err) = bridge.browse_back().await {
                        debug!(target = "bridge.router", error = %err, "browse back ignored");
                    }
                });
            }
        }
    }

    async fn connect(&self, source: PeerId, request: media_proto::ConnectRequest) {
        let inner = &self.inner;
        if inner.peers.insert(&source) {
            info!(target = "bridge.router", peer = %source, "peer connected");
        }
        let selection = SelectedSession::from_request(request.package);
        if let Err(err) = inner
            .bridge
            .select_app(selection, request.auto_launch, request.soft_launch)
            .await
        {
            warn!(target = "bridge.router", error = %err, "select app failed");
            inner
                .publisher
                .reply(source, paths::CONNECT, Reply::Status(Status::Failure));
            return;
        }
        inner.publisher.sync_peer(&source).await;

        match inner.bridge.candidates().await {
            Ok(candidates) => {
                let edge = inner.icon_edge;
                let apps = snapshot::render_blocking("app list", move || {
                    candidates
                        .iter()
                        .map(|identity| snapshot::app_info(identity, edge))
                        .collect::<Vec<_>>()
                })
                .await;
                if let Some(apps) = apps {
                    inner.publisher.send_app_list(source.clone(), apps);
                }
            }
            Err(err) => warn!(target = "bridge.router", error = %err, "app list unavailable"),
        }
        inner
            .publisher
            .reply(source, paths::CONNECT, Reply::Status(Status::Success));
    }

    fn control(&self, source: PeerId, path: &'static str, result: crate::bridge::BridgeResult<()>) {
        if let Err(err) = result {
            debug!(target = "bridge.router", path, error = %err, "transport control failed");
            self.inner
                .publisher
                .reply(source, path, Reply::Status(Status::Failure));
        }
    }

    fn volume_reply(
        &self,
        source: PeerId,
        result: crate::bridge::BridgeResult<media_proto::VolumeStatus>,
    ) {
        let reply = match result {
            Ok(status) => Reply::Volume(status),
            Err(err) => {
                debug!(target = "bridge.router", error = %err, "volume request failed");
                Reply::Status(Status::Failure)
            }
        };
        self.inner
            .publisher
            .reply(source, paths::VOLUME_STATUS, reply);
    }

    pub fn gate(&self) -> &FeatureGate {
        &self.inner.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_timeout::tokio_timeout_test;
    use tokio::sync::oneshot;

    #[tokio_timeout_test]
    async fn newer_unit_of_same_kind_aborts_older() {
        let slots = SupersedeSlots::default();
        let (first_done, first_rx) = oneshot::channel::<()>();
        let (second_done, second_rx) = oneshot::channel::<()>();

        slots.run(SlotKind::VolumeSet, async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let _ = first_done.send(());
        });
        slots.run(SlotKind::VolumeSet, async move {
            let _ = second_done.send(());
        });

        assert!(second_rx.await.is_ok());
        assert!(first_rx.await.is_err(), "first unit should have been aborted");
    }

    #[tokio_timeout_test]
    async fn different_kinds_run_side_by_side() {
        let slots = SupersedeSlots::default();
        let (a_done, a_rx) = oneshot::channel::<()>();
        let (b_done, b_rx) = oneshot::channel::<()>();
        slots.run(SlotKind::ActionClick, async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = a_done.send(());
        });
        slots.run(SlotKind::QueueItemClick, async move {
            let _ = b_done.send(());
        });
        assert!(a_rx.await.is_ok());
        assert!(b_rx.await.is_ok());
    }

    #[test]
    fn gate_is_shared_between_clones() {
        let gate = FeatureGate::new(true);
        let view = gate.clone();
        gate.set_enabled(false);
        assert!(!view.is_enabled());
    }
}
