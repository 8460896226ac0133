//! Session Bridge: owns the single selected media session.
//!
//! All native interaction happens on one actor task. Requests from the router,
//! native callbacks, browser connection results and timers all arrive as
//! [`BridgeRequest`]s on the same queue, so every transition runs to completion
//! without interleaving. Callbacks are tagged with the binding generation that
//! registered them; anything from an older generation is ignored.

use std::sync::Arc;
use std::time::Duration;

use media_proto::{paths, Reply, Status, VolumeStatus, SEARCH_ACTION_ID};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use transport_bus::PeerId;

use crate::config::BridgeConfig;
use crate::discovery::{MediaAppIdentity, SessionDiscovery};
use crate::metrics;
use crate::native::{
    BrowserConnection, BrowserEvent, MediaSessionHost, NativeError, NativeResult,
    SessionController, SessionEvent, VolumeDirection,
};
use crate::publisher::{ActionSource, BrowseSource, Publisher, QueueSource};
use crate::snapshot;

mod state;

pub use state::{BridgePhase, BridgeStatus, BrowseStack, SelectedSession};
use state::{Binding, BridgeState, BrowserBinding};

const REQUEST_QUEUE: usize = 256;
const NATIVE_EVENT_QUEUE: usize = 64;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no media session is bound")]
    NoController,
    #[error("bound app has no media browser")]
    NoBrowser,
    #[error("unknown browse item {0}")]
    UnknownItem(String),
    #[error(transparent)]
    Native(#[from] NativeError),
    #[error("session bridge has stopped")]
    Closed,
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportControl {
    Play,
    Pause,
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BrowserPurpose {
    /// The browser connection is how we obtain the session token.
    Bind,
    /// The session is already bound; the browser only serves the browse tree.
    Browse,
}

enum BridgeRequest {
    SelectApp {
        selection: SelectedSession,
        auto_launch: bool,
        soft_launch: bool,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        force: bool,
        reply: oneshot::Sender<()>,
    },
    Control {
        control: TransportControl,
        reply: oneshot::Sender<BridgeResult<()>>,
    },
    PlayFromSearch {
        peer: PeerId,
        query: String,
        reply: oneshot::Sender<BridgeResult<()>>,
    },
    AdjustVolume {
        direction: VolumeDirection,
        reply: oneshot::Sender<BridgeResult<VolumeStatus>>,
    },
    SetVolume {
        level: i32,
        reply: oneshot::Sender<BridgeResult<VolumeStatus>>,
    },
    VolumeStatus {
        reply: oneshot::Sender<BridgeResult<VolumeStatus>>,
    },
    ActionClick {
        action_id: String,
        reply: oneshot::Sender<BridgeResult<()>>,
    },
    QueueItemClick {
        queue_id: i64,
        reply: oneshot::Sender<BridgeResult<()>>,
    },
    BrowseItemClick {
        media_id: String,
        reply: oneshot::Sender<BridgeResult<()>>,
    },
    BrowseBack {
        reply: oneshot::Sender<BridgeResult<()>>,
    },
    Candidates {
        reply: oneshot::Sender<Vec<MediaAppIdentity>>,
    },
    Shutdown,
    Session {
        generation: u64,
        event: SessionEvent,
    },
    Browser {
        generation: u64,
        event: BrowserEvent,
    },
    BrowserResolved {
        generation: u64,
        purpose: BrowserPurpose,
        result: NativeResult<Arc<dyn BrowserConnection>>,
    },
    TeardownElapsed {
        epoch: u64,
    },
    SearchDeadline {
        search_id: u64,
    },
}

/// Cloneable command surface of the bridge actor.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<BridgeRequest>,
    status: watch::Receiver<BridgeStatus>,
}

impl BridgeHandle {
    pub fn status(&self) -> BridgeStatus {
        self.status.borrow().clone()
    }

    /// Resolves with the first status that satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&BridgeStatus) -> bool,
    ) -> BridgeResult<BridgeStatus> {
        let mut status = self.status.clone();
        loop {
            {
                let current = status.borrow_and_update();
                if predicate(&current) {
                    return Ok(current.clone());
                }
            }
            status.changed().await.map_err(|_| BridgeError::Closed)?;
        }
    }

    pub async fn select_app(
        &self,
        selection: SelectedSession,
        auto_launch: bool,
        soft_launch: bool,
    ) -> BridgeResult<()> {
        self.request(|reply| BridgeRequest::SelectApp {
            selection,
            auto_launch,
            soft_launch,
            reply,
        })
        .await
    }

    pub async fn disconnect(&self, force: bool) -> BridgeResult<()> {
        self.request(|reply| BridgeRequest::Disconnect { force, reply })
            .await
    }

    pub async fn control(&self, control: TransportControl) -> BridgeResult<()> {
        self.request(|reply| BridgeRequest::Control { control, reply })
            .await?
    }

    pub async fn play(&self) -> BridgeResult<()> {
        self.control(TransportControl::Play).await
    }

    pub async fn pause(&self) -> BridgeResult<()> {
        self.control(TransportControl::Pause).await
    }

    pub async fn next(&self) -> BridgeResult<()> {
        self.control(TransportControl::Next).await
    }

    pub async fn previous(&self) -> BridgeResult<()> {
        self.control(TransportControl::Previous).await
    }

    /// On `Ok` the bridge replies to `peer` later with exactly one terminal status.
    pub async fn play_from_search(&self, peer: PeerId, query: String) -> BridgeResult<()> {
        self.request(|reply| BridgeRequest::PlayFromSearch { peer, query, reply })
            .await?
    }

    pub async fn volume_up(&self) -> BridgeResult<VolumeStatus> {
        self.request(|reply| BridgeRequest::AdjustVolume {
            direction: VolumeDirection::Raise,
            reply,
        })
        .await?
    }

    pub async fn volume_down(&self) -> BridgeResult<VolumeStatus> {
        self.request(|reply| BridgeRequest::AdjustVolume {
            direction: VolumeDirection::Lower,
            reply,
        })
        .await?
    }

    pub async fn set_volume(&self, level: i32) -> BridgeResult<VolumeStatus> {
        self.request(|reply| BridgeRequest::SetVolume { level, reply })
            .await?
    }

    pub async fn volume_status(&self) -> BridgeResult<VolumeStatus> {
        self.request(|reply| BridgeRequest::VolumeStatus { reply })
            .await?
    }

    pub async fn action_click(&self, action_id: String) -> BridgeResult<()> {
        self.request(|reply| BridgeRequest::ActionClick { action_id, reply })
            .await?
    }

    pub async fn queue_item_click(&self, queue_id: i64) -> BridgeResult<()> {
        self.request(|reply| BridgeRequest::QueueItemClick { queue_id, reply })
            .await?
    }

    pub async fn browse_item_click(&self, media_id: String) -> BridgeResult<()> {
        self.request(|reply| BridgeRequest::BrowseItemClick { media_id, reply })
            .await?
    }

    pub async fn browse_back(&self) -> BridgeResult<()> {
        self.request(|reply| BridgeRequest::BrowseBack { reply })
            .await?
    }

    pub async fn candidates(&self) -> BridgeResult<Vec<MediaAppIdentity>> {
        self.request(|reply| BridgeRequest::Candidates { reply })
            .await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(BridgeRequest::Shutdown).await;
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> BridgeRequest,
    ) -> BridgeResult<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| BridgeError::Closed)?;
        response.await.map_err(|_| BridgeError::Closed)
    }
}

struct PendingSearch {
    id: u64,
    peer: PeerId,
}

pub struct SessionBridge {
    host: Arc<dyn MediaSessionHost>,
    discovery: SessionDiscovery,
    publisher: Publisher,
    teardown_grace: Duration,
    search_timeout: Duration,
    icon_edge: u32,

    state: BridgeState,
    selection: Option<SelectedSession>,
    generation: u64,
    epoch: u64,
    search_seq: u64,
    pending_search: Option<PendingSearch>,

    tx: mpsc::Sender<BridgeRequest>,
    status: watch::Sender<BridgeStatus>,
}

impl SessionBridge {
    /// Spawns the actor and returns its handle. The bridge starts `Idle`.
    pub fn spawn(
        host: Arc<dyn MediaSessionHost>,
        publisher: Publisher,
        config: &BridgeConfig,
    ) -> (BridgeHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let (status, status_rx) = watch::channel(BridgeStatus::idle());
        let bridge = SessionBridge {
            discovery: SessionDiscovery::new(Arc::clone(&host)),
            host,
            publisher,
            teardown_grace: config.teardown_grace,
            search_timeout: config.search_timeout,
            icon_edge: config.icon_max_edge,
            state: BridgeState::Idle,
            selection: None,
            generation: 0,
            epoch: 0,
            search_seq: 0,
            pending_search: None,
            tx: tx.clone(),
            status,
        };
        let task = tokio::spawn(bridge.run(rx));
        (
            BridgeHandle {
                tx,
                status: status_rx,
            },
            task,
        )
    }

    async fn run(mut self, mut rx: mpsc::Receiver<BridgeRequest>) {
        while let Some(request) = rx.recv().await {
            if matches!(request, BridgeRequest::Shutdown) {
                break;
            }
            self.handle(request);
            self.status.send_if_modified(|current| {
                let next = self.state.status();
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        }
        if let Some(binding) = self.take_binding() {
            binding.release();
        }
        self.resolve_search(Status::Failure);
        debug!(target = "bridge.session", "session bridge stopped");
    }

    fn handle(&mut self, request: BridgeRequest) {
        match request {
            BridgeRequest::SelectApp {
                selection,
                auto_launch,
                soft_launch,
                reply,
            } => {
                self.select_app(selection, auto_launch, soft_launch);
                let _ = reply.send(());
            }
            BridgeRequest::Disconnect { force, reply } => {
                self.disconnect(force);
                let _ = reply.send(());
            }
            BridgeRequest::Control { control, reply } => {
                let _ = reply.send(self.control(control));
            }
            BridgeRequest::PlayFromSearch { peer, query, reply } => {
                let _ = reply.send(self.play_from_search(peer, query));
            }
            BridgeRequest::AdjustVolume { direction, reply } => {
                let result = self.controller().and_then(|controller| {
                    controller.adjust_volume(direction)?;
                    Ok(volume_of(&controller))
                });
                let _ = reply.send(result);
            }
            BridgeRequest::SetVolume { level, reply } => {
                let result = self.controller().and_then(|controller| {
                    controller.set_volume(level)?;
                    Ok(volume_of(&controller))
                });
                let _ = reply.send(result);
            }
            BridgeRequest::VolumeStatus { reply } => {
                let _ = reply.send(self.controller().map(|c| volume_of(&c)));
            }
            BridgeRequest::ActionClick { action_id, reply } => {
                let _ = reply.send(self.action_click(&action_id));
            }
            BridgeRequest::QueueItemClick { queue_id, reply } => {
                let result = self
                    .controller()
                    .and_then(|c| c.skip_to_queue_item(queue_id).map_err(Into::into));
                let _ = reply.send(result);
            }
            BridgeRequest::BrowseItemClick { media_id, reply } => {
                let _ = reply.send(self.browse_item_click(media_id));
            }
            BridgeRequest::BrowseBack { reply } => {
                let _ = reply.send(self.browse_back());
            }
            BridgeRequest::Candidates { reply } => {
                let _ = reply.send(self.discovery.list_candidates());
            }
            BridgeRequest::Shutdown => {}
            BridgeRequest::Session { generation, event } => {
                self.on_session_event(generation, event)
            }
            BridgeRequest::Browser { generation, event } => {
                self.on_browser_event(generation, event)
            }
            BridgeRequest::BrowserResolved {
                generation,
                purpose,
                result,
            } => self.on_browser_resolved(generation, purpose, result),
            BridgeRequest::TeardownElapsed { epoch } => self.on_teardown_elapsed(epoch),
            BridgeRequest::SearchDeadline { search_id } => self.on_search_deadline(search_id),
        }
    }

    // ---- selection and lifecycle ----

    fn select_app(&mut self, selection: SelectedSession, auto_launch: bool, soft_launch: bool) {
        self.selection = Some(selection.clone());

        if !auto_launch {
            if let BridgeState::Disconnecting { binding, .. } = &self.state {
                if selection.matches(binding.package()) {
                    let state = std::mem::replace(&mut self.state, BridgeState::Idle);
                    if let BridgeState::Disconnecting { binding, .. } = state {
                        info!(
                            target = "bridge.session",
                            package = %binding.package(),
                            "connect within grace period; keeping session"
                        );
                        self.state = BridgeState::Bound(binding);
                    }
                    return;
                }
            }
            if let BridgeState::Bound(binding) = &self.state {
                if selection.matches(binding.package()) {
                    debug!(
                        target = "bridge.session",
                        package = %binding.package(),
                        "already bound; nothing to do"
                    );
                    return;
                }
            }
        }

        let identity = match &selection {
            SelectedSession::Pinned(package) => self.discovery.resolve_package(package),
            SelectedSession::Auto => self
                .discovery
                .list_active_sessions()
                .iter()
                .find_map(|handle| self.discovery.resolve_identity(handle)),
        };

        self.release_binding();

        let Some(identity) = identity else {
            match selection.pinned() {
                Some(package) => {
                    self.bind_failed(package, NativeError::PackageNotFound(package.to_string()))
                }
                None => {
                    info!(target = "bridge.session", "no active media session");
                    self.go_idle();
                }
            }
            return;
        };

        if auto_launch && !soft_launch {
            if let Err(err) = self.host.launch_app(&identity.package) {
                warn!(
                    target = "bridge.session",
                    package = %identity.package,
                    error = %err,
                    "failed to launch media app"
                );
            }
        }
        self.bind_identity(identity);
    }

    fn bind_identity(&mut self, identity: MediaAppIdentity) {
        self.generation += 1;
        let generation = self.generation;

        let live = identity.session.clone().or_else(|| {
            self.discovery
                .list_active_sessions()
                .into_iter()
                .find(|handle| handle.package == identity.package)
        });

        if let Some(handle) = live {
            match self.host.bind(&handle.token) {
                Ok(controller) => self.attach(identity, controller, None, generation),
                Err(err) => self.bind_failed(&identity.package, err),
            }
            return;
        }

        if let Some(component) = identity.browser.clone() {
            debug!(
                target = "bridge.session",
                package = %identity.package,
                "no live session; connecting media browser"
            );
            self.state = BridgeState::Connecting {
                identity,
                generation,
            };
            self.spawn_browser_connect(component, generation, BrowserPurpose::Bind);
            return;
        }

        self.bind_failed(
            &identity.package,
            NativeError::Binder("no session token available".into()),
        );
    }

    fn spawn_browser_connect(
        &self,
        component: crate::native::ComponentName,
        generation: u64,
        purpose: BrowserPurpose,
    ) {
        let host = Arc::clone(&self.host);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = host.connect_browser(&component).await;
            let _ = tx
                .send(BridgeRequest::BrowserResolved {
                    generation,
                    purpose,
                    result,
                })
                .await;
        });
    }

    /// Single recovery path for every binding failure: rescan active sessions and
    /// bind the first one that is not the target that just failed.
    fn bind_failed(&mut self, package: &str, err: NativeError) {
        warn!(
            target = "bridge.session",
            package,
            error = %err,
            "session bind failed; rescanning active sessions"
        );
        metrics::BIND_FALLBACKS.inc();
        self.state = BridgeState::Idle;

        let fallback = self
            .discovery
            .list_active_sessions()
            .into_iter()
            .filter(|handle| handle.package != package)
            .find_map(|handle| self.discovery.resolve_identity(&handle));

        let Some(identity) = fallback else {
            info!(target = "bridge.session", "no fallback session available");
            self.go_idle();
            return;
        };
        let Some(handle) = identity.session.clone() else {
            self.go_idle();
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        match self.host.bind(&handle.token) {
            Ok(controller) => self.attach(identity, controller, None, generation),
            Err(err) => {
                warn!(
                    target = "bridge.session",
                    package = %identity.package,
                    error = %err,
                    "fallback bind failed"
                );
                self.go_idle();
            }
        }
    }

    fn attach(
        &mut self,
        identity: MediaAppIdentity,
        controller: Arc<dyn SessionController>,
        browser: Option<Arc<dyn BrowserConnection>>,
        generation: u64,
    ) {
        let (event_tx, mut event_rx) = mpsc::channel(NATIVE_EVENT_QUEUE);
        controller.register_events(event_tx);
        let tx = self.tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if tx
                    .send(BridgeRequest::Session { generation, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let playback = controller.playback();
        let metadata = controller.metadata();
        let queue = controller.queue();
        let audio = controller.audio_info();
        let searchable = identity.searchable.is_some();

        self.publisher
            .publish_app_info(Some(snapshot::app_info(&identity, self.icon_edge)));
        self.publisher
            .update_player(playback.clone(), metadata.clone());
        self.publisher.update_actions(Some(ActionSource {
            custom: playback
                .as_ref()
                .map(|p| p.custom_actions.clone())
                .unwrap_or_default(),
            searchable,
        }));
        self.publisher.update_queue(Some(QueueSource {
            items: queue.clone(),
            active_queue_id: playback.as_ref().and_then(|p| p.active_queue_id),
        }));
        self.publisher.update_browse(None);
        self.publisher.publish_volume(audio);

        let browser_component = identity.browser.clone();
        info!(
            target = "bridge.session",
            package = %identity.package,
            generation,
            "media session bound"
        );
        let playing = playback.as_ref().is_some_and(|p| p.is_active());
        self.state = BridgeState::Bound(Binding {
            identity,
            generation,
            controller,
            forwarder,
            browser: None,
            playback,
            metadata,
            queue,
        });

        match (browser, browser_component) {
            (Some(connection), _) => self.install_browser(connection),
            (None, Some(component)) => {
                self.spawn_browser_connect(component, generation, BrowserPurpose::Browse)
            }
            (None, None) => {}
        }

        if playing {
            self.resolve_search(Status::Success);
        }
    }

    fn install_browser(&mut self, connection: Arc<dyn BrowserConnection>) {
        let tx = self.tx.clone();
        let Some(binding) = self.state.binding_mut() else {
            connection.disconnect();
            return;
        };
        let generation = binding.generation;
        let (event_tx, mut event_rx) = mpsc::channel(NATIVE_EVENT_QUEUE);
        connection.register_events(event_tx);
        let forwarder = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if tx
                    .send(BridgeRequest::Browser { generation, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        let stack = BrowseStack::new(connection.root_id());
        connection.subscribe(stack.top());
        if let Some(previous) = binding.browser.replace(BrowserBinding {
            connection,
            stack: Some(stack),
            forwarder,
        }) {
            previous.release();
        }
    }

    fn take_binding(&mut self) -> Option<Binding> {
        match std::mem::replace(&mut self.state, BridgeState::Idle) {
            BridgeState::Bound(binding) | BridgeState::Disconnecting { binding, .. } => {
                Some(binding)
            }
            _ => None,
        }
    }

    /// Releases the current binding (if any) and leaves the state `Idle` without
    /// publishing anything.
    fn release_binding(&mut self) {
        if let Some(binding) = self.take_binding() {
            debug!(
                target = "bridge.session",
                package = %binding.package(),
                "releasing media session"
            );
            binding.release();
            self.resolve_search(Status::Failure);
        }
    }

    /// Transition to `Idle` that remote peers must see: everything is cleared.
    fn go_idle(&mut self) {
        self.release_binding();
        self.state = BridgeState::Idle;
        self.publisher.clear_all();
        self.publisher.publish_app_info(None);
    }

    fn disconnect(&mut self, force: bool) {
        if !force {
            self.selection = None;
            self.go_idle();
            return;
        }
        match std::mem::replace(&mut self.state, BridgeState::Idle) {
            BridgeState::Bound(binding) => {
                self.epoch += 1;
                let epoch = self.epoch;
                debug!(
                    target = "bridge.session",
                    package = %binding.package(),
                    grace_ms = self.teardown_grace.as_millis() as u64,
                    "deferring teardown"
                );
                self.state = BridgeState::Disconnecting { binding, epoch };
                let tx = self.tx.clone();
                let grace = self.teardown_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let _ = tx.send(BridgeRequest::TeardownElapsed { epoch }).await;
                });
            }
            other => {
                self.state = other;
                if !matches!(self.state, BridgeState::Disconnecting { .. }) {
                    // Nothing bound to keep alive; a pending browser bind is dropped
                    // by its generation check.
                    self.selection = None;
                    self.go_idle();
                }
            }
        }
    }

    fn on_teardown_elapsed(&mut self, epoch: u64) {
        let current = matches!(
            &self.state,
            BridgeState::Disconnecting { epoch: pending, .. } if *pending == epoch
        );
        if current {
            info!(target = "bridge.session", "grace period over; tearing down");
            self.selection = None;
            self.go_idle();
        }
    }

    // ---- native callbacks ----

    fn on_session_event(&mut self, generation: u64, event: SessionEvent) {
        let Some(binding) = self
            .state
            .binding_mut()
            .filter(|b| b.generation == generation)
        else {
            debug!(target = "bridge.session", generation, "stale session event ignored");
            return;
        };

        match event {
            SessionEvent::PlaybackStateChanged(playback) => {
                let previous = binding.playback.take();
                let old_actions = previous.as_ref().map(|p| p.custom_actions.clone());
                let new_actions = playback.as_ref().map(|p| p.custom_actions.clone());
                let old_active = previous.as_ref().and_then(|p| p.active_queue_id);
                let active = playback.as_ref().is_some_and(|p| p.is_active());
                binding.playback = playback;

                self.publisher
                    .update_player(binding.playback.clone(), binding.metadata.clone());
                if old_actions != new_actions {
                    self.publisher.update_actions(Some(ActionSource {
                        custom: new_actions.unwrap_or_default(),
                        searchable: binding.identity.searchable.is_some(),
                    }));
                }
                if old_active != binding.active_queue_id() {
                    self.publisher.update_queue(Some(QueueSource {
                        items: binding.queue.clone(),
                        active_queue_id: binding.active_queue_id(),
                    }));
                }
                if active {
                    self.resolve_search(Status::Success);
                }
            }
            SessionEvent::MetadataChanged(metadata) => {
                binding.metadata = metadata;
                self.publisher
                    .update_player(binding.playback.clone(), binding.metadata.clone());
            }
            SessionEvent::QueueChanged(items) => {
                binding.queue = items;
                self.publisher.update_queue(Some(QueueSource {
                    items: binding.queue.clone(),
                    active_queue_id: binding.active_queue_id(),
                }));
            }
            SessionEvent::AudioInfoChanged(audio) => self.publisher.publish_volume(audio),
            SessionEvent::SessionDestroyed => {
                let package = binding.package().to_string();
                info!(target = "bridge.session", package = %package, "media session destroyed");
                self.release_binding();
                self.bind_failed(&package, NativeError::Binder("session destroyed".into()));
            }
        }
    }

    fn on_browser_event(&mut self, generation: u64, event: BrowserEvent) {
        let Some(binding) = self
            .state
            .binding_mut()
            .filter(|b| b.generation == generation)
        else {
            return;
        };
        let Some(browser) = binding.browser.as_mut() else {
            return;
        };
        match event {
            BrowserEvent::ChildrenLoaded { parent_id, items } => {
                let Some(stack) = browser.stack.as_mut() else {
                    return;
                };
                if stack.set_children(&parent_id, items) {
                    self.publisher.update_browse(Some(BrowseSource {
                        parent_id,
                        depth: stack.depth(),
                        items: stack.children().to_vec(),
                    }));
                } else {
                    debug!(target = "bridge.session", parent = %parent_id, "children for a stale node dropped");
                }
            }
            BrowserEvent::Suspended => {
                info!(
                    target = "bridge.session",
                    package = %binding.identity.package,
                    "media browser suspended; dropping browse stack"
                );
                if let Some(browser) = binding.browser.take() {
                    browser.forwarder.abort();
                }
                self.publisher.update_browse(None);
            }
        }
    }

    fn on_browser_resolved(
        &mut self,
        generation: u64,
        purpose: BrowserPurpose,
        result: NativeResult<Arc<dyn BrowserConnection>>,
    ) {
        match purpose {
            BrowserPurpose::Bind => {
                let current = matches!(
                    &self.state,
                    BridgeState::Connecting { generation: pending, .. } if *pending == generation
                );
                if !current {
                    if let Ok(connection) = result {
                        connection.disconnect();
                    }
                    return;
                }
                let BridgeState::Connecting { identity, .. } =
                    std::mem::replace(&mut self.state, BridgeState::Idle)
                else {
                    return;
                };
                let connection = match result {
                    Ok(connection) => connection,
                    Err(err) => return self.bind_failed(&identity.package, err),
                };
                let Some(token) = connection.session_token() else {
                    connection.disconnect();
                    return self.bind_failed(
                        &identity.package,
                        NativeError::Binder("browser returned no session token".into()),
                    );
                };
                match self.host.bind(&token) {
                    Ok(controller) => {
                        self.attach(identity, controller, Some(connection), generation)
                    }
                    Err(err) => {
                        connection.disconnect();
                        self.bind_failed(&identity.package, err);
                    }
                }
            }
            BrowserPurpose::Browse => {
                let wanted = matches!(
                    &self.state,
                    BridgeState::Bound(binding) if binding.generation == generation && binding.browser.is_none()
                );
                match result {
                    Ok(connection) if wanted => self.install_browser(connection),
                    Ok(connection) => connection.disconnect(),
                    Err(err) => debug!(
                        target = "bridge.session",
                        error = %err,
                        "media browser unavailable; browsing disabled"
                    ),
                }
            }
        }
    }

    // ---- command surface ----

    fn controller(&self) -> BridgeResult<Arc<dyn SessionController>> {
        match self.state.binding() {
            Some(binding) => Ok(Arc::clone(&binding.controller)),
            None => {
                info!(target = "bridge.session", "null MediaController");
                Err(BridgeError::NoController)
            }
        }
    }

    fn control(&mut self, control: TransportControl) -> BridgeResult<()> {
        if control == TransportControl::Play && self.state.binding().is_none() {
            return self.play_unbound("");
        }
        let controller = self.controller()?;
        match control {
            TransportControl::Play => {
                let has_metadata = self
                    .state
                    .binding()
                    .and_then(|b| b.metadata.as_ref())
                    .is_some_and(|m| {
                        m.title.as_deref().is_some_and(|t| !t.is_empty())
                            || m.artist.as_deref().is_some_and(|a| !a.is_empty())
                    });
                if has_metadata {
                    controller.play()?;
                } else {
                    debug!(target = "bridge.session", "nothing loaded; playing from empty search");
                    controller.play_from_search("")?;
                }
            }
            TransportControl::Pause => controller.pause()?,
            TransportControl::Next => controller.skip_to_next()?,
            TransportControl::Previous => controller.skip_to_previous()?,
        }
        Ok(())
    }

    /// Play with nothing bound: ask the pinned app to start playback through its
    /// search intent, then bind to whatever session that produces.
    fn play_unbound(&mut self, query: &str) -> BridgeResult<()> {
        let Some(package) = self
            .selection
            .as_ref()
            .and_then(|s| s.pinned())
            .map(str::to_string)
        else {
            info!(target = "bridge.session", "null MediaController");
            return Err(BridgeError::NoController);
        };
        info!(
            target = "bridge.session",
            package = %package,
            "no bound session; dispatching search intent"
        );
        self.host.dispatch_search_intent(&package, query)?;
        match self.discovery.resolve_package(&package) {
            Some(identity) => self.bind_identity(identity),
            None => return Err(BridgeError::NoController),
        }
        Ok(())
    }

    fn play_from_search(&mut self, peer: PeerId, query: String) -> BridgeResult<()> {
        // A newer search supersedes the pending one.
        self.resolve_search(Status::Failure);

        let was_bound = match self.state.binding() {
            Some(binding) => {
                let controller = Arc::clone(&binding.controller);
                controller.play_from_search(&query)?;
                true
            }
            None => {
                self.play_unbound(&query)?;
                false
            }
        };

        self.search_seq += 1;
        let search_id = self.search_seq;
        self.pending_search = Some(PendingSearch { id: search_id, peer });

        // The search intent may have started playback before the bind completed,
        // in which case no further playback callback will arrive.
        let playing_now = self
            .state
            .binding()
            .and_then(|b| b.playback.as_ref())
            .is_some_and(|p| p.is_active());
        if !was_bound && playing_now {
            self.resolve_search(Status::Success);
            return Ok(());
        }

        let tx = self.tx.clone();
        let timeout = self.search_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(BridgeRequest::SearchDeadline { search_id }).await;
        });
        Ok(())
    }

    fn on_search_deadline(&mut self, search_id: u64) {
        if self
            .pending_search
            .as_ref()
            .is_some_and(|pending| pending.id == search_id)
        {
            info!(target = "bridge.session", "play-from-search timed out");
            self.resolve_search(Status::Timeout);
        }
    }

    /// Sends the terminal status for the pending search, if there is one.
    fn resolve_search(&mut self, status: Status) {
        if let Some(pending) = self.pending_search.take() {
            debug!(
                target = "bridge.session",
                peer = %pending.peer,
                status = status.label(),
                "play-from-search resolved"
            );
            metrics::SEARCH_OUTCOMES
                .with_label_values(&[status.label()])
                .inc();
            self.publisher
                .reply(pending.peer, paths::PLAY_FROM_SEARCH, Reply::Status(status));
        }
    }

    fn action_click(&mut self, action_id: &str) -> BridgeResult<()> {
        if action_id == SEARCH_ACTION_ID {
            debug!(target = "bridge.session", "search action is resolved on the wear side");
            return Ok(());
        }
        self.controller()?.send_custom_action(action_id)?;
        Ok(())
    }

    fn browse_item_click(&mut self, media_id: String) -> BridgeResult<()> {
        let controller = self.controller()?;
        let binding = self.state.binding_mut().ok_or(BridgeError::NoController)?;
        let browser = binding.browser.as_mut().ok_or(BridgeError::NoBrowser)?;
        let stack = browser.stack.as_mut().ok_or(BridgeError::NoBrowser)?;
        let item = stack
            .child(&media_id)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownItem(media_id.clone()))?;

        if item.browsable {
            browser.connection.unsubscribe(stack.top());
            stack.push(media_id);
            browser.connection.subscribe(stack.top());
            Ok(())
        } else if item.playable {
            controller.play_from_media_id(&media_id)?;
            Ok(())
        } else {
            Err(BridgeError::UnknownItem(media_id))
        }
    }

    fn browse_back(&mut self) -> BridgeResult<()> {
        self.controller()?;
        let binding = self.state.binding_mut().ok_or(BridgeError::NoController)?;
        let browser = binding.browser.as_mut().ok_or(BridgeError::NoBrowser)?;
        let stack = browser.stack.as_mut().ok_or(BridgeError::NoBrowser)?;
        let top = stack.top().to_string();
        if stack.pop().is_some() {
            browser.connection.unsubscribe(&top);
            browser.connection.subscribe(stack.top());
        }
        Ok(())
    }
}

fn volume_of(controller: &Arc<dyn SessionController>) -> VolumeStatus {
    let audio = controller.audio_info();
    VolumeStatus {
        current: audio.current_volume,
        max: audio.max_volume,
    }
}
