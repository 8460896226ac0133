//! In-memory native host. Records every side effect so callers can assert on what
//! did (and did not) reach the platform. Used by the demo binary and the tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    AudioInfo, BrowserConnection, BrowserEvent, ComponentName, MediaSessionHost, NativeBrowseItem,
    NativeError, NativeMetadata, NativePlayback, NativePlaybackState, NativeQueueItem,
    NativeResult, NativeSessionHandle, PackageEntry, SessionController, SessionEvent,
    SessionToken, VolumeDirection,
};

pub const ROOT_NODE: &str = "root";

#[derive(Debug, Clone, PartialEq)]
pub enum NativeCall {
    Launch(String),
    SearchIntent { package: String, query: String },
    Bind(String),
    ConnectBrowser(String),
    RegisterEvents(String),
    UnregisterEvents(String),
    Play(String),
    Pause(String),
    SkipToNext(String),
    SkipToPrevious(String),
    SeekTo(String, i64),
    PlayFromSearch { package: String, query: String },
    PlayFromMediaId { package: String, media_id: String },
    CustomAction { package: String, action: String },
    SkipToQueueItem { package: String, queue_id: i64 },
    AdjustVolume(String, VolumeDirection),
    SetVolume(String, i32),
    Subscribe { package: String, node_id: String },
    Unsubscribe { package: String, node_id: String },
    BrowserDisconnect(String),
}

type CallLog = Arc<Mutex<Vec<NativeCall>>>;

#[derive(Debug, Clone)]
pub struct SimApp {
    pub package: String,
    pub label: String,
    pub icon: Option<Bytes>,
    pub searchable: bool,
    pub browser: bool,
    pub browse_tree: HashMap<String, Vec<NativeBrowseItem>>,
}

impl SimApp {
    pub fn new(package: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            label: label.into(),
            icon: None,
            searchable: false,
            browser: false,
            browse_tree: HashMap::new(),
        }
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn with_browser(mut self) -> Self {
        self.browser = true;
        self
    }

    pub fn with_icon(mut self, icon: Bytes) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn with_children(mut self, parent: &str, items: Vec<NativeBrowseItem>) -> Self {
        self.browser = true;
        self.browse_tree.insert(parent.to_string(), items);
        self
    }
}

#[derive(Default)]
struct HostState {
    apps: HashMap<String, SimApp>,
    /// Most recently activated first, like the platform session manager.
    sessions: Vec<Arc<SimSession>>,
    failing_binds: HashSet<String>,
    failing_browsers: HashSet<String>,
    tokenless_browsers: HashSet<String>,
    browser_delays: HashMap<String, Duration>,
    browsers: HashMap<String, Arc<SimBrowser>>,
    next_token: u64,
}

#[derive(Clone, Default)]
pub struct SimulatedHost {
    state: Arc<Mutex<HostState>>,
    calls: CallLog,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two installed players, one of them browsable and searchable.
    pub fn with_demo_library() -> Self {
        let host = Self::new();
        host.install(
            SimApp::new("com.example.music", "Example Music")
                .searchable()
                .with_children(
                    ROOT_NODE,
                    vec![
                        browse_folder("playlists", "Playlists"),
                        browse_track("track/1", "Morning Run"),
                    ],
                )
                .with_children(
                    "playlists",
                    vec![
                        browse_track("track/2", "Deep Focus"),
                        browse_track("track/3", "Late Night"),
                    ],
                ),
        );
        host.install(SimApp::new("com.example.podcasts", "Example Podcasts"));
        host
    }

    pub fn install(&self, app: SimApp) {
        self.state.lock().apps.insert(app.package.clone(), app);
    }

    pub fn uninstall(&self, package: &str) {
        self.state.lock().apps.remove(package);
    }

    pub fn fail_bind(&self, package: &str) {
        self.state.lock().failing_binds.insert(package.to_string());
    }

    pub fn fail_browser(&self, package: &str) {
        self.state.lock().failing_browsers.insert(package.to_string());
    }

    pub fn tokenless_browser(&self, package: &str) {
        self.state
            .lock()
            .tokenless_browsers
            .insert(package.to_string());
    }

    /// The next browser connections to `package` take `delay` to resolve.
    pub fn delay_browser(&self, package: &str, delay: Duration) {
        self.state
            .lock()
            .browser_delays
            .insert(package.to_string(), delay);
    }

    /// Fires the connection-suspended callback of the last browser opened for `package`.
    pub fn suspend_browser(&self, package: &str) {
        let browser = self.state.lock().browsers.get(package).cloned();
        if let Some(browser) = browser {
            let sink = browser.sink.lock().clone();
            if let Some(sink) = sink {
                let _ = sink.try_send(BrowserEvent::Suspended);
            }
        }
    }

    /// Starts (or returns the running) session for `package`, moving it to the front.
    pub fn start_session(&self, package: &str) -> Arc<SimSession> {
        let mut state = self.state.lock();
        if let Some(index) = state.sessions.iter().position(|s| s.package == package) {
            let session = state.sessions.remove(index);
            state.sessions.insert(0, Arc::clone(&session));
            return session;
        }
        state.next_token += 1;
        let session = Arc::new(SimSession::new(
            package,
            SessionToken(format!("token-{}", state.next_token)),
            Arc::clone(&self.calls),
        ));
        state.sessions.insert(0, Arc::clone(&session));
        session
    }

    pub fn session(&self, package: &str) -> Option<Arc<SimSession>> {
        self.state
            .lock()
            .sessions
            .iter()
            .find(|s| s.package == package)
            .cloned()
    }

    /// Removes the session and fires its destroyed callback.
    pub fn destroy_session(&self, package: &str) {
        let removed = {
            let mut state = self.state.lock();
            let index = state.sessions.iter().position(|s| s.package == package);
            index.map(|i| state.sessions.remove(i))
        };
        if let Some(session) = removed {
            session.emit(SessionEvent::SessionDestroyed);
        }
    }

    pub fn calls(&self) -> Vec<NativeCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: NativeCall) {
        self.calls.lock().push(call);
    }

    fn installed(&self, package: &str) -> Option<SimApp> {
        self.state.lock().apps.get(package).cloned()
    }
}

#[async_trait]
impl MediaSessionHost for SimulatedHost {
    fn active_sessions(&self) -> Vec<NativeSessionHandle> {
        self.state
            .lock()
            .sessions
            .iter()
            .map(|s| NativeSessionHandle {
                package: s.package.clone(),
                token: s.token.clone(),
            })
            .collect()
    }

    fn resolve_package(&self, package: &str) -> NativeResult<PackageEntry> {
        let app = self
            .installed(package)
            .ok_or_else(|| NativeError::PackageNotFound(package.to_string()))?;
        Ok(PackageEntry {
            label: app.label,
            icon: app.icon,
            searchable: app
                .searchable
                .then(|| ComponentName::new(package, ".SearchActivity")),
        })
    }

    fn browser_services(&self) -> Vec<ComponentName> {
        let state = self.state.lock();
        let mut services: Vec<ComponentName> = state
            .apps
            .values()
            .filter(|app| app.browser)
            .map(|app| ComponentName::new(app.package.clone(), ".MediaBrowserService"))
            .collect();
        services.sort_by(|a, b| a.package.cmp(&b.package));
        services
    }

    fn launch_app(&self, package: &str) -> NativeResult<()> {
        self.record(NativeCall::Launch(package.to_string()));
        self.installed(package)
            .map(|_| ())
            .ok_or_else(|| NativeError::PackageNotFound(package.to_string()))
    }

    fn dispatch_search_intent(&self, package: &str, query: &str) -> NativeResult<()> {
        self.record(NativeCall::SearchIntent {
            package: package.to_string(),
            query: query.to_string(),
        });
        if self.installed(package).is_none() {
            return Err(NativeError::PackageNotFound(package.to_string()));
        }
        let session = self.start_session(package);
        session.start_search_result(query);
        Ok(())
    }

    fn bind(&self, token: &SessionToken) -> NativeResult<Arc<dyn SessionController>> {
        let (session, failing) = {
            let state = self.state.lock();
            let session = state.sessions.iter().find(|s| &s.token == token).cloned();
            let failing = session
                .as_ref()
                .is_some_and(|s| state.failing_binds.contains(&s.package));
            (session, failing)
        };
        let session = session.ok_or_else(|| NativeError::Binder("stale session token".into()))?;
        self.record(NativeCall::Bind(session.package.clone()));
        if failing {
            return Err(NativeError::Binder(format!(
                "{} refused the binding",
                session.package
            )));
        }
        Ok(session)
    }

    async fn connect_browser(
        &self,
        component: &ComponentName,
    ) -> NativeResult<Arc<dyn BrowserConnection>> {
        self.record(NativeCall::ConnectBrowser(component.package.clone()));
        let delay = self
            .state
            .lock()
            .browser_delays
            .get(&component.package)
            .copied();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        let (app, failing, tokenless) = {
            let state = self.state.lock();
            (
                state.apps.get(&component.package).cloned(),
                state.failing_browsers.contains(&component.package),
                state.tokenless_browsers.contains(&component.package),
            )
        };
        let app = match app {
            Some(app) if app.browser && !failing => app,
            _ => {
                return Err(NativeError::BrowserConnectionFailed(
                    component.package.clone(),
                ))
            }
        };
        let token = if tokenless {
            None
        } else {
            Some(self.start_session(&app.package).token.clone())
        };
        let browser = Arc::new(SimBrowser {
            package: app.package.clone(),
            token,
            tree: app.browse_tree,
            sink: Mutex::new(None),
            calls: Arc::clone(&self.calls),
        });
        self.state
            .lock()
            .browsers
            .insert(app.package, Arc::clone(&browser));
        Ok(browser)
    }
}

struct SessionState {
    playback: Option<NativePlayback>,
    metadata: Option<NativeMetadata>,
    queue: Vec<NativeQueueItem>,
    audio: AudioInfo,
    sink: Option<mpsc::Sender<SessionEvent>>,
    track: u32,
    ignores_search: bool,
}

pub struct SimSession {
    package: String,
    token: SessionToken,
    state: Mutex<SessionState>,
    calls: CallLog,
}

impl SimSession {
    fn new(package: &str, token: SessionToken, calls: CallLog) -> Self {
        Self {
            package: package.to_string(),
            token,
            state: Mutex::new(SessionState {
                playback: Some(NativePlayback::new(NativePlaybackState::Paused)),
                metadata: None,
                queue: Vec::new(),
                audio: AudioInfo {
                    current_volume: 5,
                    max_volume: 15,
                },
                sink: None,
                track: 0,
                ignores_search: false,
            }),
            calls,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().sink.is_some()
    }

    pub fn emit(&self, event: SessionEvent) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            let _ = sink.try_send(event);
        }
    }

    /// Accepts play-from-search calls without ever starting playback.
    pub fn ignore_search(&self) {
        self.state.lock().ignores_search = true;
    }

    pub fn set_playback(&self, playback: Option<NativePlayback>) {
        self.state.lock().playback = playback.clone();
        self.emit(SessionEvent::PlaybackStateChanged(playback));
    }

    pub fn set_state(&self, state: NativePlaybackState) {
        let playback = {
            let mut guard = self.state.lock();
            let mut playback = guard
                .playback
                .clone()
                .unwrap_or_else(|| NativePlayback::new(state));
            playback.state = state;
            guard.playback = Some(playback.clone());
            playback
        };
        self.emit(SessionEvent::PlaybackStateChanged(Some(playback)));
    }

    pub fn set_position(&self, position_ms: i64) {
        let playback = {
            let mut guard = self.state.lock();
            let mut playback = guard
                .playback
                .clone()
                .unwrap_or_else(|| NativePlayback::new(NativePlaybackState::Playing));
            playback.position_ms = position_ms;
            guard.playback = Some(playback.clone());
            playback
        };
        self.emit(SessionEvent::PlaybackStateChanged(Some(playback)));
    }

    pub fn set_metadata(&self, metadata: Option<NativeMetadata>) {
        self.state.lock().metadata = metadata.clone();
        self.emit(SessionEvent::MetadataChanged(metadata));
    }

    pub fn set_queue(&self, queue: Vec<NativeQueueItem>) {
        self.state.lock().queue = queue.clone();
        self.emit(SessionEvent::QueueChanged(queue));
    }

    pub fn set_audio(&self, audio: AudioInfo) {
        self.state.lock().audio = audio;
        self.emit(SessionEvent::AudioInfoChanged(audio));
    }

    fn record(&self, call: NativeCall) {
        self.calls.lock().push(call);
    }

    fn start_search_result(&self, query: &str) {
        let title = if query.is_empty() {
            "Search result".to_string()
        } else {
            query.to_string()
        };
        self.set_metadata(Some(NativeMetadata {
            title: Some(title),
            artist: Some("Search".into()),
            duration_ms: 200_000,
            ..NativeMetadata::default()
        }));
        self.set_state(NativePlaybackState::Playing);
    }

    fn change_track(&self, forward: bool) {
        let metadata = {
            let mut guard = self.state.lock();
            guard.track = if forward {
                guard.track.saturating_add(1)
            } else {
                guard.track.saturating_sub(1)
            };
            let mut metadata = guard.metadata.clone().unwrap_or_default();
            metadata.title = Some(format!("Track {}", guard.track));
            guard.metadata = Some(metadata.clone());
            metadata
        };
        self.emit(SessionEvent::MetadataChanged(Some(metadata)));
    }
}

impl SessionController for SimSession {
    fn package(&self) -> &str {
        &self.package
    }

    fn token(&self) -> &SessionToken {
        &self.token
    }

    fn playback(&self) -> Option<NativePlayback> {
        self.state.lock().playback.clone()
    }

    fn metadata(&self) -> Option<NativeMetadata> {
        self.state.lock().metadata.clone()
    }

    fn queue(&self) -> Vec<NativeQueueItem> {
        self.state.lock().queue.clone()
    }

    fn audio_info(&self) -> AudioInfo {
        self.state.lock().audio
    }

    fn register_events(&self, sink: mpsc::Sender<SessionEvent>) {
        self.record(NativeCall::RegisterEvents(self.package.clone()));
        self.state.lock().sink = Some(sink);
    }

    fn unregister_events(&self) {
        self.record(NativeCall::UnregisterEvents(self.package.clone()));
        self.state.lock().sink = None;
    }

    fn play(&self) -> NativeResult<()> {
        self.record(NativeCall::Play(self.package.clone()));
        self.set_state(NativePlaybackState::Playing);
        Ok(())
    }

    fn pause(&self) -> NativeResult<()> {
        self.record(NativeCall::Pause(self.package.clone()));
        self.set_state(NativePlaybackState::Paused);
        Ok(())
    }

    fn skip_to_next(&self) -> NativeResult<()> {
        self.record(NativeCall::SkipToNext(self.package.clone()));
        self.change_track(true);
        Ok(())
    }

    fn skip_to_previous(&self) -> NativeResult<()> {
        self.record(NativeCall::SkipToPrevious(self.package.clone()));
        self.change_track(false);
        Ok(())
    }

    fn seek_to(&self, position_ms: i64) -> NativeResult<()> {
        self.record(NativeCall::SeekTo(self.package.clone(), position_ms));
        self.set_position(position_ms);
        Ok(())
    }

    fn play_from_search(&self, query: &str) -> NativeResult<()> {
        self.record(NativeCall::PlayFromSearch {
            package: self.package.clone(),
            query: query.to_string(),
        });
        if !self.state.lock().ignores_search {
            self.start_search_result(query);
        }
        Ok(())
    }

    fn play_from_media_id(&self, media_id: &str) -> NativeResult<()> {
        self.record(NativeCall::PlayFromMediaId {
            package: self.package.clone(),
            media_id: media_id.to_string(),
        });
        self.set_metadata(Some(NativeMetadata {
            title: Some(media_id.to_string()),
            ..NativeMetadata::default()
        }));
        self.set_state(NativePlaybackState::Playing);
        Ok(())
    }

    fn send_custom_action(&self, action: &str) -> NativeResult<()> {
        self.record(NativeCall::CustomAction {
            package: self.package.clone(),
            action: action.to_string(),
        });
        Ok(())
    }

    fn skip_to_queue_item(&self, queue_id: i64) -> NativeResult<()> {
        self.record(NativeCall::SkipToQueueItem {
            package: self.package.clone(),
            queue_id,
        });
        let playback = {
            let mut guard = self.state.lock();
            let mut playback = guard
                .playback
                .clone()
                .unwrap_or_else(|| NativePlayback::new(NativePlaybackState::Playing));
            playback.active_queue_id = Some(queue_id);
            guard.playback = Some(playback.clone());
            playback
        };
        self.emit(SessionEvent::PlaybackStateChanged(Some(playback)));
        Ok(())
    }

    fn adjust_volume(&self, direction: VolumeDirection) -> NativeResult<()> {
        self.record(NativeCall::AdjustVolume(self.package.clone(), direction));
        let audio = {
            let mut guard = self.state.lock();
            let delta = match direction {
                VolumeDirection::Raise => 1,
                VolumeDirection::Lower => -1,
            };
            guard.audio.current_volume =
                (guard.audio.current_volume + delta).clamp(0, guard.audio.max_volume);
            guard.audio
        };
        self.emit(SessionEvent::AudioInfoChanged(audio));
        Ok(())
    }

    fn set_volume(&self, level: i32) -> NativeResult<()> {
        self.record(NativeCall::SetVolume(self.package.clone(), level));
        let audio = {
            let mut guard = self.state.lock();
            guard.audio.current_volume = level.clamp(0, guard.audio.max_volume);
            guard.audio
        };
        self.emit(SessionEvent::AudioInfoChanged(audio));
        Ok(())
    }
}

struct SimBrowser {
    package: String,
    token: Option<SessionToken>,
    tree: HashMap<String, Vec<NativeBrowseItem>>,
    sink: Mutex<Option<mpsc::Sender<BrowserEvent>>>,
    calls: CallLog,
}

impl BrowserConnection for SimBrowser {
    fn session_token(&self) -> Option<SessionToken> {
        self.token.clone()
    }

    fn root_id(&self) -> String {
        ROOT_NODE.to_string()
    }

    fn register_events(&self, sink: mpsc::Sender<BrowserEvent>) {
        *self.sink.lock() = Some(sink);
    }

    fn subscribe(&self, node_id: &str) {
        self.calls.lock().push(NativeCall::Subscribe {
            package: self.package.clone(),
            node_id: node_id.to_string(),
        });
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            let items = self.tree.get(node_id).cloned().unwrap_or_default();
            let _ = sink.try_send(BrowserEvent::ChildrenLoaded {
                parent_id: node_id.to_string(),
                items,
            });
        }
    }

    fn unsubscribe(&self, node_id: &str) {
        self.calls.lock().push(NativeCall::Unsubscribe {
            package: self.package.clone(),
            node_id: node_id.to_string(),
        });
    }

    fn disconnect(&self) {
        self.calls
            .lock()
            .push(NativeCall::BrowserDisconnect(self.package.clone()));
        *self.sink.lock() = None;
    }
}

pub fn browse_folder(media_id: &str, title: &str) -> NativeBrowseItem {
    NativeBrowseItem {
        media_id: media_id.to_string(),
        title: title.to_string(),
        subtitle: None,
        icon: None,
        browsable: true,
        playable: false,
    }
}

pub fn browse_track(media_id: &str, title: &str) -> NativeBrowseItem {
    NativeBrowseItem {
        media_id: media_id.to_string(),
        title: title.to_string(),
        subtitle: None,
        icon: None,
        browsable: false,
        playable: true,
    }
}
