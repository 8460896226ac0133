//! Native media-session capability consumed by the bridge.
//!
//! The platform pieces (session manager, session controllers, media browser
//! connections) are reached only through these traits. Change notifications are
//! delivered as messages on a channel the bridge hands over at registration time,
//! never as re-entrant callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod sim;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
}

impl ComponentName {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }
}

/// A live session as listed by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSessionHandle {
    pub package: String,
    pub token: SessionToken,
}

/// What the package manager knows about an installed app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub label: String,
    pub icon: Option<Bytes>,
    pub searchable: Option<ComponentName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativePlaybackState {
    None,
    Stopped,
    Paused,
    Playing,
    FastForwarding,
    Rewinding,
    Buffering,
    Connecting,
    SkippingToPrevious,
    SkippingToNext,
    SkippingToQueueItem,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCustomAction {
    pub action: String,
    pub name: String,
    pub icon: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativePlayback {
    pub state: NativePlaybackState,
    pub position_ms: i64,
    pub speed: f32,
    pub active_queue_id: Option<i64>,
    pub custom_actions: Vec<NativeCustomAction>,
}

impl NativePlayback {
    pub fn new(state: NativePlaybackState) -> Self {
        Self {
            state,
            position_ms: 0,
            speed: 1.0,
            active_queue_id: None,
            custom_actions: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            NativePlaybackState::Playing
                | NativePlaybackState::FastForwarding
                | NativePlaybackState::Rewinding
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: i64,
    pub art: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeQueueItem {
    pub queue_id: i64,
    pub title: String,
    pub subtitle: Option<String>,
    pub icon: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioInfo {
    pub current_volume: i32,
    pub max_volume: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeBrowseItem {
    pub media_id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub icon: Option<Bytes>,
    pub browsable: bool,
    pub playable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PlaybackStateChanged(Option<NativePlayback>),
    MetadataChanged(Option<NativeMetadata>),
    QueueChanged(Vec<NativeQueueItem>),
    AudioInfoChanged(AudioInfo),
    SessionDestroyed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    ChildrenLoaded {
        parent_id: String,
        items: Vec<NativeBrowseItem>,
    },
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeDirection {
    Raise,
    Lower,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NativeError {
    #[error("package {0} is not installed")]
    PackageNotFound(String),
    #[error("binder call failed: {0}")]
    Binder(String),
    #[error("media browser connection to {0} failed")]
    BrowserConnectionFailed(String),
    #[error("{0} is not supported by this session")]
    Unsupported(&'static str),
}

pub type NativeResult<T> = Result<T, NativeError>;

/// A bound session: state accessors, event registration and transport controls.
pub trait SessionController: Send + Sync {
    fn package(&self) -> &str;
    fn token(&self) -> &SessionToken;

    fn playback(&self) -> Option<NativePlayback>;
    fn metadata(&self) -> Option<NativeMetadata>;
    fn queue(&self) -> Vec<NativeQueueItem>;
    fn audio_info(&self) -> AudioInfo;

    /// Replaces any previous registration.
    fn register_events(&self, sink: mpsc::Sender<SessionEvent>);
    fn unregister_events(&self);

    fn play(&self) -> NativeResult<()>;
    fn pause(&self) -> NativeResult<()>;
    fn skip_to_next(&self) -> NativeResult<()>;
    fn skip_to_previous(&self) -> NativeResult<()>;
    fn seek_to(&self, position_ms: i64) -> NativeResult<()>;
    fn play_from_search(&self, query: &str) -> NativeResult<()>;
    fn play_from_media_id(&self, media_id: &str) -> NativeResult<()>;
    fn send_custom_action(&self, action: &str) -> NativeResult<()>;
    fn skip_to_queue_item(&self, queue_id: i64) -> NativeResult<()>;
    fn adjust_volume(&self, direction: VolumeDirection) -> NativeResult<()>;
    fn set_volume(&self, level: i32) -> NativeResult<()>;
}

/// A connected media browser. Only one node is subscribed at a time.
pub trait BrowserConnection: Send + Sync {
    fn session_token(&self) -> Option<SessionToken>;
    fn root_id(&self) -> String;
    fn register_events(&self, sink: mpsc::Sender<BrowserEvent>);
    fn subscribe(&self, node_id: &str);
    fn unsubscribe(&self, node_id: &str);
    fn disconnect(&self);
}

#[async_trait]
pub trait MediaSessionHost: Send + Sync {
    fn active_sessions(&self) -> Vec<NativeSessionHandle>;
    fn resolve_package(&self, package: &str) -> NativeResult<PackageEntry>;
    /// Every installed component advertising a media browser service.
    fn browser_services(&self) -> Vec<ComponentName>;
    fn launch_app(&self, package: &str) -> NativeResult<()>;
    fn dispatch_search_intent(&self, package: &str, query: &str) -> NativeResult<()>;
    fn bind(&self, token: &SessionToken) -> NativeResult<Arc<dyn SessionController>>;
    /// Resolves once the browser reports connected or failed.
    async fn connect_browser(
        &self,
        component: &ComponentName,
    ) -> NativeResult<Arc<dyn BrowserConnection>>;
}
