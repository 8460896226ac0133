use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::discovery::MediaAppIdentity;
use crate::native::{
    BrowserConnection, NativeBrowseItem, NativeMetadata, NativePlayback, NativeQueueItem,
    SessionController,
};

/// What a connect command asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectedSession {
    /// First active session found.
    Auto,
    Pinned(String),
}

impl SelectedSession {
    pub fn from_request(package: Option<String>) -> Self {
        match package {
            Some(package) if !package.is_empty() => SelectedSession::Pinned(package),
            _ => SelectedSession::Auto,
        }
    }

    pub fn matches(&self, package: &str) -> bool {
        match self {
            SelectedSession::Auto => true,
            SelectedSession::Pinned(pinned) => pinned == package,
        }
    }

    pub fn pinned(&self) -> Option<&str> {
        match self {
            SelectedSession::Auto => None,
            SelectedSession::Pinned(package) => Some(package),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    Idle,
    Connecting,
    Bound,
    Disconnecting,
}

/// Published on every transition so callers can observe the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStatus {
    pub phase: BridgePhase,
    pub package: Option<String>,
}

impl BridgeStatus {
    pub fn idle() -> Self {
        Self {
            phase: BridgePhase::Idle,
            package: None,
        }
    }
}

/// Depth stack of browse node ids. Only the top node is ever subscribed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseStack {
    nodes: Vec<String>,
    children: Vec<NativeBrowseItem>,
}

impl BrowseStack {
    pub fn new(root: String) -> Self {
        Self {
            nodes: vec![root],
            children: Vec::new(),
        }
    }

    pub fn top(&self) -> &str {
        self.nodes.last().map(String::as_str).unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.nodes.len()
    }

    pub fn push(&mut self, node: String) {
        self.nodes.push(node);
        self.children.clear();
    }

    /// Pops the top node; the root is never popped.
    pub fn pop(&mut self) -> Option<String> {
        if self.nodes.len() <= 1 {
            return None;
        }
        self.children.clear();
        self.nodes.pop()
    }

    /// Children for anything but the current top are stale and dropped.
    pub fn set_children(&mut self, parent: &str, items: Vec<NativeBrowseItem>) -> bool {
        if parent != self.top() {
            return false;
        }
        self.children = items;
        true
    }

    pub fn children(&self) -> &[NativeBrowseItem] {
        &self.children
    }

    pub fn child(&self, media_id: &str) -> Option<&NativeBrowseItem> {
        self.children.iter().find(|item| item.media_id == media_id)
    }
}

pub(crate) struct BrowserBinding {
    pub connection: Arc<dyn BrowserConnection>,
    /// `None` after the browser reported suspension.
    pub stack: Option<BrowseStack>,
    pub forwarder: JoinHandle<()>,
}

impl BrowserBinding {
    pub fn release(self) {
        if let Some(stack) = &self.stack {
            self.connection.unsubscribe(stack.top());
        }
        self.connection.disconnect();
        self.forwarder.abort();
    }
}

pub(crate) struct Binding {
    pub identity: MediaAppIdentity,
    pub generation: u64,
    pub controller: Arc<dyn SessionController>,
    pub forwarder: JoinHandle<()>,
    pub browser: Option<BrowserBinding>,
    pub playback: Option<NativePlayback>,
    pub metadata: Option<NativeMetadata>,
    pub queue: Vec<NativeQueueItem>,
}

impl Binding {
    pub fn package(&self) -> &str {
        &self.identity.package
    }

    pub fn active_queue_id(&self) -> Option<i64> {
        self.playback.as_ref().and_then(|p| p.active_queue_id)
    }

    /// Unregisters callbacks and stops forwarding; later events from this
    /// binding are never delivered.
    pub fn release(self) {
        self.controller.unregister_events();
        self.forwarder.abort();
        if let Some(browser) = self.browser {
            browser.release();
        }
    }
}

pub(crate) enum BridgeState {
    Idle,
    Connecting {
        identity: MediaAppIdentity,
        generation: u64,
    },
    Bound(Binding),
    Disconnecting {
        binding: Binding,
        epoch: u64,
    },
}

impl BridgeState {
    pub fn status(&self) -> BridgeStatus {
        match self {
            BridgeState::Idle => BridgeStatus::idle(),
            BridgeState::Connecting { identity, .. } => BridgeStatus {
                phase: BridgePhase::Connecting,
                package: Some(identity.package.clone()),
            },
            BridgeState::Bound(binding) => BridgeStatus {
                phase: BridgePhase::Bound,
                package: Some(binding.package().to_string()),
            },
            BridgeState::Disconnecting { binding, .. } => BridgeStatus {
                phase: BridgePhase::Disconnecting,
                package: Some(binding.package().to_string()),
            },
        }
    }

    /// The binding that still owns a live session, including one inside the
    /// teardown grace period.
    pub fn binding(&self) -> Option<&Binding> {
        match self {
            BridgeState::Bound(binding) | BridgeState::Disconnecting { binding, .. } => {
                Some(binding)
            }
            _ => None,
        }
    }

    pub fn binding_mut(&mut self) -> Option<&mut Binding> {
        match self {
            BridgeState::Bound(binding) | BridgeState::Disconnecting { binding, .. } => {
                Some(binding)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::sim::{browse_folder, browse_track};

    #[test]
    fn root_is_never_popped() {
        let mut stack = BrowseStack::new("root".into());
        assert_eq!(stack.pop(), None);
        stack.push("playlists".into());
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.pop().as_deref(), Some("playlists"));
        assert_eq!(stack.top(), "root");
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn children_only_apply_to_top_of_stack() {
        let mut stack = BrowseStack::new("root".into());
        stack.push("playlists".into());
        assert!(!stack.set_children("root", vec![browse_folder("x", "X")]));
        assert!(stack.children().is_empty());
        assert!(stack.set_children("playlists", vec![browse_track("t", "T")]));
        assert!(stack.child("t").is_some_and(|item| item.playable));
    }

    #[test]
    fn auto_selection_matches_any_package() {
        assert!(SelectedSession::Auto.matches("com.any"));
        let pinned = SelectedSession::from_request(Some("com.music".into()));
        assert!(pinned.matches("com.music"));
        assert!(!pinned.matches("com.other"));
        assert_eq!(SelectedSession::from_request(Some(String::new())), SelectedSession::Auto);
    }
}
