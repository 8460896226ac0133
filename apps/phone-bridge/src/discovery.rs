use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::native::{ComponentName, MediaSessionHost, NativeSessionHandle};

/// Resolved identity of an app that owns (or can own) a media session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAppIdentity {
    pub package: String,
    pub label: String,
    pub icon: Option<Bytes>,
    pub searchable: Option<ComponentName>,
    pub browser: Option<ComponentName>,
    /// Present when the app has a live session right now.
    pub session: Option<NativeSessionHandle>,
}

impl MediaAppIdentity {
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }
}

/// Enumerates active sessions and installed media apps.
#[derive(Clone)]
pub struct SessionDiscovery {
    host: Arc<dyn MediaSessionHost>,
}

impl SessionDiscovery {
    pub fn new(host: Arc<dyn MediaSessionHost>) -> Self {
        Self { host }
    }

    pub fn list_active_sessions(&self) -> Vec<NativeSessionHandle> {
        self.host.active_sessions()
    }

    /// Resolves a live session to its app identity. Resolution failures are logged
    /// and yield `None`; callers drop the candidate.
    pub fn resolve_identity(&self, handle: &NativeSessionHandle) -> Option<MediaAppIdentity> {
        let mut identity = self.resolve_package(&handle.package)?;
        identity.session = Some(handle.clone());
        Some(identity)
    }

    /// Resolves an installed package, attaching its live session if one exists.
    pub fn resolve_package(&self, package: &str) -> Option<MediaAppIdentity> {
        let entry = match self.host.resolve_package(package) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    target = "bridge.discovery",
                    package,
                    error = %err,
                    "failed to resolve media app; excluding candidate"
                );
                return None;
            }
        };
        let session = self
            .host
            .active_sessions()
            .into_iter()
            .find(|handle| handle.package == package);
        let browser = self
            .host
            .browser_services()
            .into_iter()
            .find(|component| component.package == package);
        Some(MediaAppIdentity {
            package: package.to_string(),
            label: entry.label,
            icon: entry.icon,
            searchable: entry.searchable,
            browser,
            session,
        })
    }

    /// Active sessions first (in platform order), then installed browser services
    /// without a live session. One entry per package.
    pub fn list_candidates(&self) -> Vec<MediaAppIdentity> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for handle in self.list_active_sessions() {
            if !seen.insert(handle.package.clone()) {
                continue;
            }
            if let Some(identity) = self.resolve_identity(&handle) {
                candidates.push(identity);
            }
        }

        for component in self.host.browser_services() {
            if !seen.insert(component.package.clone()) {
                continue;
            }
            match self.resolve_package(&component.package) {
                Some(identity) => candidates.push(identity),
                None => debug!(
                    target = "bridge.discovery",
                    package = %component.package,
                    "browser service without resolvable package"
                ),
            }
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::sim::{SimApp, SimulatedHost};

    fn discovery(host: &SimulatedHost) -> SessionDiscovery {
        SessionDiscovery::new(Arc::new(host.clone()))
    }

    #[test]
    fn active_sessions_come_before_idle_browser_apps() {
        let host = SimulatedHost::new();
        host.install(SimApp::new("com.a", "A").with_browser());
        host.install(SimApp::new("com.b", "B").with_browser());
        host.install(SimApp::new("com.c", "C"));
        host.start_session("com.c");

        let packages: Vec<String> = discovery(&host)
            .list_candidates()
            .into_iter()
            .map(|identity| identity.package)
            .collect();
        assert_eq!(packages, ["com.c", "com.a", "com.b"]);
    }

    #[test]
    fn unresolvable_session_is_excluded() {
        let host = SimulatedHost::new();
        host.install(SimApp::new("com.gone", "Gone"));
        host.install(SimApp::new("com.kept", "Kept"));
        host.start_session("com.gone");
        host.start_session("com.kept");
        host.uninstall("com.gone");

        let candidates = discovery(&host).list_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].package, "com.kept");
        assert!(candidates[0].is_active());
    }

    #[test]
    fn identity_carries_search_and_browser_components() {
        let host = SimulatedHost::new();
        host.install(SimApp::new("com.music", "Music").searchable().with_browser());

        let identity = discovery(&host)
            .resolve_package("com.music")
            .expect("resolved");
        assert_eq!(identity.label, "Music");
        assert!(identity.searchable.is_some());
        assert_eq!(
            identity.browser.clone().map(|c| c.package),
            Some("com.music".to_string())
        );
        assert!(!identity.is_active());
    }
}
