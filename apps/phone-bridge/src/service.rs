use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;
use transport_bus::Transport;

use crate::bridge::{BridgeHandle, SessionBridge};
use crate::config::BridgeConfig;
use crate::native::MediaSessionHost;
use crate::peers::ConnectedPeers;
use crate::publisher::Publisher;
use crate::router::{CommandRouter, FeatureGate};

/// The phone side fully wired: bridge actor, publisher and command router sharing
/// one peer set and one transport.
pub struct PhoneBridge {
    bridge: BridgeHandle,
    publisher: Publisher,
    router: CommandRouter,
    peers: ConnectedPeers,
    tasks: Vec<JoinHandle<()>>,
}

impl PhoneBridge {
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: &BridgeConfig,
        host: Arc<dyn MediaSessionHost>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let peers = ConnectedPeers::new();
        let publisher = Publisher::new(Arc::clone(&transport), peers.clone(), config);
        let (bridge, bridge_task) = SessionBridge::spawn(host, publisher.clone(), config);
        let router = CommandRouter::new(
            bridge.clone(),
            publisher.clone(),
            FeatureGate::new(config.feature_enabled),
            config.icon_max_edge,
        );
        let router_task = router.spawn(transport.as_ref());
        info!(
            target = "bridge.service",
            node = %transport.local_id(),
            debounce_ms = config.debounce.as_millis() as u64,
            teardown_grace_ms = config.teardown_grace.as_millis() as u64,
            search_timeout_ms = config.search_timeout.as_millis() as u64,
            feature_enabled = config.feature_enabled,
            "phone bridge started"
        );
        Self {
            bridge,
            publisher,
            router,
            peers,
            tasks: vec![bridge_task, router_task],
        }
    }

    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn peers(&self) -> &ConnectedPeers {
        &self.peers
    }

    pub fn gate(&self) -> &FeatureGate {
        self.router.gate()
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    /// Stops the bridge actor (releasing any binding) and the router loop.
    pub async fn shutdown(self) {
        self.bridge.shutdown().await;
        let mut tasks = self.tasks.into_iter();
        if let Some(bridge_task) = tasks.next() {
            let _ = bridge_task.await;
        }
        for task in tasks {
            task.abort();
        }
        info!(target = "bridge.service", "phone bridge stopped");
    }
}
