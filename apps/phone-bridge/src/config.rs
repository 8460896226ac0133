use std::time::Duration;

use crate::snapshot::ArtworkPolicy;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub node_id: String,
    pub log_filter: String,
    pub debounce: Duration,
    pub teardown_grace: Duration,
    pub search_timeout: Duration,
    pub artwork: ArtworkPolicy,
    pub icon_max_edge: u32,
    pub feature_enabled: bool,
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let log_filter = std::env::var("WRISTSYNC_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(defaults.log_filter);
        let node_id = std::env::var("WRISTSYNC_NODE_ID").unwrap_or(defaults.node_id);
        let debounce = env_millis("WRISTSYNC_DEBOUNCE_MS").unwrap_or(defaults.debounce);
        let teardown_grace =
            env_millis("WRISTSYNC_TEARDOWN_GRACE_MS").unwrap_or(defaults.teardown_grace);
        let search_timeout =
            env_millis("WRISTSYNC_SEARCH_TIMEOUT_MS").unwrap_or(defaults.search_timeout);
        let artwork = ArtworkPolicy {
            max_bytes: env_parse("WRISTSYNC_ARTWORK_MAX_BYTES")
                .unwrap_or(defaults.artwork.max_bytes),
            max_edge: env_parse("WRISTSYNC_ARTWORK_MAX_EDGE").unwrap_or(defaults.artwork.max_edge),
            quality: env_parse("WRISTSYNC_ARTWORK_QUALITY").unwrap_or(defaults.artwork.quality),
        };
        let icon_max_edge = env_parse("WRISTSYNC_ICON_MAX_EDGE").unwrap_or(defaults.icon_max_edge);
        let feature_enabled = std::env::var("WRISTSYNC_FEATURE_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
            .unwrap_or(defaults.feature_enabled);
        Self {
            node_id,
            log_filter,
            debounce,
            teardown_grace,
            search_timeout,
            artwork,
            icon_max_edge,
            feature_enabled,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            node_id: "phone".into(),
            log_filter: "info,phone_bridge=debug".into(),
            debounce: Duration::from_millis(400),
            teardown_grace: Duration::from_millis(3_000),
            search_timeout: Duration::from_millis(8_000),
            artwork: ArtworkPolicy::default(),
            icon_max_edge: 64,
            feature_enabled: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
