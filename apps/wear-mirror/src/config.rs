use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub node_id: String,
    /// When unset the first reachable node is treated as the phone.
    pub phone_node: Option<String>,
    pub tombstone_grace: Duration,
    pub pager_debounce: Duration,
}

impl MirrorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let node_id = std::env::var("WRISTSYNC_WATCH_NODE_ID").unwrap_or(defaults.node_id);
        let phone_node = std::env::var("WRISTSYNC_PHONE_NODE_ID")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let tombstone_grace = std::env::var("WRISTSYNC_TOMBSTONE_GRACE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.tombstone_grace);
        let pager_debounce = std::env::var("WRISTSYNC_PAGER_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.pager_debounce);
        Self {
            node_id,
            phone_node,
            tombstone_grace,
            pager_debounce,
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            node_id: "watch".into(),
            phone_node: None,
            tombstone_grace: Duration::from_millis(1_500),
            pager_debounce: Duration::from_millis(250),
        }
    }
}
