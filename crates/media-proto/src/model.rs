use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::{ProtoError, ProtoResult};

/// Action id of the search entry appended to an [`ActionSet`] when the bound app is
/// searchable. The wear side resolves it locally into a play-from-search command.
pub const SEARCH_ACTION_ID: &str = "wristsync.search";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackState {
    #[default]
    None,
    Loading,
    Playing,
    Paused,
}

/// Normalized player state. `artwork` travels on its own path; the player-state
/// message always carries it stripped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub playback_state: PlaybackState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub position_ms: i64,
    #[serde(default = "default_speed")]
    pub playback_speed: f32,
    #[serde(
        default,
        with = "codec::b64",
        skip_serializing_if = "Option::is_none"
    )]
    pub artwork: Option<Bytes>,
}

fn default_speed() -> f32 {
    1.0
}

impl PlayerSnapshot {
    /// The "unavailable" snapshot: nothing bound, nothing to show.
    pub fn cleared() -> Self {
        Self {
            playback_speed: default_speed(),
            ..Self::default()
        }
    }

    /// Enforces that a `NONE` state carries no metadata.
    pub fn normalized(self) -> Self {
        if self.playback_state == PlaybackState::None {
            Self::cleared()
        } else {
            self
        }
    }

    pub fn is_cleared(&self) -> bool {
        self.playback_state == PlaybackState::None
    }

    pub fn has_metadata(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.is_empty())
            || self.artist.as_deref().is_some_and(|a| !a.is_empty())
    }

    pub fn without_artwork(&self) -> Self {
        Self {
            artwork: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAction {
    pub action_id: String,
    pub label: String,
    #[serde(
        default,
        with = "codec::b64",
        skip_serializing_if = "Option::is_none"
    )]
    pub icon: Option<Bytes>,
}

/// Complete replacement list of custom actions. Never sent as a delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSet {
    pub actions: Vec<MediaAction>,
}

impl ActionSet {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub queue_id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(
        default,
        with = "codec::b64",
        skip_serializing_if = "Option::is_none"
    )]
    pub icon: Option<Bytes>,
}

/// Equality is structural (order and every field), which is what duplicate
/// suppression relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub items: Vec<QueueItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_queue_id: Option<i64>,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseItem {
    pub media_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(
        default,
        with = "codec::b64",
        skip_serializing_if = "Option::is_none"
    )]
    pub icon: Option<Bytes>,
    pub browsable: bool,
    pub playable: bool,
}

/// Children of the node on top of the browse stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseList {
    pub parent_id: String,
    /// Stack depth of `parent_id`; the root is depth 1.
    pub depth: usize,
    pub items: Vec<BrowseItem>,
}

impl BrowseList {
    pub fn can_go_back(&self) -> bool {
        self.depth > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub package: String,
    pub label: String,
    #[serde(
        default,
        with = "codec::b64",
        skip_serializing_if = "Option::is_none"
    )]
    pub icon: Option<Bytes>,
    #[serde(default)]
    pub searchable: bool,
}

/// Body of a connect command. An absent package means "first active session".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default)]
    pub auto_launch: bool,
    #[serde(default)]
    pub soft_launch: bool,
}

impl ConnectRequest {
    pub fn auto() -> Self {
        Self::default()
    }

    pub fn package(package: impl Into<String>) -> Self {
        Self {
            package: Some(package.into()),
            ..Self::default()
        }
    }
}

/// Volume reply body: two big-endian `i32`s, current then max.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeStatus {
    pub current: i32,
    pub max: i32,
}

impl VolumeStatus {
    pub const ENCODED_LEN: usize = 8;

    pub fn encode(&self) -> Bytes {
        let mut raw = [0u8; Self::ENCODED_LEN];
        raw[..4].copy_from_slice(&self.current.to_be_bytes());
        raw[4..].copy_from_slice(&self.max.to_be_bytes());
        Bytes::copy_from_slice(&raw)
    }

    pub fn decode(payload: &[u8]) -> ProtoResult<Self> {
        if payload.len() != Self::ENCODED_LEN {
            return Err(ProtoError::InvalidLength {
                expected: Self::ENCODED_LEN,
                actual: payload.len(),
            });
        }
        Ok(Self {
            current: codec::decode_i32(&payload[..4])?,
            max: codec::decode_i32(&payload[4..])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_state_clears_metadata() {
        let snapshot = PlayerSnapshot {
            playback_state: PlaybackState::None,
            title: Some("stale".into()),
            artist: Some("stale".into()),
            position_ms: 42,
            ..PlayerSnapshot::cleared()
        }
        .normalized();
        assert_eq!(snapshot, PlayerSnapshot::cleared());
        assert!(!snapshot.has_metadata());
    }

    #[test]
    fn player_snapshot_json_shape() {
        let snapshot = PlayerSnapshot {
            playback_state: PlaybackState::Playing,
            title: Some("Song".into()),
            artist: Some("Band".into()),
            duration_ms: 180_000,
            position_ms: 1_000,
            playback_speed: 1.0,
            artwork: Some(Bytes::from_static(b"\x01\x02")),
        };
        let value: serde_json::Value =
            serde_json::from_slice(&codec::encode_json(&snapshot.without_artwork()).expect("json"))
                .expect("value");
        assert_eq!(value["playbackState"], "PLAYING");
        assert_eq!(value["durationMs"], 180_000);
        assert!(value.get("artwork").is_none());

        let with_art: PlayerSnapshot =
            codec::decode_json(&codec::encode_json(&snapshot).expect("json")).expect("decode");
        assert_eq!(with_art.artwork, snapshot.artwork);
    }

    #[test]
    fn absent_collection_encodes_as_null_tombstone() {
        let absent: Option<QueueSnapshot> = None;
        assert_eq!(codec::encode_json(&absent).expect("json").as_ref(), b"null");
        let decoded: Option<QueueSnapshot> = codec::decode_json(b"null").expect("decode");
        assert!(decoded.is_none());
    }

    #[test]
    fn queue_equality_is_structural() {
        let item = |id: i64, title: &str| QueueItem {
            queue_id: id,
            title: title.into(),
            subtitle: None,
            icon: None,
        };
        let a = QueueSnapshot {
            items: vec![item(1, "a"), item(2, "b")],
            active_queue_id: Some(1),
        };
        let mut reordered = a.clone();
        reordered.items.reverse();
        assert_eq!(a, a.clone());
        assert_ne!(a, reordered);
    }

    #[test]
    fn volume_status_layout() {
        let status = VolumeStatus {
            current: 7,
            max: 15,
        };
        assert_eq!(status.encode().as_ref(), &[0, 0, 0, 7, 0, 0, 0, 15]);
        assert_eq!(VolumeStatus::decode(&status.encode()).expect("decode"), status);
        assert!(VolumeStatus::decode(&[0; 4]).is_err());
    }
}
