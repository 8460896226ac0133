//! Normalization of native session state into the wire snapshot types.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageOutputFormat};
use media_proto::{
    ActionSet, AppInfo, BrowseItem, BrowseList, MediaAction, PlaybackState, PlayerSnapshot,
    QueueItem, QueueSnapshot, SEARCH_ACTION_ID,
};
use tracing::{debug, warn};

use crate::discovery::MediaAppIdentity;
use crate::native::{
    NativeBrowseItem, NativeCustomAction, NativeMetadata, NativePlayback, NativePlaybackState,
    NativeQueueItem,
};

const MIN_ARTWORK_QUALITY: u8 = 20;
const QUALITY_STEP: u8 = 10;

/// Byte budget and lossy compression policy for artwork sent as a direct message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtworkPolicy {
    pub max_bytes: usize,
    pub max_edge: u32,
    pub quality: u8,
}

impl Default for ArtworkPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024,
            max_edge: 320,
            quality: 60,
        }
    }
}

pub fn playback_state(native: Option<&NativePlayback>) -> PlaybackState {
    let Some(playback) = native else {
        return PlaybackState::None;
    };
    match playback.state {
        NativePlaybackState::None | NativePlaybackState::Error => PlaybackState::None,
        NativePlaybackState::Playing
        | NativePlaybackState::FastForwarding
        | NativePlaybackState::Rewinding => PlaybackState::Playing,
        NativePlaybackState::Paused | NativePlaybackState::Stopped => PlaybackState::Paused,
        NativePlaybackState::Buffering
        | NativePlaybackState::Connecting
        | NativePlaybackState::SkippingToPrevious
        | NativePlaybackState::SkippingToNext
        | NativePlaybackState::SkippingToQueueItem => PlaybackState::Loading,
    }
}

/// Player snapshot without artwork; artwork is compressed and sent on its own path.
pub fn player_snapshot(
    playback: Option<&NativePlayback>,
    metadata: Option<&NativeMetadata>,
) -> PlayerSnapshot {
    let state = playback_state(playback);
    let metadata = metadata.cloned().unwrap_or_default();
    PlayerSnapshot {
        playback_state: state,
        title: metadata.title,
        artist: metadata.artist,
        duration_ms: metadata.duration_ms.max(0),
        position_ms: playback.map(|p| p.position_ms.max(0)).unwrap_or(0),
        playback_speed: playback.map(|p| p.speed).unwrap_or(1.0),
        artwork: None,
    }
    .normalized()
}

pub fn action_set(
    custom: &[NativeCustomAction],
    searchable: bool,
    icon_edge: u32,
) -> ActionSet {
    let mut actions: Vec<MediaAction> = custom
        .iter()
        .map(|action| MediaAction {
            action_id: action.action.clone(),
            label: action.name.clone(),
            icon: action.icon.as_deref().and_then(|raw| downscale_icon(raw, icon_edge)),
        })
        .collect();
    if searchable {
        actions.push(MediaAction {
            action_id: SEARCH_ACTION_ID.to_string(),
            label: "Search".to_string(),
            icon: None,
        });
    }
    ActionSet { actions }
}

pub fn queue_snapshot(
    items: &[NativeQueueItem],
    active_queue_id: Option<i64>,
    icon_edge: u32,
) -> QueueSnapshot {
    QueueSnapshot {
        items: items
            .iter()
            .map(|item| QueueItem {
                queue_id: item.queue_id,
                title: item.title.clone(),
                subtitle: item.subtitle.clone(),
                icon: item.icon.as_deref().and_then(|raw| downscale_icon(raw, icon_edge)),
            })
            .collect(),
        active_queue_id,
    }
}

pub fn browse_list(
    parent_id: &str,
    depth: usize,
    items: &[NativeBrowseItem],
    icon_edge: u32,
) -> BrowseList {
    BrowseList {
        parent_id: parent_id.to_string(),
        depth,
        items: items
            .iter()
            .map(|item| BrowseItem {
                media_id: item.media_id.clone(),
                title: item.title.clone(),
                subtitle: item.subtitle.clone(),
                icon: item.icon.as_deref().and_then(|raw| downscale_icon(raw, icon_edge)),
                browsable: item.browsable,
                playable: item.playable,
            })
            .collect(),
    }
}

pub fn app_info(identity: &MediaAppIdentity, icon_edge: u32) -> AppInfo {
    AppInfo {
        package: identity.package.clone(),
        label: identity.label.clone(),
        icon: identity
            .icon
            .as_deref()
            .and_then(|raw| downscale_icon(raw, icon_edge)),
        searchable: identity.searchable.is_some(),
    }
}

/// Re-encodes artwork as JPEG within `policy.max_bytes`, lowering quality stepwise.
/// Returns `None` when the image cannot be decoded or never fits the budget.
pub fn compress_artwork(raw: &[u8], policy: &ArtworkPolicy) -> Option<Bytes> {
    let image = match image::load_from_memory(raw) {
        Ok(image) => image,
        Err(err) => {
            debug!(target = "bridge.publisher", error = %err, "undecodable artwork dropped");
            return None;
        }
    };
    let image = fit_within(image, policy.max_edge);
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut quality = policy.quality.clamp(MIN_ARTWORK_QUALITY, 100);
    loop {
        let mut encoded = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, quality);
        if let Err(err) = encoder.encode(rgb.as_raw(), width, height, ColorType::Rgb8) {
            debug!(target = "bridge.publisher", error = %err, "artwork encode failed");
            return None;
        }
        if encoded.len() <= policy.max_bytes {
            return Some(Bytes::from(encoded));
        }
        if quality <= MIN_ARTWORK_QUALITY {
            debug!(
                target = "bridge.publisher",
                size = encoded.len(),
                budget = policy.max_bytes,
                "artwork exceeds budget at minimum quality"
            );
            return None;
        }
        quality = quality.saturating_sub(QUALITY_STEP).max(MIN_ARTWORK_QUALITY);
    }
}

/// Downscales an item icon to `edge` pixels and re-encodes it as PNG.
pub fn downscale_icon(raw: &[u8], edge: u32) -> Option<Bytes> {
    let image = image::load_from_memory(raw).ok()?;
    let image = fit_within(image, edge);
    let mut encoded = Cursor::new(Vec::new());
    image.write_to(&mut encoded, ImageOutputFormat::Png).ok()?;
    Some(Bytes::from(encoded.into_inner()))
}

/// Runs image work on the blocking pool. `None` only if the work panicked.
pub async fn render_blocking<T, F>(what: &'static str, work: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(target = "bridge.publisher", what, error = %err, "image rendering failed");
            None
        }
    }
}

fn fit_within(image: DynamicImage, edge: u32) -> DynamicImage {
    if image.width() <= edge && image.height() <= edge {
        image
    } else {
        image.resize(edge, edge, FilterType::Triangle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(7919) ^ y.wrapping_mul(104_729)) as u8;
            Rgb([v, v.wrapping_mul(3), v.wrapping_add(91)])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, ImageOutputFormat::Png)
            .expect("png");
        out.into_inner()
    }

    #[test]
    fn native_states_collapse_to_four() {
        let state = |s| playback_state(Some(&NativePlayback::new(s)));
        assert_eq!(state(NativePlaybackState::FastForwarding), PlaybackState::Playing);
        assert_eq!(state(NativePlaybackState::Buffering), PlaybackState::Loading);
        assert_eq!(state(NativePlaybackState::Stopped), PlaybackState::Paused);
        assert_eq!(state(NativePlaybackState::Error), PlaybackState::None);
        assert_eq!(playback_state(None), PlaybackState::None);
    }

    #[test]
    fn none_state_drops_metadata() {
        let metadata = NativeMetadata {
            title: Some("Song".into()),
            artist: Some("Band".into()),
            ..NativeMetadata::default()
        };
        let snapshot = player_snapshot(None, Some(&metadata));
        assert_eq!(snapshot, PlayerSnapshot::cleared());
    }

    #[test]
    fn search_action_is_appended_when_searchable() {
        let custom = vec![NativeCustomAction {
            action: "like".into(),
            name: "Like".into(),
            icon: None,
        }];
        let set = action_set(&custom, true, 64);
        let ids: Vec<&str> = set.actions.iter().map(|a| a.action_id.as_str()).collect();
        assert_eq!(ids, ["like", SEARCH_ACTION_ID]);
        assert!(action_set(&[], false, 64).is_empty());
    }

    #[test]
    fn artwork_is_resized_and_fits_budget() {
        let raw = noisy_png(800, 600);
        let policy = ArtworkPolicy::default();
        let jpeg = compress_artwork(&raw, &policy).expect("artwork");
        assert!(jpeg.len() <= policy.max_bytes);
        let decoded = image::load_from_memory(&jpeg).expect("decodable");
        assert!(decoded.width() <= policy.max_edge && decoded.height() <= policy.max_edge);
    }

    #[test]
    fn artwork_over_budget_is_dropped() {
        let raw = noisy_png(320, 320);
        let policy = ArtworkPolicy {
            max_bytes: 64,
            ..ArtworkPolicy::default()
        };
        assert!(compress_artwork(&raw, &policy).is_none());
        assert!(compress_artwork(b"not an image", &ArtworkPolicy::default()).is_none());
    }

    #[test]
    fn icons_are_downscaled() {
        let icon = downscale_icon(&noisy_png(256, 128), 64).expect("icon");
        let decoded = image::load_from_memory(&icon).expect("png");
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
    }
}
