//! Transport contract between paired devices.
//!
//! Three delivery surfaces, all best effort:
//! - bounded direct messages addressed by peer id and path
//! - larger per-peer byte channels, delivered to the reader once the writer closes
//! - a replicated key/value data store with a change-notification stream
//!
//! [`LocalHub`] implements the contract in memory for tests and the demo pairing.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

mod local;

pub use local::{LocalHub, LocalNode};

pub type PeerId = String;

/// Ceiling applied to direct messages; larger payloads belong on a channel.
pub const MAX_MESSAGE_BYTES: usize = 100 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub source: PeerId,
    pub path: String,
    pub payload: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Peer(PeerId),
    /// Every reachable node except the sender.
    Broadcast,
}

impl Target {
    pub fn peer(id: impl Into<PeerId>) -> Self {
        Target::Peer(id.into())
    }
}

/// A channel payload as seen by the reading side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFrame {
    pub source: PeerId,
    pub path: String,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEvent {
    Changed { path: String, payload: Bytes },
    Deleted { path: String },
}

impl DataEvent {
    pub fn path(&self) -> &str {
        match self {
            DataEvent::Changed { path, .. } | DataEvent::Deleted { path } => path,
        }
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("peer {0} is not reachable")]
    Unreachable(PeerId),
    #[error("payload for {path} is {size} bytes, limit is {limit}")]
    PayloadTooLarge {
        path: String,
        size: usize,
        limit: usize,
    },
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Writing half of an open channel. The reader sees nothing until `close`.
#[async_trait]
pub trait ChannelWriter: Send {
    async fn write(&mut self, bytes: &[u8]) -> BusResult<()>;
    async fn close(self: Box<Self>) -> BusResult<()>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn local_id(&self) -> &str;

    /// Nodes currently reachable from this one, excluding itself.
    async fn connected_peers(&self) -> BusResult<Vec<PeerId>>;

    async fn send_message(
        &self,
        target: Target,
        path: &str,
        payload: Option<Bytes>,
    ) -> BusResult<()>;

    fn subscribe_messages(&self) -> broadcast::Receiver<Message>;

    async fn open_channel(&self, peer: &str, path: &str) -> BusResult<Box<dyn ChannelWriter>>;

    fn subscribe_channels(&self) -> broadcast::Receiver<ChannelFrame>;

    async fn put_data(&self, path: &str, payload: Bytes) -> BusResult<()>;

    async fn delete_data(&self, path: &str) -> BusResult<()>;

    async fn get_data(&self, path: &str) -> BusResult<Option<Bytes>>;

    fn subscribe_data(&self) -> broadcast::Receiver<DataEvent>;
}

/// Opens a channel to `peer`, writes `payload` in one piece and closes it.
pub async fn send_over_channel(
    transport: &dyn Transport,
    peer: &str,
    path: &str,
    payload: &[u8],
) -> BusResult<()> {
    let mut writer = transport.open_channel(peer, path).await?;
    writer.write(payload).await?;
    writer.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_over_channel_delivers_single_frame() {
        let hub = LocalHub::new();
        let phone = hub.node("phone");
        let watch = hub.node("watch");
        let mut frames = watch.subscribe_channels();

        send_over_channel(&phone, "watch", "/media/queue_list", b"[1,2]")
            .await
            .expect("channel send");

        let frame = frames.recv().await.expect("frame");
        assert_eq!(frame.source, "phone");
        assert_eq!(frame.path, "/media/queue_list");
        assert_eq!(frame.payload, Bytes::from_static(b"[1,2]"));
    }

    #[test]
    fn data_event_exposes_path() {
        let deleted = DataEvent::Deleted {
            path: "/media/artwork".into(),
        };
        assert_eq!(deleted.path(), "/media/artwork");
    }
}
