use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    BusError, BusResult, ChannelFrame, ChannelWriter, DataEvent, MAX_MESSAGE_BYTES, Message,
    PeerId, Target, Transport,
};

const NODE_CHANNEL_CAPACITY: usize = 128;

struct NodeSlot {
    messages: broadcast::Sender<Message>,
    channels: broadcast::Sender<ChannelFrame>,
    reachable: bool,
}

impl NodeSlot {
    fn new() -> Self {
        Self {
            messages: broadcast::channel(NODE_CHANNEL_CAPACITY).0,
            channels: broadcast::channel(NODE_CHANNEL_CAPACITY).0,
            reachable: true,
        }
    }
}

struct HubInner {
    nodes: RwLock<HashMap<PeerId, NodeSlot>>,
    data: RwLock<HashMap<String, Bytes>>,
    data_events: broadcast::Sender<DataEvent>,
}

/// In-memory pairing of any number of nodes sharing one replicated data store.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                nodes: RwLock::new(HashMap::new()),
                data: RwLock::new(HashMap::new()),
                data_events: broadcast::channel(NODE_CHANNEL_CAPACITY).0,
            }),
        }
    }

    /// Registers (or re-attaches to) the node `id` and returns its transport handle.
    pub fn node(&self, id: impl Into<PeerId>) -> LocalNode {
        let id = id.into();
        self.inner
            .nodes
            .write()
            .entry(id.clone())
            .or_insert_with(NodeSlot::new);
        LocalNode {
            id,
            hub: Arc::clone(&self.inner),
        }
    }

    /// Simulates a node dropping off (or returning to) the link.
    pub fn set_reachable(&self, id: &str, reachable: bool) {
        if let Some(slot) = self.inner.nodes.write().get_mut(id) {
            slot.reachable = reachable;
        }
    }

    pub fn data_snapshot(&self) -> HashMap<String, Bytes> {
        self.inner.data.read().clone()
    }
}

/// One node's view of a [`LocalHub`].
#[derive(Clone)]
pub struct LocalNode {
    id: PeerId,
    hub: Arc<HubInner>,
}

impl LocalNode {
    fn reachable_sender<T: Clone>(
        &self,
        peer: &str,
        pick: impl Fn(&NodeSlot) -> &broadcast::Sender<T>,
    ) -> BusResult<broadcast::Sender<T>> {
        let nodes = self.hub.nodes.read();
        match nodes.get(peer) {
            Some(slot) if slot.reachable => Ok(pick(slot).clone()),
            _ => Err(BusError::Unreachable(peer.to_string())),
        }
    }
}

#[async_trait]
impl Transport for LocalNode {
    fn local_id(&self) -> &str {
        &self.id
    }

    async fn connected_peers(&self) -> BusResult<Vec<PeerId>> {
        let nodes = self.hub.nodes.read();
        let mut peers: Vec<PeerId> = nodes
            .iter()
            .filter(|(id, slot)| slot.reachable && id.as_str() != self.id)
            .map(|(id, _)| id.clone())
            .collect();
        peers.sort();
        Ok(peers)
    }

    async fn send_message(
        &self,
        target: Target,
        path: &str,
        payload: Option<Bytes>,
    ) -> BusResult<()> {
        let size = payload.as_ref().map(Bytes::len).unwrap_or(0);
        if size > MAX_MESSAGE_BYTES {
            return Err(BusError::PayloadTooLarge {
                path: path.to_string(),
                size,
                limit: MAX_MESSAGE_BYTES,
            });
        }
        let message = Message {
            source: self.id.clone(),
            path: path.to_string(),
            payload,
        };
        match target {
            Target::Peer(peer) => {
                let sender = self.reachable_sender(&peer, |slot| &slot.messages)?;
                // A node without listeners drops the message, like the platform does.
                let _ = sender.send(message);
            }
            Target::Broadcast => {
                let senders: Vec<_> = {
                    let nodes = self.hub.nodes.read();
                    nodes
                        .iter()
                        .filter(|(id, slot)| slot.reachable && id.as_str() != self.id)
                        .map(|(_, slot)| slot.messages.clone())
                        .collect()
                };
                for sender in senders {
                    let _ = sender.send(message.clone());
                }
            }
        }
        Ok(())
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
        self.hub
            .nodes
            .write()
            .entry(self.id.clone())
            .or_insert_with(NodeSlot::new)
            .messages
            .subscribe()
    }

    async fn open_channel(&self, peer: &str, path: &str) -> BusResult<Box<dyn ChannelWriter>> {
        let sender = self.reachable_sender(peer, |slot| &slot.channels)?;
        Ok(Box::new(LocalChannel {
            source: self.id.clone(),
            path: path.to_string(),
            buffer: Vec::new(),
            sender,
        }))
    }

    fn subscribe_channels(&self) -> broadcast::Receiver<ChannelFrame> {
        self.hub
            .nodes
            .write()
            .entry(self.id.clone())
            .or_insert_with(NodeSlot::new)
            .channels
            .subscribe()
    }

    async fn put_data(&self, path: &str, payload: Bytes) -> BusResult<()> {
        let changed = {
            let mut data = self.hub.data.write();
            match data.get(path) {
                Some(existing) if *existing == payload => false,
                _ => {
                    data.insert(path.to_string(), payload.clone());
                    true
                }
            }
        };
        if changed {
            let _ = self.hub.data_events.send(DataEvent::Changed {
                path: path.to_string(),
                payload,
            });
        } else {
            debug!(target = "transport.local", path, "data item unchanged");
        }
        Ok(())
    }

    async fn delete_data(&self, path: &str) -> BusResult<()> {
        let existed = self.hub.data.write().remove(path).is_some();
        if existed {
            let _ = self.hub.data_events.send(DataEvent::Deleted {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    async fn get_data(&self, path: &str) -> BusResult<Option<Bytes>> {
        Ok(self.hub.data.read().get(path).cloned())
    }

    fn subscribe_data(&self) -> broadcast::Receiver<DataEvent> {
        self.hub.data_events.subscribe()
    }
}

struct LocalChannel {
    source: PeerId,
    path: String,
    buffer: Vec<u8>,
    sender: broadcast::Sender<ChannelFrame>,
}

#[async_trait]
impl ChannelWriter for LocalChannel {
    async fn write(&mut self, bytes: &[u8]) -> BusResult<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    async fn close(self: Box<Self>) -> BusResult<()> {
        let LocalChannel {
            source,
            path,
            buffer,
            sender,
        } = *self;
        let _ = sender.send(ChannelFrame {
            source,
            path,
            payload: Bytes::from(buffer),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_route_by_peer_and_broadcast() {
        let hub = LocalHub::new();
        let phone = hub.node("phone");
        let watch_a = hub.node("watch-a");
        let watch_b = hub.node("watch-b");
        let mut rx_a = watch_a.subscribe_messages();
        let mut rx_b = watch_b.subscribe_messages();

        phone
            .send_message(Target::peer("watch-a"), "/media/play", None)
            .await
            .expect("direct send");
        let msg = rx_a.recv().await.expect("direct msg");
        assert_eq!(msg.path, "/media/play");
        assert_eq!(msg.source, "phone");
        assert!(rx_b.try_recv().is_err());

        phone
            .send_message(
                Target::Broadcast,
                "/media/player_state",
                Some(Bytes::from_static(b"{}")),
            )
            .await
            .expect("broadcast");
        assert_eq!(rx_a.recv().await.expect("a").path, "/media/player_state");
        assert_eq!(rx_b.recv().await.expect("b").path, "/media/player_state");
    }

    #[tokio::test]
    async fn unreachable_peer_fails_send_and_leaves_peer_list() {
        let hub = LocalHub::new();
        let phone = hub.node("phone");
        let _watch = hub.node("watch");
        hub.set_reachable("watch", false);

        let err = phone
            .send_message(Target::peer("watch"), "/media/play", None)
            .await
            .expect_err("unreachable");
        assert!(matches!(err, BusError::Unreachable(peer) if peer == "watch"));
        assert!(phone.connected_peers().await.expect("peers").is_empty());
        assert!(phone.open_channel("watch", "/media/queue_list").await.is_err());
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let hub = LocalHub::new();
        let phone = hub.node("phone");
        let _watch = hub.node("watch");
        let payload = Bytes::from(vec![0u8; MAX_MESSAGE_BYTES + 1]);
        let err = phone
            .send_message(Target::peer("watch"), "/media/artwork", Some(payload))
            .await
            .expect_err("too large");
        assert!(matches!(err, BusError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn data_store_emits_change_and_delete_once() {
        let hub = LocalHub::new();
        let phone = hub.node("phone");
        let watch = hub.node("watch");
        let mut events = watch.subscribe_data();

        phone
            .put_data("/media/artwork", Bytes::from_static(b"jpg"))
            .await
            .expect("put");
        phone
            .put_data("/media/artwork", Bytes::from_static(b"jpg"))
            .await
            .expect("put same");
        phone.delete_data("/media/artwork").await.expect("delete");
        phone.delete_data("/media/artwork").await.expect("delete again");

        assert!(matches!(
            events.recv().await.expect("changed"),
            DataEvent::Changed { .. }
        ));
        assert_eq!(
            events.recv().await.expect("deleted"),
            DataEvent::Deleted {
                path: "/media/artwork".into()
            }
        );
        assert!(events.try_recv().is_err());
        assert_eq!(watch.get_data("/media/artwork").await.expect("get"), None);
    }
}
