use std::sync::Arc;

use media_proto::{Command, ConnectRequest, ProtoError, SEARCH_ACTION_ID};
use thiserror::Error;
use tracing::debug;
use transport_bus::{BusError, PeerId, Target, Transport};

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("no phone is reachable")]
    NoPhone,
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Proto(#[from] ProtoError),
}

pub type MirrorResult<T> = Result<T, MirrorError>;

/// Outbound command surface of the wear side.
#[derive(Clone)]
pub struct MirrorCommands {
    transport: Arc<dyn Transport>,
    phone: Option<PeerId>,
}

impl MirrorCommands {
    pub fn new(transport: Arc<dyn Transport>, phone: Option<PeerId>) -> Self {
        Self { transport, phone }
    }

    /// The configured phone, or the first reachable node.
    pub async fn phone(&self) -> MirrorResult<PeerId> {
        if let Some(phone) = &self.phone {
            return Ok(phone.clone());
        }
        self.transport
            .connected_peers()
            .await?
            .into_iter()
            .next()
            .ok_or(MirrorError::NoPhone)
    }

    pub async fn send(&self, command: Command) -> MirrorResult<()> {
        let phone = self.phone().await?;
        let payload = command.encode()?;
        debug!(target = "mirror", phone = %phone, path = command.path(), "sending command");
        self.transport
            .send_message(Target::Peer(phone), command.path(), payload)
            .await?;
        Ok(())
    }

    pub async fn connect(&self, request: ConnectRequest) -> MirrorResult<()> {
        self.send(Command::Connect(request)).await
    }

    /// Leaves the phone a grace period in case the watch comes straight back.
    pub async fn disconnect(&self) -> MirrorResult<()> {
        self.send(Command::Disconnect { force: true }).await
    }

    /// Asks the phone to release the session without a grace period.
    pub async fn disconnect_now(&self) -> MirrorResult<()> {
        self.send(Command::Disconnect { force: false }).await
    }

    pub async fn play(&self) -> MirrorResult<()> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> MirrorResult<()> {
        self.send(Command::Pause).await
    }

    pub async fn next(&self) -> MirrorResult<()> {
        self.send(Command::Next).await
    }

    pub async fn previous(&self) -> MirrorResult<()> {
        self.send(Command::Previous).await
    }

    pub async fn play_from_search(&self, query: impl Into<String>) -> MirrorResult<()> {
        self.send(Command::PlayFromSearch(query.into())).await
    }

    pub async fn volume_up(&self) -> MirrorResult<()> {
        self.send(Command::VolumeUp).await
    }

    pub async fn volume_down(&self) -> MirrorResult<()> {
        self.send(Command::VolumeDown).await
    }

    pub async fn volume_set(&self, level: i32) -> MirrorResult<()> {
        self.send(Command::VolumeSet(level)).await
    }

    pub async fn volume_status(&self) -> MirrorResult<()> {
        self.send(Command::VolumeStatus).await
    }

    /// The synthesized search action never reaches the phone as a click; it
    /// becomes an empty play-from-search.
    pub async fn action_click(&self, action_id: &str) -> MirrorResult<()> {
        if action_id == SEARCH_ACTION_ID {
            return self.play_from_search(String::new()).await;
        }
        self.send(Command::ActionClick(action_id.to_string())).await
    }

    pub async fn queue_item_click(&self, queue_id: i64) -> MirrorResult<()> {
        self.send(Command::QueueItemClick(queue_id)).await
    }

    pub async fn browse_item_click(&self, media_id: &str) -> MirrorResult<()> {
        self.send(Command::BrowseItemClick(media_id.to_string()))
            .await
    }

    pub async fn browse_back(&self) -> MirrorResult<()> {
        self.send(Command::BrowseBack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_proto::paths;
    use test_timeout::tokio_timeout_test;
    use transport_bus::LocalHub;

    #[tokio_timeout_test]
    async fn phone_is_discovered_from_reachable_nodes() {
        let hub = LocalHub::new();
        let phone = hub.node("phone");
        let mut inbox = phone.subscribe_messages();
        let commands = MirrorCommands::new(Arc::new(hub.node("watch")), None);

        commands.volume_set(4).await.expect("send");
        let message = inbox.recv().await.expect("message");
        assert_eq!(message.source, "watch");
        assert_eq!(message.path, paths::VOLUME_SET);
        assert_eq!(message.payload.as_deref(), Some(&[0, 0, 0, 4][..]));
    }

    #[tokio_timeout_test]
    async fn search_action_becomes_play_from_search() {
        let hub = LocalHub::new();
        let phone = hub.node("phone");
        let mut inbox = phone.subscribe_messages();
        let commands = MirrorCommands::new(Arc::new(hub.node("watch")), Some("phone".into()));

        commands.action_click(SEARCH_ACTION_ID).await.expect("send");
        let message = inbox.recv().await.expect("message");
        assert_eq!(message.path, paths::PLAY_FROM_SEARCH);
    }

    #[tokio_timeout_test]
    async fn no_phone_is_an_error() {
        let hub = LocalHub::new();
        let commands = MirrorCommands::new(Arc::new(hub.node("watch")), None);
        assert!(matches!(commands.play().await, Err(MirrorError::NoPhone)));
    }

    #[tokio_timeout_test]
    async fn disconnect_now_sends_a_false_flag() {
        let hub = LocalHub::new();
        let phone = hub.node("phone");
        let mut inbox = phone.subscribe_messages();
        let commands = MirrorCommands::new(Arc::new(hub.node("watch")), Some("phone".into()));

        commands.disconnect_now().await.expect("send");
        let message = inbox.recv().await.expect("message");
        assert_eq!(message.path, paths::DISCONNECT);
        assert_eq!(message.payload.as_deref(), Some(&[0][..]));
    }
}
