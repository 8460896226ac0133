use bytes::Bytes;

use crate::codec;
use crate::model::{ConnectRequest, VolumeStatus};
use crate::paths;
use crate::status::Status;
use crate::{ProtoError, ProtoResult};

/// A remote control command sent from a wear peer to the phone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(ConnectRequest),
    /// `force` keeps the session through the teardown grace period; otherwise the
    /// phone releases it at once.
    Disconnect { force: bool },
    Play,
    Pause,
    Next,
    Previous,
    PlayFromSearch(String),
    VolumeUp,
    VolumeDown,
    VolumeSet(i32),
    VolumeStatus,
    ActionClick(String),
    QueueItemClick(i64),
    BrowseItemClick(String),
    BrowseBack,
}

impl Command {
    pub fn path(&self) -> &'static str {
        match self {
            Command::Connect(_) => paths::CONNECT,
            Command::Disconnect { .. } => paths::DISCONNECT,
            Command::Play => paths::PLAY,
            Command::Pause => paths::PAUSE,
            Command::Next => paths::NEXT,
            Command::Previous => paths::PREVIOUS,
            Command::PlayFromSearch(_) => paths::PLAY_FROM_SEARCH,
            Command::VolumeUp => paths::VOLUME_UP,
            Command::VolumeDown => paths::VOLUME_DOWN,
            Command::VolumeSet(_) => paths::VOLUME_SET,
            Command::VolumeStatus => paths::VOLUME_STATUS,
            Command::ActionClick(_) => paths::ACTION_CLICK,
            Command::QueueItemClick(_) => paths::QUEUE_ITEM_CLICK,
            Command::BrowseItemClick(_) => paths::BROWSE_ITEM_CLICK,
            Command::BrowseBack => paths::BROWSE_BACK,
        }
    }

    pub fn encode(&self) -> ProtoResult<Option<Bytes>> {
        let payload = match self {
            Command::Connect(request) => Some(codec::encode_json(request)?),
            Command::Disconnect { force } => Some(codec::encode_bool(*force)),
            Command::PlayFromSearch(query) => Some(codec::encode_str(query)),
            Command::VolumeSet(level) => Some(codec::encode_i32(*level)),
            Command::ActionClick(action_id) => Some(codec::encode_str(action_id)),
            Command::QueueItemClick(queue_id) => Some(codec::encode_i64(*queue_id)),
            Command::BrowseItemClick(media_id) => Some(codec::encode_str(media_id)),
            Command::Play
            | Command::Pause
            | Command::Next
            | Command::Previous
            | Command::VolumeUp
            | Command::VolumeDown
            | Command::VolumeStatus
            | Command::BrowseBack => None,
        };
        Ok(payload)
    }

    pub fn decode(path: &str, payload: Option<&[u8]>) -> ProtoResult<Self> {
        let command = match path {
            paths::CONNECT => match payload {
                Some(body) if !body.is_empty() => Command::Connect(codec::decode_json(body)?),
                _ => Command::Connect(ConnectRequest::auto()),
            },
            paths::DISCONNECT => match payload {
                Some(body) if !body.is_empty() => Command::Disconnect {
                    force: codec::decode_bool(body)?,
                },
                _ => Command::Disconnect { force: true },
            },
            paths::PLAY => Command::Play,
            paths::PAUSE => Command::Pause,
            paths::NEXT => Command::Next,
            paths::PREVIOUS => Command::Previous,
            paths::PLAY_FROM_SEARCH => {
                let query = payload.map(codec::decode_str).transpose()?;
                Command::PlayFromSearch(query.unwrap_or_default())
            }
            paths::VOLUME_UP => Command::VolumeUp,
            paths::VOLUME_DOWN => Command::VolumeDown,
            paths::VOLUME_SET => Command::VolumeSet(codec::decode_i32(required(
                paths::VOLUME_SET,
                payload,
            )?)?),
            paths::VOLUME_STATUS => Command::VolumeStatus,
            paths::ACTION_CLICK => Command::ActionClick(codec::decode_str(required(
                paths::ACTION_CLICK,
                payload,
            )?)?),
            paths::QUEUE_ITEM_CLICK => Command::QueueItemClick(codec::decode_i64(required(
                paths::QUEUE_ITEM_CLICK,
                payload,
            )?)?),
            paths::BROWSE_ITEM_CLICK => Command::BrowseItemClick(codec::decode_str(required(
                paths::BROWSE_ITEM_CLICK,
                payload,
            )?)?),
            paths::BROWSE_BACK => Command::BrowseBack,
            other => return Err(ProtoError::UnknownPath(other.to_string())),
        };
        Ok(command)
    }
}

fn required<'a>(path: &'static str, payload: Option<&'a [u8]>) -> ProtoResult<&'a [u8]> {
    payload.ok_or(ProtoError::MissingPayload(path))
}

/// A reply the phone sends back to a wear peer on a command path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Status(Status),
    Volume(VolumeStatus),
}

impl Reply {
    /// Status replies are one byte; volume replies are eight.
    pub fn decode(payload: &[u8]) -> ProtoResult<Self> {
        if payload.len() == VolumeStatus::ENCODED_LEN {
            Ok(Reply::Volume(VolumeStatus::decode(payload)?))
        } else {
            Ok(Reply::Status(Status::decode(payload)?))
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Reply::Status(status) => status.encode(),
            Reply::Volume(volume) => volume.encode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_commands_survive_the_wire() {
        let commands = [
            Command::Connect(ConnectRequest::package("com.example.music")),
            Command::Disconnect { force: false },
            Command::PlayFromSearch("jazz".into()),
            Command::VolumeSet(11),
            Command::QueueItemClick(-3),
            Command::BrowseItemClick("album/7".into()),
        ];
        for command in commands {
            let payload = command.encode().expect("encode");
            let decoded = Command::decode(command.path(), payload.as_deref()).expect("decode");
            assert_eq!(decoded, command);
        }
    }

    #[test]
    fn empty_connect_means_auto_selection() {
        assert_eq!(
            Command::decode(paths::CONNECT, None).expect("decode"),
            Command::Connect(ConnectRequest::auto())
        );
    }

    #[test]
    fn disconnect_flag_is_one_byte_and_defaults_to_force() {
        let payload = Command::Disconnect { force: false }
            .encode()
            .expect("encode");
        assert_eq!(payload.as_deref(), Some(&[0][..]));
        assert_eq!(
            Command::decode(paths::DISCONNECT, None).expect("decode"),
            Command::Disconnect { force: true }
        );
        assert!(matches!(
            Command::decode(paths::DISCONNECT, Some(&[7])),
            Err(ProtoError::InvalidBool(7))
        ));
    }

    #[test]
    fn missing_required_payload_is_an_error() {
        assert!(matches!(
            Command::decode(paths::VOLUME_SET, None),
            Err(ProtoError::MissingPayload(paths::VOLUME_SET))
        ));
        assert!(matches!(
            Command::decode("/media/unknown", None),
            Err(ProtoError::UnknownPath(_))
        ));
    }

    #[test]
    fn reply_is_discriminated_by_length() {
        assert_eq!(
            Reply::decode(&Status::PermissionDenied.encode()).expect("status"),
            Reply::Status(Status::PermissionDenied)
        );
        let volume = VolumeStatus { current: 3, max: 10 };
        assert_eq!(
            Reply::decode(&volume.encode()).expect("volume"),
            Reply::Volume(volume)
        );
    }
}
