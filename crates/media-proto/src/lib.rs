//! Wire contract shared by the phone bridge and the wear mirror.
//!
//! Both sides must agree on every path string and payload encoding here:
//! UTF-8 strings, big-endian integers, single-byte booleans and statuses, and JSON
//! for composite snapshots. Keeping it in a dedicated crate means neither app can
//! drift from the other.

use thiserror::Error;

pub mod codec;
pub mod command;
pub mod model;
pub mod paths;
pub mod status;

pub use command::{Command, Reply};
pub use model::{
    ActionSet, AppInfo, BrowseItem, BrowseList, ConnectRequest, MediaAction, PlaybackState,
    PlayerSnapshot, QueueItem, QueueSnapshot, SEARCH_ACTION_ID, VolumeStatus,
};
pub use status::Status;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("expected {expected} payload bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("payload is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    #[error("unknown status byte {0:#04x}")]
    UnknownStatus(u8),
    #[error("json payload error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no command is bound to path {0}")]
    UnknownPath(String),
    #[error("path {0} requires a payload")]
    MissingPayload(&'static str),
}

pub type ProtoResult<T> = Result<T, ProtoError>;
