//! Wear-side mirror of the phone's media session.

pub mod commands;
pub mod config;
pub mod mirror;
pub mod state;

pub use commands::{MirrorCommands, MirrorError, MirrorResult};
pub use config::MirrorConfig;
pub use mirror::Mirror;
pub use state::{MirrorState, Page, PagerState, StatusReply};
