//! Phone side of the wrist media sync: binds one native media session and keeps
//! connected wear peers in step with it.

pub mod bridge;
pub mod config;
pub mod discovery;
pub mod metrics;
pub mod native;
pub mod peers;
pub mod publisher;
pub mod router;
pub mod service;
pub mod snapshot;
pub mod telemetry;

pub use service::PhoneBridge;
