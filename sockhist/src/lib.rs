//! Library surface for sockhist: feed decoding, reduction, hourly windows and spike events.

pub mod app;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod history;
pub mod reduce;
pub mod scale;
pub mod session;
pub mod snapshot;
pub mod types;
pub mod ws;
