//! Library surface of sockhist_agent, shared by the binary and integration tests.

pub mod archive;
pub mod config;
pub mod encode;
pub mod error;
pub mod metrics;
pub mod sampler;
pub mod state;
pub mod types;
pub mod ws;
