//! Wire format spoken with sockhist clients over WebSocket.

use serde::{Deserialize, Serialize};

pub const PROBLEM_NOT_SUPPORTED: &str = "not-supported";
pub const PROBLEM_NOT_FOUND: &str = "not-found";
pub const PROBLEM_UNSUPPORTED_INTERVAL: &str = "unsupported-interval";
pub const PROBLEM_PROTOCOL: &str = "protocol-error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Derivation {
    Raw,
    Rate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    pub derive: Derivation,
    #[serde(default)]
    pub omit_instances: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Live,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OpenSpec {
    pub interval_ms: u64,
    pub mode: FetchMode,
    #[serde(default)]
    pub start_timestamp: Option<i64>,
    #[serde(default)]
    pub sample_limit: Option<usize>,
    pub metrics: Vec<MetricSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaMetric {
    pub name: String,
    pub derive: Derivation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Meta {
    pub timestamp: i64,
    pub interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub metrics: Vec<MetaMetric>,
}

// number = reading, false = unavailable, array = per-instance; None (null) = unchanged
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireEntry {
    Value(f64),
    Flag(bool),
    Instances(Vec<Option<WireInstance>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireInstance {
    Value(f64),
    Flag(bool),
}

pub type WireTick = Vec<Option<WireEntry>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Meta(Meta),
    Batch {
        ticks: Vec<WireTick>,
    },
    Close {
        #[serde(skip_serializing_if = "Option::is_none")]
        problem: Option<String>,
    },
}

impl ServerMessage {
    pub fn close(problem: Option<&str>) -> Self {
        ServerMessage::Close {
            problem: problem.map(str::to_string),
        }
    }
}
