//! Types that mirror the agent's JSON wire schema.

use serde::{Deserialize, Serialize};

// Close problem codes reported by the agent
pub const PROBLEM_NOT_SUPPORTED: &str = "not-supported";
pub const PROBLEM_NOT_FOUND: &str = "not-found";
pub const PROBLEM_DISCONNECTED: &str = "disconnected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Derivation {
    Raw,
    Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    pub derive: Derivation,
    // instance names the agent should leave out (e.g. loopback)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub omit_instances: Vec<String>,
}

impl MetricSpec {
    pub fn raw(name: &str) -> Self {
        Self {
            name: name.to_string(),
            derive: Derivation::Raw,
            omit_instances: Vec::new(),
        }
    }

    pub fn rate(name: &str) -> Self {
        Self {
            name: name.to_string(),
            derive: Derivation::Rate,
            omit_instances: Vec::new(),
        }
    }

    pub fn omitting(mut self, instance: &str) -> Self {
        self.omit_instances.push(instance.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Live,
    Archive,
}

/// Subscription request, sent as the first text frame on a fresh connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSpec {
    pub interval_ms: u64,
    pub mode: FetchMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_limit: Option<usize>,
    pub metrics: Vec<MetricSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaMetric {
    pub name: String,
    pub derive: Derivation,
    // present only for multi-instance metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: i64,
    pub interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub metrics: Vec<MetaMetric>,
}

// Tick entry on the wire: number = reading, false = unavailable, array = per-instance.
// A JSON null (None in WireTick) means "unchanged since the previous tick".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireEntry {
    Value(f64),
    Flag(bool),
    Instances(Vec<Option<WireInstance>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireInstance {
    Value(f64),
    Flag(bool),
}

pub type WireTick = Vec<Option<WireEntry>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Meta(Meta),
    Batch {
        ticks: Vec<WireTick>,
    },
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        problem: Option<String>,
    },
}
