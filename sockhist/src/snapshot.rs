//! What the renderer receives: windows newest first, each with slots and minute events.

use serde::Serialize;

use crate::events::{detect, MinuteEvents};
use crate::history::{Window, WindowStore};
use crate::reduce::ReducedSample;
use crate::scale::Normalizer;
use crate::types::{PROBLEM_NOT_FOUND, PROBLEM_NOT_SUPPORTED};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum FeedStatus {
    Available,
    // transport failed or the agent reported a problem; a fresh fetch may recover
    Unavailable { problem: String },
    // the agent cannot provide these metrics at all
    CapabilityMissing { problem: String },
}

impl FeedStatus {
    pub fn from_problem(problem: &str) -> Self {
        match problem {
            PROBLEM_NOT_SUPPORTED | PROBLEM_NOT_FOUND => FeedStatus::CapabilityMissing {
                problem: problem.to_string(),
            },
            _ => FeedStatus::Unavailable {
                problem: problem.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowView {
    pub start: i64,
    pub label: String,
    pub slots: Vec<Option<ReducedSample>>,
    pub events: Vec<MinuteEvents>,
}

impl WindowView {
    pub fn new(window: &Window, normalizer: &Normalizer<'_>) -> Self {
        let label = chrono::DateTime::from_timestamp_millis(window.start())
            .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_default();
        Self {
            start: window.start(),
            label,
            slots: window.slots().iter().map(|s| s.sample().copied()).collect(),
            events: detect(window, normalizer),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub status: FeedStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub windows: Vec<WindowView>,
}

pub fn build(
    store: &WindowStore,
    status: &FeedStatus,
    host: Option<&str>,
    normalizer: &Normalizer<'_>,
) -> Snapshot {
    Snapshot {
        status: status.clone(),
        host: host.map(str::to_string),
        windows: store
            .iter_desc()
            .map(|w| WindowView::new(w, normalizer))
            .collect(),
    }
}
