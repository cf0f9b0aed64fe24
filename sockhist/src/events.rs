//! Spike detection over a window's normalized series.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::history::{Window, SLOTS_PER_MINUTE};
use crate::reduce::ResourceKey;
use crate::scale::Normalizer;

// Rise between consecutive real samples that counts as a spike
pub const SLOPE_THRESHOLD: f64 = 0.25;
// Level whose upward crossing counts as a spike
pub const LEVEL_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Event {
    pub window_start: i64,
    pub minute: usize,
    pub resource: ResourceKey,
}

/// All resources that spiked within one minute of a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinuteEvents {
    pub window_start: i64,
    pub minute: usize,
    pub resources: Vec<ResourceKey>,
}

impl MinuteEvents {
    pub fn events(&self) -> impl Iterator<Item = Event> + '_ {
        self.resources.iter().map(|r| Event {
            window_start: self.window_start,
            minute: self.minute,
            resource: *r,
        })
    }
}

/// Indices of samples that trigger a spike. Gaps do not reset the previous value.
pub fn spikes<I>(series: I) -> Vec<usize>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut previous: Option<f64> = None;
    let mut hits = Vec::new();
    for (i, value) in series.into_iter().enumerate() {
        let Some(value) = value else { continue };
        if let Some(prev) = previous {
            let slope = value - prev > SLOPE_THRESHOLD;
            let crossing = prev < LEVEL_THRESHOLD && value >= LEVEL_THRESHOLD;
            if slope || crossing {
                hits.push(i);
            }
        }
        previous = Some(value);
    }
    hits
}

/// Per-minute spike records for one window, minutes ascending.
pub fn detect(window: &Window, normalizer: &Normalizer<'_>) -> Vec<MinuteEvents> {
    let mut by_minute: BTreeMap<usize, Vec<ResourceKey>> = BTreeMap::new();
    for key in ResourceKey::ALL {
        let series = window
            .series(key)
            .map(|v| v.map(|x| normalizer.normalize(key, x)));
        for i in spikes(series) {
            let resources = by_minute.entry(i / SLOTS_PER_MINUTE).or_default();
            if !resources.contains(&key) {
                resources.push(key);
            }
        }
    }
    by_minute
        .into_iter()
        .map(|(minute, resources)| MinuteEvents {
            window_start: window.start(),
            minute,
            resources,
        })
        .collect()
}
