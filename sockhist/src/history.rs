//! Hour-aligned windows of reduced samples, shared by every fetch session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::reduce::{ReducedSample, ResourceKey};

pub const TICK_INTERVAL_MS: i64 = 3_000;
pub const WINDOW_MS: i64 = 3_600_000;
pub const MINUTE_MS: i64 = 60_000;

pub const SLOTS_PER_WINDOW: usize = (WINDOW_MS / TICK_INTERVAL_MS) as usize;
pub const SLOTS_PER_MINUTE: usize = (MINUTE_MS / TICK_INTERVAL_MS) as usize;
pub const MINUTES_PER_WINDOW: usize = (WINDOW_MS / MINUTE_MS) as usize;

const _: () = assert!(WINDOW_MS % TICK_INTERVAL_MS == 0);
const _: () = assert!(WINDOW_MS % MINUTE_MS == 0);
const _: () = assert!(MINUTE_MS % TICK_INTERVAL_MS == 0);

pub fn window_start(ts: i64) -> i64 {
    ts.div_euclid(WINDOW_MS) * WINDOW_MS
}

pub fn slot_index(ts: i64) -> usize {
    ((ts - window_start(ts)) / TICK_INTERVAL_MS) as usize
}

pub fn slot_timestamp(start: i64, slot: usize) -> i64 {
    start + slot as i64 * TICK_INTERVAL_MS
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Slot {
    #[default]
    Pending,
    // the tick happened (or was gap-filled) but nothing could be derived
    Empty,
    Filled(ReducedSample),
}

impl Slot {
    pub fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending)
    }

    pub fn sample(&self) -> Option<&ReducedSample> {
        match self {
            Slot::Filled(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Window {
    start: i64,
    slots: Vec<Slot>,
}

impl Window {
    pub fn new(start: i64) -> Self {
        Self {
            start,
            slots: vec![Slot::Pending; SLOTS_PER_WINDOW],
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn populated(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_pending()).count()
    }

    /// First writer wins: only a pending slot accepts a value.
    pub fn fill(&mut self, slot: usize, sample: Option<ReducedSample>) -> bool {
        match self.slots.get_mut(slot) {
            Some(s) if s.is_pending() => {
                *s = match sample {
                    Some(v) => Slot::Filled(v),
                    None => Slot::Empty,
                };
                true
            }
            _ => false,
        }
    }

    pub fn series(&self, key: ResourceKey) -> impl Iterator<Item = Option<f64>> + '_ {
        self.slots
            .iter()
            .map(move |s| s.sample().and_then(|v| v.get(key)))
    }
}

/// What to do with ticks the source skipped (agent not running).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GapFill {
    // leave skipped slots unknown
    Leave,
    // mark every skipped slot as no-data
    #[default]
    Empty,
    // mark only minutes that lie entirely inside the gap
    WholeMinutes,
}

impl std::str::FromStr for GapFill {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leave" => Ok(GapFill::Leave),
            "empty" => Ok(GapFill::Empty),
            "whole-minutes" => Ok(GapFill::WholeMinutes),
            other => Err(format!("unknown gap fill policy '{other}'")),
        }
    }
}

#[derive(Debug, Default)]
pub struct WindowStore {
    windows: BTreeMap<i64, Window>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn get(&self, start: i64) -> Option<&Window> {
        self.windows.get(&start)
    }

    pub fn ensure(&mut self, start: i64) -> &mut Window {
        debug_assert_eq!(start, window_start(start));
        self.windows.entry(start).or_insert_with(|| {
            debug!(start, "window created");
            Window::new(start)
        })
    }

    pub fn fill(&mut self, start: i64, slot: usize, sample: Option<ReducedSample>) -> bool {
        self.ensure(start).fill(slot, sample)
    }

    /// Newest window first.
    pub fn iter_desc(&self) -> impl Iterator<Item = &Window> {
        self.windows.values().rev()
    }

    pub fn oldest_start(&self) -> Option<i64> {
        self.windows.keys().next().copied()
    }

    /// Drop the oldest windows until at most `max` remain. Returns how many went.
    pub fn retain_newest(&mut self, max: usize) -> usize {
        let mut dropped = 0;
        while self.windows.len() > max.max(1) {
            if let Some((start, _)) = self.windows.pop_first() {
                debug!(start, "window evicted");
                dropped += 1;
            }
        }
        dropped
    }

    /// Sample under (window, minute, tick within minute), independent of any UI hit-testing.
    pub fn lookup(&self, start: i64, minute: usize, subslot: usize) -> Option<&ReducedSample> {
        if minute >= MINUTES_PER_WINDOW || subslot >= SLOTS_PER_MINUTE {
            return None;
        }
        self.windows
            .get(&start)?
            .slots
            .get(minute * SLOTS_PER_MINUTE + subslot)?
            .sample()
    }

    /// Apply the gap policy to ticks in `[from, to)`. Only windows that already exist are
    /// touched, so a long outage does not materialize hours of empty windows.
    pub fn fill_gap(&mut self, from: i64, to: i64, policy: GapFill) -> usize {
        if policy == GapFill::Leave || to <= from {
            return 0;
        }
        let mut marked = 0;
        let keys: Vec<i64> = self
            .windows
            .range(window_start(from)..to)
            .map(|(k, _)| *k)
            .collect();
        for start in keys {
            let Some(w) = self.windows.get_mut(&start) else {
                continue;
            };
            for (i, slot) in w.slots.iter_mut().enumerate() {
                let ts = slot_timestamp(start, i);
                if ts < from || ts >= to || !slot.is_pending() {
                    continue;
                }
                if policy == GapFill::WholeMinutes {
                    let minute_start = ts - (ts - start) % MINUTE_MS;
                    if minute_start < from || minute_start + MINUTE_MS > to {
                        continue;
                    }
                }
                *slot = Slot::Empty;
                marked += 1;
            }
        }
        marked
    }
}
