//! Per-fetch cursor state: turns meta/batch messages into writes on the shared window store.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::decode::{Decoder, RawTick};
use crate::history::{
    slot_index, slot_timestamp, window_start, GapFill, WindowStore, SLOTS_PER_WINDOW,
    TICK_INTERVAL_MS, WINDOW_MS,
};
use crate::reduce::Reducer;
use crate::scale::ScaleState;
use crate::types::{Meta, WireTick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Backfill,
    LiveTail,
}

/// Shared targets a session writes into.
pub struct Pipeline<'a> {
    pub store: &'a mut WindowStore,
    pub scale: &'a ScaleState,
    pub gap_fill: GapFill,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    window_start: i64,
    slot: usize,
}

impl Cursor {
    fn at(ts: i64) -> Self {
        Self {
            window_start: window_start(ts),
            slot: slot_index(ts),
        }
    }

    fn timestamp(&self) -> i64 {
        slot_timestamp(self.window_start, self.slot)
    }

    fn advance(&mut self) {
        self.slot += 1;
        if self.slot >= SLOTS_PER_WINDOW {
            self.window_start += WINDOW_MS;
            self.slot = 0;
        }
    }
}

/// One in-flight subscription. Owns its decoder so concurrent fetches never share state.
#[derive(Debug)]
pub struct FetchSession {
    kind: FetchKind,
    cursor: Option<Cursor>,
    decoder: Decoder,
    reducer: Reducer,
    seen_windows: BTreeSet<i64>,
    // a meta was refused; its batches must not land at the old cursor
    discarding: bool,
    first_tick: Option<i64>,
    last_tick: Option<i64>,
    ticks: usize,
    host: Option<String>,
}

impl FetchSession {
    pub fn new(kind: FetchKind, metrics: usize, per_core: bool) -> Self {
        Self {
            kind,
            cursor: None,
            decoder: Decoder::new(metrics),
            reducer: Reducer::new(per_core),
            seen_windows: BTreeSet::new(),
            discarding: false,
            first_tick: None,
            last_tick: None,
            ticks: 0,
            host: None,
        }
    }

    pub fn kind(&self) -> FetchKind {
        self.kind
    }

    /// Timestamp the next tick will be written at.
    pub fn cursor_timestamp(&self) -> Option<i64> {
        self.cursor.map(|c| c.timestamp())
    }

    pub fn first_tick(&self) -> Option<i64> {
        self.first_tick
    }

    pub fn last_tick(&self) -> Option<i64> {
        self.last_tick
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn seen_windows(&self) -> &BTreeSet<i64> {
        &self.seen_windows
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// True between a refused meta and the next accepted one.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Returns false when the meta was rejected. Batches that follow a rejected meta are
    /// dropped until another meta is accepted.
    pub fn handle_meta(&mut self, meta: &Meta, pipe: &mut Pipeline<'_>) -> bool {
        if meta.interval_ms != TICK_INTERVAL_MS as u64 {
            warn!(
                interval_ms = meta.interval_ms,
                "meta interval does not match tick interval, ignored"
            );
            self.discarding = true;
            return false;
        }
        let next = Cursor::at(meta.timestamp);
        if let Some(current) = self.cursor {
            if next.timestamp() < current.timestamp() {
                warn!(
                    kind = ?self.kind,
                    meta = meta.timestamp,
                    cursor = current.timestamp(),
                    "out-of-order meta ignored"
                );
                self.discarding = true;
                return false;
            }
            if next.timestamp() > current.timestamp() {
                let marked = pipe
                    .store
                    .fill_gap(current.timestamp(), next.timestamp(), pipe.gap_fill);
                debug!(
                    from = current.timestamp(),
                    to = next.timestamp(),
                    marked,
                    "gap in feed"
                );
            }
        }
        self.decoder.rebind(meta);
        self.reducer.bind(meta);
        if meta.host.is_some() {
            self.host = meta.host.clone();
        }
        self.cursor = Some(next);
        self.discarding = false;
        pipe.store.ensure(next.window_start);
        self.seen_windows.insert(next.window_start);
        true
    }

    /// Decode, reduce and store every tick of a batch. Returns how many slots were newly set.
    pub fn handle_batch(&mut self, ticks: &[WireTick], pipe: &mut Pipeline<'_>) -> usize {
        let Some(mut cursor) = self.cursor else {
            warn!(kind = ?self.kind, ticks = ticks.len(), "batch before meta ignored");
            return 0;
        };
        if self.discarding {
            warn!(kind = ?self.kind, ticks = ticks.len(), "batch after rejected meta dropped");
            return 0;
        }
        let mut written = 0;
        for wire in ticks {
            let decoded = self.decoder.decode(&RawTick::from(wire));
            let sample = self.reducer.reduce(&decoded, pipe.scale);
            let ts = cursor.timestamp();
            if pipe.store.fill(cursor.window_start, cursor.slot, sample) {
                written += 1;
            }
            self.seen_windows.insert(cursor.window_start);
            self.first_tick.get_or_insert(ts);
            self.last_tick = Some(ts);
            self.ticks += 1;
            cursor.advance();
        }
        self.cursor = Some(cursor);
        written
    }
}
