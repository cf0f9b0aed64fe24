//! App state and fetch loops: backfill pages, recurring live-tail, shared window store.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::history::{window_start, WindowStore, SLOTS_PER_WINDOW, TICK_INTERVAL_MS, WINDOW_MS};
use crate::reduce::dashboard_metrics;
use crate::scale::{Normalizer, ScaleState};
use crate::session::{FetchKind, FetchSession, Pipeline};
use crate::snapshot::{self, FeedStatus, Snapshot};
use crate::types::{FetchMode, OpenSpec, ServerMessage, PROBLEM_DISCONNECTED};
use crate::ws::{subscribe, SourceEvent, Subscription};

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct App {
    settings: Settings,
    store: WindowStore,
    scale: Arc<ScaleState>,
    status: FeedStatus,
    host: Option<String>,

    // start of the oldest backfill page requested so far
    backfill_from: Option<i64>,
    // newest tick written by any session; live-tail anchors here
    newest_tick: Option<i64>,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        let scale = Arc::new(ScaleState::new(&settings.scale_floors));
        Self::with_scale(settings, scale)
    }

    pub fn with_scale(settings: Settings, scale: Arc<ScaleState>) -> Self {
        Self {
            settings,
            store: WindowStore::new(),
            scale,
            status: FeedStatus::Available,
            host: None,
            backfill_from: None,
            newest_tick: None,
        }
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    pub fn status(&self) -> &FeedStatus {
        &self.status
    }

    pub fn scale(&self) -> &Arc<ScaleState> {
        &self.scale
    }

    pub fn newest_tick(&self) -> Option<i64> {
        self.newest_tick
    }

    pub fn backfill_from(&self) -> Option<i64> {
        self.backfill_from
    }

    pub fn new_session(&self, kind: FetchKind) -> FetchSession {
        FetchSession::new(kind, dashboard_metrics().len(), self.settings.per_core)
    }

    /// Request for the next older page: the window before the oldest one requested or
    /// observed so far.
    pub fn next_backfill_spec(&mut self, now: i64) -> OpenSpec {
        let oldest = match (self.backfill_from, self.store.oldest_start()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let start = match oldest {
            None => window_start(now),
            Some(from) => from - WINDOW_MS,
        };
        self.backfill_from = Some(self.backfill_from.map_or(start, |f| f.min(start)));
        OpenSpec {
            interval_ms: TICK_INTERVAL_MS as u64,
            mode: FetchMode::Archive,
            start_timestamp: Some(start),
            sample_limit: Some(SLOTS_PER_WINDOW),
            metrics: dashboard_metrics(),
        }
    }

    pub fn live_spec(&self, now: i64) -> OpenSpec {
        OpenSpec {
            interval_ms: TICK_INTERVAL_MS as u64,
            mode: FetchMode::Live,
            start_timestamp: Some(self.newest_tick.unwrap_or(now)),
            sample_limit: None,
            metrics: dashboard_metrics(),
        }
    }

    /// Feed one source event through a session. Break once the subscription is done.
    pub fn apply(&mut self, session: &mut FetchSession, ev: SourceEvent) -> ControlFlow<()> {
        let mut pipe = Pipeline {
            store: &mut self.store,
            scale: &self.scale,
            gap_fill: self.settings.gap_fill,
        };
        match ev {
            SourceEvent::Message(ServerMessage::Meta(meta)) => {
                if session.handle_meta(&meta, &mut pipe) {
                    self.status = FeedStatus::Available;
                    if let Some(h) = session.host() {
                        self.host = Some(h.to_string());
                    }
                }
                ControlFlow::Continue(())
            }
            SourceEvent::Message(ServerMessage::Batch { ticks }) => {
                session.handle_batch(&ticks, &mut pipe);
                if let Some(ts) = session.last_tick() {
                    self.newest_tick = Some(self.newest_tick.map_or(ts, |n| n.max(ts)));
                }
                let evicted = self.store.retain_newest(self.settings.max_windows);
                if evicted > 0 {
                    debug!(evicted, kept = self.store.len(), "window cap reached");
                }
                ControlFlow::Continue(())
            }
            SourceEvent::Message(ServerMessage::Close { problem }) | SourceEvent::Closed(problem) => {
                match problem {
                    None => info!(
                        kind = ?session.kind(),
                        ticks = session.ticks(),
                        first = ?session.first_tick(),
                        last = ?session.last_tick(),
                        "subscription complete"
                    ),
                    Some(p) => {
                        warn!(kind = ?session.kind(), problem = %p, "subscription failed");
                        self.status = FeedStatus::from_problem(&p);
                    }
                }
                ControlFlow::Break(())
            }
        }
    }

    /// Run a session until its source closes or ends.
    pub async fn drain<S>(&mut self, session: &mut FetchSession, source: &mut S)
    where
        S: Stream<Item = SourceEvent> + Unpin,
    {
        while let Some(ev) = source.next().await {
            if self.apply(session, ev).is_break() {
                break;
            }
        }
    }

    /// Fetch one more hour of history, older than anything requested before.
    pub async fn backfill_page(&mut self, url: &str) {
        let spec = self.next_backfill_spec(now_ms());
        let mut session = self.new_session(FetchKind::Backfill);
        match subscribe(url, &spec).await {
            Ok(mut sub) => {
                self.drain(&mut session, &mut sub).await;
                sub.close().await;
            }
            Err(e) => self.transport_failed(&e),
        }
    }

    /// Keep one live subscription open, re-issuing it every live-tail period. Never returns;
    /// the caller races it against shutdown.
    pub async fn live_tail<F: FnMut(&Snapshot)>(&mut self, url: &str, mut emit: F) {
        let mut ticker = interval(self.settings.live_tail_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut current: Option<(FetchSession, Subscription)> = None;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // bounded: the previous subscription is gone before the next opens
                    if let Some((_, mut sub)) = current.take() {
                        sub.close().await;
                    }
                    emit(&self.snapshot());
                    let spec = self.live_spec(now_ms());
                    match subscribe(url, &spec).await {
                        Ok(sub) => current = Some((self.new_session(FetchKind::LiveTail), sub)),
                        Err(e) => self.transport_failed(&e),
                    }
                }
                ev = next_live_event(&mut current) => {
                    let done = match (ev, current.as_mut()) {
                        (Some(ev), Some((session, _))) => self.apply(session, ev).is_break(),
                        _ => true,
                    };
                    if done {
                        current = None;
                        emit(&self.snapshot());
                    }
                }
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let normalizer = Normalizer {
            scale: &self.scale,
            per_core: self.settings.per_core,
        };
        snapshot::build(&self.store, &self.status, self.host.as_deref(), &normalizer)
    }

    fn transport_failed(&mut self, e: &crate::error::FeedError) {
        warn!("cannot reach agent: {e}");
        self.status = FeedStatus::Unavailable {
            problem: PROBLEM_DISCONNECTED.to_string(),
        };
    }
}

// Pending forever when no live subscription is open, so the timer branch drives the loop.
async fn next_live_event(current: &mut Option<(FetchSession, Subscription)>) -> Option<SourceEvent> {
    match current.as_mut() {
        Some((_, sub)) => sub.next().await,
        None => std::future::pending().await,
    }
}
