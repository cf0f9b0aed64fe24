//! Per-subscription tick encoder: derives rates, filters instances and emits only what changed.

use std::sync::Arc;

use crate::metrics::{Reading, Snapshot};
use crate::types::{
    Derivation, Meta, MetaMetric, MetricSpec, ServerMessage, WireEntry, WireInstance, WireTick,
};

/// Most ticks carried by one batch message.
pub const BATCH_TICKS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cell {
    // nothing emitted since the last meta
    Unknown,
    Value(f64),
    Unavailable,
}

// One metric at one tick: instance names (None for scalars) and one cell per value.
#[derive(Debug, Clone, PartialEq)]
struct Derived {
    names: Option<Vec<String>>,
    cells: Vec<Cell>,
}

/// Result of encoding one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    // announced before the tick when layout or continuity changed
    pub meta: Option<Meta>,
    pub tick: WireTick,
}

pub struct TickEncoder {
    metrics: Vec<MetricSpec>,
    interval_ms: u64,
    host: Option<String>,
    prev: Option<Arc<Snapshot>>,
    layout: Option<Vec<Option<Vec<String>>>>,
    sent: Vec<Vec<Cell>>,
}

impl TickEncoder {
    pub fn new(metrics: Vec<MetricSpec>, interval_ms: u64, host: Option<String>) -> Self {
        let n = metrics.len();
        Self {
            metrics,
            interval_ms,
            host,
            prev: None,
            layout: None,
            sent: vec![Vec::new(); n],
        }
    }

    /// Seed rate derivation with the snapshot that precedes the first one served.
    pub fn prime(&mut self, snap: Arc<Snapshot>) {
        self.prev = Some(snap);
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.prev.as_ref().map(|p| p.timestamp)
    }

    fn continuous(&self, snap: &Snapshot) -> Option<&Snapshot> {
        let prev = self.prev.as_deref()?;
        let gap = snap.timestamp - prev.timestamp;
        (gap > 0 && (gap as f64) <= 1.5 * self.interval_ms as f64).then_some(prev)
    }

    pub fn encode(&mut self, snap: Arc<Snapshot>) -> Encoded {
        let prev = self.continuous(&snap);
        let derived: Vec<Derived> = self
            .metrics
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let known = self.layout.as_ref().and_then(|l| l.get(i)).cloned().flatten();
                derive(m, &snap, prev, known)
            })
            .collect();
        let layout: Vec<Option<Vec<String>>> = derived.iter().map(|d| d.names.clone()).collect();

        let restart = prev.is_none() || self.layout.as_ref() != Some(&layout);
        let meta = restart.then(|| Meta {
            timestamp: snap.timestamp,
            interval_ms: self.interval_ms,
            host: self.host.clone(),
            metrics: self
                .metrics
                .iter()
                .zip(&layout)
                .map(|(m, names)| MetaMetric {
                    name: m.name.clone(),
                    derive: m.derive,
                    instances: names.clone(),
                })
                .collect(),
        });
        if restart {
            for (sent, d) in self.sent.iter_mut().zip(&derived) {
                *sent = vec![Cell::Unknown; d.cells.len()];
            }
            self.layout = Some(layout);
        }

        let mut tick: WireTick = derived
            .iter()
            .zip(self.sent.iter_mut())
            .map(|(d, sent)| emit(d, sent))
            .collect();
        while matches!(tick.last(), Some(None)) {
            tick.pop();
        }

        self.prev = Some(snap);
        Encoded { meta, tick }
    }

    /// Encode a run of snapshots into wire messages. Batches are cut at every meta
    /// and at BATCH_TICKS.
    pub fn encode_run<I>(&mut self, snaps: I) -> Vec<ServerMessage>
    where
        I: IntoIterator<Item = Arc<Snapshot>>,
    {
        let mut out = Vec::new();
        let mut ticks: Vec<WireTick> = Vec::new();
        for snap in snaps {
            let enc = self.encode(snap);
            if let Some(meta) = enc.meta {
                if !ticks.is_empty() {
                    out.push(ServerMessage::Batch {
                        ticks: std::mem::take(&mut ticks),
                    });
                }
                out.push(ServerMessage::Meta(meta));
            }
            ticks.push(enc.tick);
            if ticks.len() == BATCH_TICKS {
                out.push(ServerMessage::Batch {
                    ticks: std::mem::take(&mut ticks),
                });
            }
        }
        if !ticks.is_empty() {
            out.push(ServerMessage::Batch { ticks });
        }
        out
    }
}

fn derive(
    spec: &MetricSpec,
    snap: &Snapshot,
    prev: Option<&Snapshot>,
    known: Option<Vec<String>>,
) -> Derived {
    let dt = prev.map(|p| (snap.timestamp - p.timestamp) as f64 / 1000.0);
    let before = prev.and_then(|p| p.get(&spec.name));
    match snap.get(&spec.name) {
        Some(Reading::Scalar(v)) => {
            let cell = match spec.derive {
                Derivation::Raw => Cell::Value(*v),
                Derivation::Rate => match (before, dt) {
                    (Some(Reading::Scalar(p)), Some(dt)) => rate(*p, *v, dt),
                    _ => Cell::Unavailable,
                },
            };
            Derived {
                names: None,
                cells: vec![cell],
            }
        }
        Some(Reading::Instances(list)) => {
            let kept: Vec<&(String, f64)> = list
                .iter()
                .filter(|(name, _)| !spec.omit_instances.contains(name))
                .collect();
            let cells = kept
                .iter()
                .map(|(name, v)| match spec.derive {
                    Derivation::Raw => Cell::Value(*v),
                    Derivation::Rate => {
                        let p = match before {
                            Some(Reading::Instances(old)) => {
                                old.iter().find(|(n, _)| n == name).map(|(_, p)| *p)
                            }
                            _ => None,
                        };
                        match (p, dt) {
                            (Some(p), Some(dt)) => rate(p, *v, dt),
                            _ => Cell::Unavailable,
                        }
                    }
                })
                .collect();
            Derived {
                names: Some(kept.into_iter().map(|(n, _)| n.clone()).collect()),
                cells,
            }
        }
        // not sampled this tick; keep the last announced shape
        None => {
            let len = known.as_ref().map_or(1, Vec::len);
            Derived {
                names: known,
                cells: vec![Cell::Unavailable; len],
            }
        }
    }
}

// Counter regressions (restart, wrap) have no meaningful rate.
fn rate(prev: f64, cur: f64, dt_secs: f64) -> Cell {
    if dt_secs <= 0.0 || cur < prev {
        Cell::Unavailable
    } else {
        Cell::Value((cur - prev) / dt_secs)
    }
}

fn emit_cell(cur: Cell, sent: &mut Cell) -> Option<WireInstance> {
    if cur == *sent {
        return None;
    }
    *sent = cur;
    match cur {
        Cell::Value(v) => Some(WireInstance::Value(v)),
        Cell::Unavailable => Some(WireInstance::Flag(false)),
        Cell::Unknown => None,
    }
}

fn emit(d: &Derived, sent: &mut [Cell]) -> Option<WireEntry> {
    if d.names.is_none() {
        let slot = sent.first_mut()?;
        return emit_cell(d.cells[0], slot).map(|w| match w {
            WireInstance::Value(v) => WireEntry::Value(v),
            WireInstance::Flag(f) => WireEntry::Flag(f),
        });
    }
    let values: Vec<Option<WireInstance>> = d
        .cells
        .iter()
        .zip(sent.iter_mut())
        .map(|(cur, s)| emit_cell(*cur, s))
        .collect();
    values
        .iter()
        .any(Option::is_some)
        .then_some(WireEntry::Instances(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{CPU_USER, LOAD_AVG, MEM_TOTAL, NET_BYTES};

    fn spec(name: &str, derive: Derivation, omit: &[&str]) -> MetricSpec {
        MetricSpec {
            name: name.to_string(),
            derive,
            omit_instances: omit.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn snap(ts: i64, cpu: f64, mem: f64) -> Arc<Snapshot> {
        Arc::new(Snapshot::new(ts).scalar(CPU_USER, cpu).scalar(MEM_TOTAL, mem))
    }

    fn encoder() -> TickEncoder {
        TickEncoder::new(
            vec![
                spec(CPU_USER, Derivation::Rate, &[]),
                spec(MEM_TOTAL, Derivation::Raw, &[]),
            ],
            3000,
            Some("box".into()),
        )
    }

    #[test]
    fn first_tick_has_meta_and_unavailable_rate() {
        let mut enc = encoder();
        let out = enc.encode(snap(3000, 100.0, 8.0));
        let meta = out.meta.unwrap();
        assert_eq!(meta.timestamp, 3000);
        assert_eq!(meta.host.as_deref(), Some("box"));
        assert_eq!(
            out.tick,
            vec![Some(WireEntry::Flag(false)), Some(WireEntry::Value(8.0))]
        );
    }

    #[test]
    fn unchanged_values_are_omitted_and_rates_derived() {
        let mut enc = encoder();
        enc.encode(snap(3000, 100.0, 8.0));
        let out = enc.encode(snap(6000, 700.0, 8.0));
        assert!(out.meta.is_none());
        // 600 ms of cpu over 3 s
        assert_eq!(out.tick, vec![Some(WireEntry::Value(200.0))]);
        let out = enc.encode(snap(9000, 1300.0, 8.0));
        assert!(out.tick.is_empty());
    }

    #[test]
    fn counter_regression_is_unavailable() {
        let mut enc = encoder();
        enc.encode(snap(3000, 100.0, 8.0));
        enc.encode(snap(6000, 400.0, 8.0));
        let out = enc.encode(snap(9000, 50.0, 8.0));
        assert_eq!(out.tick, vec![Some(WireEntry::Flag(false))]);
        // already reported unavailable, then recovers
        let out = enc.encode(snap(12000, 350.0, 8.0));
        assert_eq!(out.tick, vec![Some(WireEntry::Value(100.0))]);
    }

    #[test]
    fn discontinuity_starts_new_meta() {
        let mut enc = encoder();
        enc.encode(snap(3000, 100.0, 8.0));
        let out = enc.encode(snap(30000, 400.0, 8.0));
        assert_eq!(out.meta.map(|m| m.timestamp), Some(30000));
        assert_eq!(
            out.tick,
            vec![Some(WireEntry::Flag(false)), Some(WireEntry::Value(8.0))]
        );
    }

    #[test]
    fn primed_encoder_derives_first_rate() {
        let mut enc = encoder();
        enc.prime(snap(0, 100.0, 8.0));
        let out = enc.encode(snap(3000, 400.0, 8.0));
        assert!(out.meta.is_some());
        assert_eq!(
            out.tick,
            vec![Some(WireEntry::Value(100.0)), Some(WireEntry::Value(8.0))]
        );
    }

    #[test]
    fn instances_filtered_and_rebound_on_change() {
        let mut enc = TickEncoder::new(
            vec![
                spec(LOAD_AVG, Derivation::Raw, &[]),
                spec(NET_BYTES, Derivation::Rate, &["lo"]),
            ],
            3000,
            None,
        );
        let s = |ts: i64, ifaces: &[(&str, f64)]| {
            Arc::new(
                Snapshot::new(ts)
                    .instances(LOAD_AVG, &[("15 minute", 0.5), ("1 minute", 1.5), ("5 minute", 1.0)])
                    .instances(NET_BYTES, ifaces),
            )
        };
        let out = enc.encode(s(3000, &[("eth0", 0.0), ("lo", 0.0)]));
        let meta = out.meta.unwrap();
        assert_eq!(meta.metrics[1].instances, Some(vec!["eth0".to_string()]));

        let out = enc.encode(s(6000, &[("eth0", 3000.0), ("lo", 9000.0)]));
        assert!(out.meta.is_none());
        assert_eq!(
            out.tick,
            vec![
                None,
                Some(WireEntry::Instances(vec![Some(WireInstance::Value(1000.0))]))
            ]
        );

        let out = enc.encode(s(9000, &[("eth0", 6000.0), ("wlan0", 10.0)]));
        let meta = out.meta.unwrap();
        assert_eq!(
            meta.metrics[1].instances,
            Some(vec!["eth0".to_string(), "wlan0".to_string()])
        );
    }

    #[test]
    fn run_splits_batches() {
        let mut enc = encoder();
        let snaps = (1..=130).map(|i| snap(i * 3000, i as f64, 8.0));
        let msgs = enc.encode_run(snaps);
        let kinds: Vec<usize> = msgs
            .iter()
            .map(|m| match m {
                ServerMessage::Meta(_) => 0,
                ServerMessage::Batch { ticks } => ticks.len(),
                ServerMessage::Close { .. } => usize::MAX,
            })
            .collect();
        assert_eq!(kinds, vec![0, 60, 60, 10]);
    }
}
