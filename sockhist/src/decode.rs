//! Sample decoder: rebuilds absolute per-tick values from the carry-forward encoding.

use tracing::warn;

use crate::types::{Meta, WireEntry, WireInstance, WireTick};

/// One reading as delivered in a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Present(f64),
    CarryForward,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawEntry {
    Scalar(Reading),
    Instances(Vec<Reading>),
}

/// A tick aligned to the subscription's metric order; missing trailing entries carry forward.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTick(pub Vec<RawEntry>);

impl From<Option<WireInstance>> for Reading {
    fn from(v: Option<WireInstance>) -> Self {
        match v {
            Some(WireInstance::Value(x)) => Reading::Present(x),
            Some(WireInstance::Flag(false)) => Reading::Unavailable,
            // `true` has no meaning on the wire; treat it like an omission
            Some(WireInstance::Flag(true)) | None => Reading::CarryForward,
        }
    }
}

impl From<&WireTick> for RawTick {
    fn from(tick: &WireTick) -> Self {
        let entries = tick
            .iter()
            .map(|e| match e {
                None => RawEntry::Scalar(Reading::CarryForward),
                Some(WireEntry::Value(x)) => RawEntry::Scalar(Reading::Present(*x)),
                Some(WireEntry::Flag(false)) => RawEntry::Scalar(Reading::Unavailable),
                Some(WireEntry::Flag(true)) => RawEntry::Scalar(Reading::CarryForward),
                Some(WireEntry::Instances(xs)) => {
                    RawEntry::Instances(xs.iter().copied().map(Reading::from).collect())
                }
            })
            .collect();
        RawTick(entries)
    }
}

/// Last known value of one metric.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    // None for instances that have not reported yet
    Instances(Vec<Option<f64>>),
}

impl Value {
    pub fn scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Instances(_) => None,
        }
    }

    pub fn instances(&self) -> Option<&[Option<f64>]> {
        match self {
            Value::Instances(v) => Some(v),
            Value::Scalar(_) => None,
        }
    }
}

pub type DecodedTick = Vec<Option<Value>>;

#[derive(Debug, Clone, PartialEq)]
enum Shape {
    // Not announced by a meta yet; accept whatever arrives first
    Unknown,
    Scalar,
    Instances(Vec<String>),
}

/// Per-subscription decoder state, one slot per metric in request order.
#[derive(Debug, Clone)]
pub struct Decoder {
    shapes: Vec<Shape>,
    state: Vec<Option<Value>>,
}

impl Decoder {
    pub fn new(metrics: usize) -> Self {
        Self {
            shapes: vec![Shape::Unknown; metrics],
            state: vec![None; metrics],
        }
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn instance_names(&self, index: usize) -> Option<&[String]> {
        match self.shapes.get(index)? {
            Shape::Instances(names) => Some(names),
            _ => None,
        }
    }

    /// Apply the metric layout of a meta message. Instances that survive a
    /// layout change keep their last value; new ones start unknown.
    pub fn rebind(&mut self, meta: &Meta) {
        if meta.metrics.len() != self.state.len() {
            warn!(
                expected = self.state.len(),
                got = meta.metrics.len(),
                "meta metric count differs from subscription"
            );
        }
        for (i, m) in meta.metrics.iter().enumerate().take(self.state.len()) {
            let shape = match &m.instances {
                Some(names) => Shape::Instances(names.clone()),
                None => Shape::Scalar,
            };
            if shape == self.shapes[i] {
                continue;
            }
            self.state[i] = match (&self.shapes[i], &shape, self.state[i].take()) {
                (Shape::Instances(old), Shape::Instances(new), Some(Value::Instances(vals))) => {
                    let remapped = new
                        .iter()
                        .map(|name| {
                            old.iter()
                                .position(|o| o == name)
                                .and_then(|j| vals.get(j).copied().flatten())
                        })
                        .collect();
                    Some(Value::Instances(remapped))
                }
                (Shape::Unknown, Shape::Instances(new), Some(Value::Instances(vals)))
                    if vals.len() == new.len() =>
                {
                    Some(Value::Instances(vals))
                }
                (Shape::Unknown, Shape::Scalar, Some(Value::Scalar(v))) => Some(Value::Scalar(v)),
                _ => None,
            };
            self.shapes[i] = shape;
        }
    }

    /// Fold one tick into the state and return the full decoded tick.
    pub fn decode(&mut self, tick: &RawTick) -> DecodedTick {
        if tick.0.len() > self.state.len() {
            warn!(
                entries = tick.0.len(),
                metrics = self.state.len(),
                "tick has more entries than metrics, extra ignored"
            );
        }
        for (i, entry) in tick.0.iter().enumerate().take(self.state.len()) {
            match entry {
                RawEntry::Scalar(Reading::Present(v)) => {
                    if matches!(self.shapes[i], Shape::Instances(_)) {
                        warn!(metric = i, "scalar reading for multi-instance metric ignored");
                        continue;
                    }
                    self.state[i] = Some(Value::Scalar(*v));
                }
                RawEntry::Scalar(Reading::CarryForward | Reading::Unavailable) => {}
                RawEntry::Instances(readings) => self.decode_instances(i, readings),
            }
        }
        self.state.clone()
    }

    fn decode_instances(&mut self, i: usize, readings: &[Reading]) {
        let expected = match &self.shapes[i] {
            Shape::Scalar => {
                warn!(metric = i, "instance array for scalar metric ignored");
                return;
            }
            Shape::Instances(names) => Some(names.len()),
            Shape::Unknown => match &self.state[i] {
                Some(Value::Instances(v)) => Some(v.len()),
                _ => None,
            },
        };
        if let Some(n) = expected {
            if n != readings.len() {
                warn!(
                    metric = i,
                    expected = n,
                    got = readings.len(),
                    "instance array length mismatch, tick entry ignored"
                );
                return;
            }
        }
        let slot = self.state[i]
            .get_or_insert_with(|| Value::Instances(vec![None; readings.len()]));
        let Value::Instances(vals) = slot else {
            return;
        };
        for (v, r) in vals.iter_mut().zip(readings) {
            if let Reading::Present(x) = r {
                *v = Some(*x);
            }
        }
    }
}
