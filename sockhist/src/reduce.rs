//! Metric reducer: turns a decoded tick into the six dashboard resource values.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::decode::{DecodedTick, Value};
use crate::scale::{ScaleKey, ScaleState};
use crate::types::{Meta, MetricSpec};

// Metric order of the dashboard subscription.
pub const CPU_NICE: usize = 0;
pub const CPU_USER: usize = 1;
pub const CPU_SYS: usize = 2;
pub const NCPU: usize = 3;
pub const MEM_TOTAL: usize = 4;
pub const MEM_AVAILABLE: usize = 5;
pub const SWAP_OUT: usize = 6;
pub const LOAD_AVG: usize = 7;
pub const DISK_BYTES: usize = 8;
pub const NET_BYTES: usize = 9;

// pages/s at which swapping counts as full memory saturation
pub const SWAP_OUT_HEAVY: f64 = 1000.0;

const LOAD_ONE_MINUTE: &str = "1 minute";
// kernel.all.load instances arrive as 15, 1, 5 minutes
const LOAD_ONE_MINUTE_FALLBACK: usize = 1;

pub fn dashboard_metrics() -> Vec<MetricSpec> {
    vec![
        MetricSpec::rate("kernel.all.cpu.nice"),
        MetricSpec::rate("kernel.all.cpu.user"),
        MetricSpec::rate("kernel.all.cpu.sys"),
        MetricSpec::raw("hinv.ncpu"),
        MetricSpec::raw("mem.physmem"),
        MetricSpec::raw("mem.util.available"),
        MetricSpec::rate("swap.pagesout"),
        MetricSpec::raw("kernel.all.load"),
        MetricSpec::rate("disk.all.total_bytes"),
        MetricSpec::rate("network.interface.total.bytes").omitting("lo"),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKey {
    UseCpu,
    SatCpu,
    UseMemory,
    SatMemory,
    UseDisks,
    UseNetwork,
}

impl ResourceKey {
    pub const ALL: [ResourceKey; 6] = [
        ResourceKey::UseCpu,
        ResourceKey::SatCpu,
        ResourceKey::UseMemory,
        ResourceKey::SatMemory,
        ResourceKey::UseDisks,
        ResourceKey::UseNetwork,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKey::UseCpu => "use_cpu",
            ResourceKey::SatCpu => "sat_cpu",
            ResourceKey::UseMemory => "use_memory",
            ResourceKey::SatMemory => "sat_memory",
            ResourceKey::UseDisks => "use_disks",
            ResourceKey::UseNetwork => "use_network",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Resource values for one tick. A resource with missing inputs is `None`, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReducedSample {
    values: [Option<f64>; 6],
}

impl ReducedSample {
    pub fn get(&self, key: ResourceKey) -> Option<f64> {
        self.values[key.index()]
    }

    pub fn set(&mut self, key: ResourceKey, value: Option<f64>) {
        self.values[key.index()] = value;
    }

    pub fn with(mut self, key: ResourceKey, value: f64) -> Self {
        self.set(key, Some(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

impl Serialize for ReducedSample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let present = self.values.iter().filter(|v| v.is_some()).count();
        let mut map = serializer.serialize_map(Some(present))?;
        for key in ResourceKey::ALL {
            if let Some(v) = self.get(key) {
                map.serialize_entry(key.as_str(), &v)?;
            }
        }
        map.end()
    }
}

#[derive(Debug, Clone)]
pub struct Reducer {
    per_core: bool,
    load_one_minute: usize,
}

impl Reducer {
    pub fn new(per_core: bool) -> Self {
        Self {
            per_core,
            load_one_minute: LOAD_ONE_MINUTE_FALLBACK,
        }
    }

    // Locate the one-minute load instance by name when the meta lists them.
    pub fn bind(&mut self, meta: &Meta) {
        self.load_one_minute = meta
            .metrics
            .get(LOAD_AVG)
            .and_then(|m| m.instances.as_ref())
            .and_then(|names| names.iter().position(|n| n == LOAD_ONE_MINUTE))
            .unwrap_or(LOAD_ONE_MINUTE_FALLBACK);
    }

    /// Reduce a decoded tick; `None` when no resource could be derived at all.
    pub fn reduce(&self, tick: &DecodedTick, scale: &ScaleState) -> Option<ReducedSample> {
        let mut out = ReducedSample::default();

        let use_cpu = self.use_cpu(tick);
        if let Some(v) = use_cpu.filter(|_| !self.per_core) {
            scale.observe(ScaleKey::CpuLoad, v);
        }
        out.set(ResourceKey::UseCpu, use_cpu);

        let sat_cpu = instance(tick, LOAD_AVG, self.load_one_minute);
        if let Some(v) = sat_cpu {
            scale.observe(ScaleKey::CpuLoad, v);
        }
        out.set(ResourceKey::SatCpu, sat_cpu);

        out.set(ResourceKey::UseMemory, use_memory(tick));
        out.set(ResourceKey::SatMemory, scalar(tick, SWAP_OUT).map(swap_saturation));

        let disks = scalar(tick, DISK_BYTES);
        if let Some(v) = disks {
            scale.observe(ScaleKey::DiskThroughput, v);
        }
        out.set(ResourceKey::UseDisks, disks);

        let net = network_total(tick);
        if let Some(v) = net {
            scale.observe(ScaleKey::NetworkThroughput, v);
        }
        out.set(ResourceKey::UseNetwork, net);

        (!out.is_empty()).then_some(out)
    }

    fn use_cpu(&self, tick: &DecodedTick) -> Option<f64> {
        let busy_ms = scalar(tick, CPU_NICE)? + scalar(tick, CPU_USER)? + scalar(tick, CPU_SYS)?;
        let cores_busy = busy_ms / 1000.0;
        if self.per_core {
            let n = scalar(tick, NCPU).filter(|n| *n > 0.0)?;
            Some(cores_busy / n)
        } else {
            Some(cores_busy)
        }
    }
}

fn scalar(tick: &DecodedTick, index: usize) -> Option<f64> {
    tick.get(index)?.as_ref()?.scalar()
}

fn instance(tick: &DecodedTick, index: usize, inst: usize) -> Option<f64> {
    tick.get(index)?.as_ref()?.instances()?.get(inst).copied().flatten()
}

fn use_memory(tick: &DecodedTick) -> Option<f64> {
    let total = scalar(tick, MEM_TOTAL).filter(|t| *t > 0.0)?;
    let available = scalar(tick, MEM_AVAILABLE)?;
    Some(1.0 - available / total)
}

pub fn swap_saturation(pages_out: f64) -> f64 {
    if pages_out <= 0.0 {
        0.0
    } else if pages_out < SWAP_OUT_HEAVY {
        0.3
    } else {
        1.0
    }
}

fn network_total(tick: &DecodedTick) -> Option<f64> {
    match tick.get(NET_BYTES)?.as_ref()? {
        Value::Instances(vals) => {
            let known: Vec<f64> = vals.iter().flatten().copied().collect();
            (!known.is_empty()).then(|| known.iter().sum())
        }
        Value::Scalar(v) => Some(*v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::ScaleFloors;

    fn tick_with(entries: &[(usize, Value)]) -> DecodedTick {
        let mut t = vec![None; 10];
        for (i, v) in entries {
            t[*i] = Some(v.clone());
        }
        t
    }

    #[test]
    fn cpu_sums_rates_in_cores() {
        let scale = ScaleState::new(&ScaleFloors::default());
        let t = tick_with(&[
            (CPU_NICE, Value::Scalar(10.0)),
            (CPU_USER, Value::Scalar(20.0)),
            (CPU_SYS, Value::Scalar(5.0)),
            (NCPU, Value::Scalar(4.0)),
        ]);
        let s = Reducer::new(false).reduce(&t, &scale).unwrap();
        assert!((s.get(ResourceKey::UseCpu).unwrap() - 0.035).abs() < 1e-12);
        let s = Reducer::new(true).reduce(&t, &scale).unwrap();
        assert!((s.get(ResourceKey::UseCpu).unwrap() - 0.00875).abs() < 1e-12);
    }

    #[test]
    fn missing_cpu_counter_is_no_data() {
        let scale = ScaleState::new(&ScaleFloors::default());
        let t = tick_with(&[
            (CPU_NICE, Value::Scalar(10.0)),
            (CPU_USER, Value::Scalar(20.0)),
            (MEM_TOTAL, Value::Scalar(1000.0)),
            (MEM_AVAILABLE, Value::Scalar(250.0)),
        ]);
        let s = Reducer::new(false).reduce(&t, &scale).unwrap();
        assert_eq!(s.get(ResourceKey::UseCpu), None);
        assert_eq!(s.get(ResourceKey::UseMemory), Some(0.75));
    }

    #[test]
    fn load_uses_one_minute_instance() {
        let scale = ScaleState::new(&ScaleFloors::default());
        let t = tick_with(&[(
            LOAD_AVG,
            Value::Instances(vec![Some(0.5), Some(2.5), Some(1.0)]),
        )]);
        let s = Reducer::new(false).reduce(&t, &scale).unwrap();
        assert_eq!(s.get(ResourceKey::SatCpu), Some(2.5));
        assert_eq!(scale.ceiling(ScaleKey::CpuLoad), 3.0);

        let t = tick_with(&[(LOAD_AVG, Value::Instances(vec![Some(0.5), None, Some(1.0)]))]);
        assert_eq!(Reducer::new(false).reduce(&t, &scale), None);
    }

    #[test]
    fn swap_categories() {
        assert_eq!(swap_saturation(0.0), 0.0);
        assert_eq!(swap_saturation(12.0), 0.3);
        assert_eq!(swap_saturation(999.9), 0.3);
        assert_eq!(swap_saturation(1000.0), 1.0);
    }

    #[test]
    fn empty_tick_reduces_to_nothing() {
        let scale = ScaleState::new(&ScaleFloors::default());
        assert_eq!(Reducer::new(false).reduce(&vec![None; 10], &scale), None);
    }

    #[test]
    fn serializes_present_keys_only() {
        let s = ReducedSample::default()
            .with(ResourceKey::UseMemory, 0.5)
            .with(ResourceKey::SatMemory, 0.0);
        let js = serde_json::to_string(&s).unwrap();
        assert_eq!(js, r#"{"use_memory":0.5,"sat_memory":0.0}"#);
    }
}
