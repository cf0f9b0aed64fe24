//! Dynamic range estimation for unbounded resources.
//!
//! Each ceiling only ever grows, and is rounded up to a single leading digit
//! so the visible scale stays stable (2345 -> 3000, 0.35 -> 0.4).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::reduce::ResourceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleKey {
    CpuLoad,
    DiskThroughput,
    NetworkThroughput,
}

impl ScaleKey {
    pub const ALL: [ScaleKey; 3] = [
        ScaleKey::CpuLoad,
        ScaleKey::DiskThroughput,
        ScaleKey::NetworkThroughput,
    ];

    fn index(self) -> usize {
        match self {
            ScaleKey::CpuLoad => 0,
            ScaleKey::DiskThroughput => 1,
            ScaleKey::NetworkThroughput => 2,
        }
    }
}

/// Starting ceilings; kept high enough that idle noise does not fill the chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleFloors {
    pub cpu_load: f64,
    // bytes/s
    pub disk: f64,
    // bytes/s
    pub network: f64,
}

impl Default for ScaleFloors {
    fn default() -> Self {
        Self {
            cpu_load: 1.0,
            disk: 10_000_000.0,
            network: 100_000.0,
        }
    }
}

impl ScaleFloors {
    fn get(&self, key: ScaleKey) -> f64 {
        match key {
            ScaleKey::CpuLoad => self.cpu_load,
            ScaleKey::DiskThroughput => self.disk,
            ScaleKey::NetworkThroughput => self.network,
        }
    }
}

/// Round up to the next value whose digits are zero except the leading one.
pub fn round_up_ceiling(value: f64) -> f64 {
    let magnitude = 10f64.powi(value.log10().floor() as i32);
    (value / magnitude).ceil() * magnitude
}

/// Process-wide ceilings, one per unbounded resource. Updates are an atomic max.
#[derive(Debug)]
pub struct ScaleState {
    ceilings: [AtomicU64; 3],
}

impl ScaleState {
    pub fn new(floors: &ScaleFloors) -> Self {
        let seed = |key: ScaleKey| {
            let floor = floors.get(key);
            let floor = if floor.is_finite() && floor > 0.0 { floor } else { 1.0 };
            AtomicU64::new(floor.to_bits())
        };
        Self {
            ceilings: ScaleKey::ALL.map(seed),
        }
    }

    pub fn ceiling(&self, key: ScaleKey) -> f64 {
        f64::from_bits(self.ceilings[key.index()].load(Ordering::Acquire))
    }

    /// Record a raw observation, raising the ceiling if it overshoots. Returns the ceiling.
    pub fn observe(&self, key: ScaleKey, value: f64) -> f64 {
        let cell = &self.ceilings[key.index()];
        if !value.is_finite() || value <= 0.0 {
            return f64::from_bits(cell.load(Ordering::Acquire));
        }
        let raised = cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            let current = f64::from_bits(bits);
            (value > current).then(|| round_up_ceiling(value).max(value).to_bits())
        });
        match raised {
            Ok(previous) => {
                let now = f64::from_bits(cell.load(Ordering::Acquire));
                tracing::debug!(?key, from = f64::from_bits(previous), to = now, "scale raised");
                now
            }
            Err(current) => f64::from_bits(current),
        }
    }

    pub fn normalize(&self, key: ScaleKey, value: f64) -> f64 {
        clamp_unit(value.min(self.ceiling(key)) / self.ceiling(key))
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Maps reduced resource values to [0, 1] display fractions.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    pub scale: &'a ScaleState,
    // use_cpu is already a per-core fraction
    pub per_core: bool,
}

impl Normalizer<'_> {
    pub fn normalize(&self, key: ResourceKey, value: f64) -> f64 {
        match key {
            ResourceKey::UseCpu if self.per_core => clamp_unit(value),
            ResourceKey::UseCpu | ResourceKey::SatCpu => self.scale.normalize(ScaleKey::CpuLoad, value),
            ResourceKey::UseMemory | ResourceKey::SatMemory => clamp_unit(value),
            ResourceKey::UseDisks => self.scale.normalize(ScaleKey::DiskThroughput, value),
            ResourceKey::UseNetwork => self.scale.normalize(ScaleKey::NetworkThroughput, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn round_up_to_leading_digit() {
        assert!(close(round_up_ceiling(2345.0), 3000.0));
        assert!(close(round_up_ceiling(1000.0), 1000.0));
        assert!(close(round_up_ceiling(0.35), 0.4));
        assert!(close(round_up_ceiling(9.1), 10.0));
    }

    #[test]
    fn ceiling_only_grows() {
        let s = ScaleState::new(&ScaleFloors::default());
        assert!(close(s.ceiling(ScaleKey::CpuLoad), 1.0));
        assert!(close(s.observe(ScaleKey::CpuLoad, 2.3), 3.0));
        assert!(close(s.observe(ScaleKey::CpuLoad, 0.5), 3.0));
        assert!(close(s.observe(ScaleKey::CpuLoad, f64::NAN), 3.0));
        assert!(close(s.observe(ScaleKey::CpuLoad, 14.0), 20.0));
        assert!(close(s.ceiling(ScaleKey::DiskThroughput), 10_000_000.0));
    }

    #[test]
    fn normalize_clips_into_unit_range() {
        let s = ScaleState::new(&ScaleFloors::default());
        for v in [-5.0, 0.0, 0.5, 1.0, 7.0, f64::INFINITY, f64::NAN] {
            let n = s.normalize(ScaleKey::CpuLoad, v);
            assert!((0.0..=1.0).contains(&n), "{v} -> {n}");
        }
        assert!(close(s.normalize(ScaleKey::CpuLoad, 0.25), 0.25));
        assert!(close(s.normalize(ScaleKey::CpuLoad, 4.0), 1.0));
    }

    #[test]
    fn concurrent_observers_keep_the_max() {
        let s = std::sync::Arc::new(ScaleState::new(&ScaleFloors::default()));
        let handles: Vec<_> = (1..=8)
            .map(|i| {
                let s = s.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        s.observe(ScaleKey::NetworkThroughput, (i * 100_000 + j) as f64);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(close(s.ceiling(ScaleKey::NetworkThroughput), 900_000.0));
    }
}
