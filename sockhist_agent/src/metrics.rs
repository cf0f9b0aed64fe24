//! Host sampling for sockhist_agent: one snapshot of every catalog metric per tick.

use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};
use tracing::warn;

pub const CPU_NICE: &str = "kernel.all.cpu.nice";
pub const CPU_USER: &str = "kernel.all.cpu.user";
pub const CPU_SYS: &str = "kernel.all.cpu.sys";
pub const NCPU: &str = "hinv.ncpu";
pub const MEM_TOTAL: &str = "mem.physmem";
pub const MEM_AVAILABLE: &str = "mem.util.available";
pub const SWAP_OUT: &str = "swap.pagesout";
pub const LOAD_AVG: &str = "kernel.all.load";
pub const DISK_BYTES: &str = "disk.all.total_bytes";
pub const NET_BYTES: &str = "network.interface.total.bytes";

/// Every metric name a client may subscribe to.
pub const CATALOG: &[&str] = &[
    CPU_NICE,
    CPU_USER,
    CPU_SYS,
    NCPU,
    MEM_TOTAL,
    MEM_AVAILABLE,
    SWAP_OUT,
    LOAD_AVG,
    DISK_BYTES,
    NET_BYTES,
];

// kernel clock ticks per second for /proc/stat
#[cfg(target_os = "linux")]
const USER_HZ: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Scalar(f64),
    // (instance name, value), in stable name order
    Instances(Vec<(String, f64)>),
}

/// Raw values at one instant. Counters are cumulative; rates are derived per subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: i64,
    pub values: BTreeMap<&'static str, Reading>,
}

impl Snapshot {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Reading> {
        self.values.get(name)
    }

    pub fn scalar(mut self, name: &'static str, v: f64) -> Self {
        self.values.insert(name, Reading::Scalar(v));
        self
    }

    pub fn instances(mut self, name: &'static str, v: &[(&str, f64)]) -> Self {
        self.values.insert(
            name,
            Reading::Instances(v.iter().map(|(n, x)| (n.to_string(), *x)).collect()),
        );
        self
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Persistent sysinfo handles so cumulative counters stay consistent between ticks.
pub struct Collector {
    sys: System,
    disks: Disks,
    networks: Networks,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing())
            .with_memory(MemoryRefreshKind::everything());
        Self {
            sys: System::new_with_specifics(refresh_kind),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
        }
    }

    pub fn sample(&mut self, timestamp: i64) -> Snapshot {
        let mut snap = Snapshot::new(timestamp);

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.sys.refresh_memory();
        })) {
            warn!("sysinfo memory refresh panicked: {e:?}");
        } else {
            snap.values
                .insert(MEM_TOTAL, Reading::Scalar(self.sys.total_memory() as f64));
            snap.values.insert(
                MEM_AVAILABLE,
                Reading::Scalar(self.sys.available_memory() as f64),
            );
        }

        let cores = self.sys.cpus().len();
        if cores > 0 {
            snap.values.insert(NCPU, Reading::Scalar(cores as f64));
        }

        let load = System::load_average();
        snap.values.insert(
            LOAD_AVG,
            Reading::Instances(vec![
                ("15 minute".to_string(), load.fifteen),
                ("1 minute".to_string(), load.one),
                ("5 minute".to_string(), load.five),
            ]),
        );

        self.disks.refresh(true);
        let disk_bytes: u64 = self
            .disks
            .list()
            .iter()
            .map(|d| {
                let u = d.usage();
                u.total_read_bytes.saturating_add(u.total_written_bytes)
            })
            .sum();
        snap.values
            .insert(DISK_BYTES, Reading::Scalar(disk_bytes as f64));

        self.networks.refresh(true);
        let mut ifaces: Vec<(String, f64)> = self
            .networks
            .iter()
            .map(|(name, data)| {
                let total = data.total_received().saturating_add(data.total_transmitted());
                (name.to_string(), total as f64)
            })
            .collect();
        ifaces.sort_by(|a, b| a.0.cmp(&b.0));
        snap.values.insert(NET_BYTES, Reading::Instances(ifaces));

        self.sample_proc(&mut snap);
        snap
    }

    #[cfg(target_os = "linux")]
    fn sample_proc(&mut self, snap: &mut Snapshot) {
        match fs::read_to_string("/proc/stat") {
            Ok(s) => {
                if let Some((nice, user, sys)) = parse_cpu_ms(&s, USER_HZ) {
                    snap.values.insert(CPU_NICE, Reading::Scalar(nice));
                    snap.values.insert(CPU_USER, Reading::Scalar(user));
                    snap.values.insert(CPU_SYS, Reading::Scalar(sys));
                }
            }
            Err(e) => warn!("reading /proc/stat: {e}"),
        }
        match fs::read_to_string("/proc/vmstat") {
            Ok(s) => {
                if let Some(v) = parse_pages_out(&s) {
                    snap.values.insert(SWAP_OUT, Reading::Scalar(v));
                }
            }
            Err(e) => warn!("reading /proc/vmstat: {e}"),
        }
    }

    // No per-mode CPU counters or swap paging outside Linux; clients see these as unavailable.
    #[cfg(not(target_os = "linux"))]
    fn sample_proc(&mut self, _snap: &mut Snapshot) {}
}

/// Cumulative (nice, user, sys) CPU time in milliseconds from the aggregate /proc/stat line.
pub fn parse_cpu_ms(stat: &str, user_hz: f64) -> Option<(f64, f64, f64)> {
    // "cpu  user nice system idle iowait irq softirq steal ..."
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let mut it = line.split_whitespace().skip(1);
    let user: u64 = it.next()?.parse().ok()?;
    let nice: u64 = it.next()?.parse().ok()?;
    let sys: u64 = it.next()?.parse().ok()?;
    let ms = |jiffies: u64| jiffies as f64 * 1000.0 / user_hz;
    Some((ms(nice), ms(user), ms(sys)))
}

/// Cumulative pages swapped out, from /proc/vmstat.
pub fn parse_pages_out(vmstat: &str) -> Option<f64> {
    vmstat.lines().find_map(|l| {
        let (key, value) = l.split_once(' ')?;
        (key == "pswpout")
            .then(|| value.trim().parse::<u64>().ok())
            .flatten()
            .map(|v| v as f64)
    })
}
