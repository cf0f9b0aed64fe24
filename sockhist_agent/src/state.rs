//! Shared agent state: the collector, the snapshot archive and the live fan-out.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};

use crate::archive::Archive;
use crate::metrics::{Collector, Snapshot};

pub type SharedCollector = Arc<Mutex<Collector>>;
pub type SharedArchive = Arc<RwLock<Archive>>;

// live subscribers that fall further behind than this see a Lagged gap
const FANOUT_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub collector: SharedCollector,
    pub archive: SharedArchive,
    pub live: broadcast::Sender<Arc<Snapshot>>,

    pub client_count: Arc<AtomicUsize>,
    pub interval_ms: u64,
    pub hostname: Option<String>,
    // false on platforms sysinfo cannot sample
    pub supported: bool,
}

impl AppState {
    pub fn new(interval_ms: u64, archive_ticks: usize, hostname: Option<String>) -> Self {
        Self::with_fanout(interval_ms, archive_ticks, hostname, FANOUT_CAPACITY)
    }

    pub fn with_fanout(
        interval_ms: u64,
        archive_ticks: usize,
        hostname: Option<String>,
        fanout: usize,
    ) -> Self {
        let (live, _) = broadcast::channel(fanout.max(1));
        Self {
            collector: Arc::new(Mutex::new(Collector::new())),
            archive: Arc::new(RwLock::new(Archive::new(archive_ticks))),
            live,
            client_count: Arc::new(AtomicUsize::new(0)),
            interval_ms,
            hostname,
            supported: sysinfo::IS_SUPPORTED_SYSTEM,
        }
    }

    /// Store a fresh snapshot and hand it to live subscribers.
    pub async fn publish(&self, snap: Snapshot) {
        let snap = Arc::new(snap);
        if self.archive.write().await.push(snap.clone()) {
            // no receivers is fine
            let _ = self.live.send(snap);
        }
    }
}
