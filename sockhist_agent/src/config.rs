//! Agent settings: command line port plus environment knobs read once.

use once_cell::sync::OnceCell;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_INTERVAL_MS: u64 = 3_000;
// 24h of 3s ticks
pub const DEFAULT_ARCHIVE_TICKS: usize = 28_800;

pub fn parse_port<I: IntoIterator<Item = String>>(args: I, default_port: u16) -> u16 {
    let mut it = args.into_iter();
    let _ = it.next(); // program name
    let mut long: Option<String> = None;
    let mut short: Option<String> = None;
    while let Some(a) = it.next() {
        match a.as_str() {
            "--port" => long = it.next(),
            "-p" => short = it.next(),
            _ if a.starts_with("--port=") => {
                if let Some((_, v)) = a.split_once('=') {
                    long = Some(v.to_string());
                }
            }
            _ => {}
        }
    }
    long.or(short)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(default_port)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// Sampling period; clients must subscribe with the same interval.
pub fn interval_ms() -> u64 {
    static V: OnceCell<u64> = OnceCell::new();
    *V.get_or_init(|| env_or("SOCKHIST_AGENT_INTERVAL_MS", DEFAULT_INTERVAL_MS).max(100))
}

pub fn archive_ticks() -> usize {
    static V: OnceCell<usize> = OnceCell::new();
    *V.get_or_init(|| env_or("SOCKHIST_AGENT_ARCHIVE_TICKS", DEFAULT_ARCHIVE_TICKS).max(1))
}
