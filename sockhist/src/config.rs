//! Client settings: feed profiles plus pipeline knobs.
//! Stored under XDG config dir: $XDG_CONFIG_HOME/sockhist/config.json (fallback ~/.config/sockhist/config.json)

use std::{collections::BTreeMap, fs, path::PathBuf, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::history::GapFill;
use crate::scale::ScaleFloors;

pub const DEFAULT_LIVE_TAIL_SECS: u64 = 60;
// one day of hour windows
pub const DEFAULT_MAX_WINDOWS: usize = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // divide use_cpu by the core count
    pub per_core: bool,
    pub gap_fill: GapFill,
    pub live_tail_secs: u64,
    // oldest windows beyond this many are evicted
    pub max_windows: usize,
    pub scale_floors: ScaleFloors,
    // profile name -> agent url
    pub profiles: BTreeMap<String, String>,
    pub version: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            per_core: true,
            gap_fill: GapFill::default(),
            live_tail_secs: DEFAULT_LIVE_TAIL_SECS,
            max_windows: DEFAULT_MAX_WINDOWS,
            scale_floors: ScaleFloors::default(),
            profiles: BTreeMap::new(),
            version: 1,
        }
    }
}

impl Settings {
    pub fn live_tail_period(&self) -> Duration {
        Duration::from_secs(self.live_tail_secs.max(1))
    }

    /// Environment wins over the file: SOCKHIST_PER_CORE, SOCKHIST_GAP_FILL.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SOCKHIST_PER_CORE") {
            self.per_core = v != "0";
        }
        if let Ok(v) = std::env::var("SOCKHIST_GAP_FILL") {
            match v.parse() {
                Ok(policy) => self.gap_fill = policy,
                Err(e) => warn!("SOCKHIST_GAP_FILL: {e}"),
            }
        }
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("sockhist")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sockhist")
    }
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// A missing or unreadable file yields defaults; the feed should still come up.
pub fn load_settings() -> Settings {
    let path = config_path();
    match fs::read_to_string(&path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            warn!("ignoring malformed {}: {e}", path.display());
            Settings::default()
        }),
        Err(_) => Settings::default(),
    }
}

pub fn save_settings(s: &Settings) -> anyhow::Result<()> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(s)?;
    fs::write(&path, data).with_context(|| format!("writing {}", path.display()))
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResolveProfile {
    /// Url given on the command line; Some(name) when it should be stored under that profile
    Direct(String, Option<String>),
    /// Loaded from an existing profile entry
    Loaded(String),
    /// Named profile does not exist and no url was given
    Unknown(String),
    /// Nothing given; caller lists the stored profiles
    Choose(Vec<String>),
    None,
}

pub fn resolve_profile(s: &Settings, profile: Option<&str>, url: Option<&str>) -> ResolveProfile {
    match (profile, url) {
        (name, Some(u)) => ResolveProfile::Direct(u.to_string(), name.map(str::to_string)),
        (Some(name), None) => match s.profiles.get(name) {
            Some(u) => ResolveProfile::Loaded(u.clone()),
            None => ResolveProfile::Unknown(name.to_string()),
        },
        (None, None) if s.profiles.is_empty() => ResolveProfile::None,
        (None, None) => ResolveProfile::Choose(s.profiles.keys().cloned().collect()),
    }
}

/// Record `url` under `name`. New names are always stored; changed entries only with `overwrite`.
/// Returns whether the settings changed.
pub fn remember_profile(s: &mut Settings, name: &str, url: &str, overwrite: bool) -> bool {
    match s.profiles.get(name) {
        Some(existing) if existing == url => false,
        Some(_) if !overwrite => false,
        _ => {
            s.profiles.insert(name.to_string(), url.to_string());
            true
        }
    }
}
