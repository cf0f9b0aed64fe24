//! Entry point for the sockhist CLI. Backfills hourly windows from an agent, optionally
//! keeps tailing, and prints renderer snapshots as JSON lines on stdout.

use std::env;
use std::io::{self, Write};

use anyhow::Context;
use sockhist::app::App;
use sockhist::config::{
    config_path, load_settings, remember_profile, resolve_profile, save_settings, ResolveProfile,
};
use sockhist::snapshot::Snapshot;
use sockhist::ws::parse_feed_url;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "[--profile NAME|-P NAME] [--save] [--pages N|-n N] [--follow|-f] [--per-core|--total-cpu] [--dry-run] [ws://HOST:PORT/ws]";

#[derive(Debug, Default)]
struct ParsedArgs {
    url: Option<String>,
    profile: Option<String>,
    save: bool,
    pages: usize,
    follow: bool,
    per_core: Option<bool>,
    dry_run: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "sockhist".into());
    let mut parsed = ParsedArgs {
        pages: 1,
        ..ParsedArgs::default()
    };

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(format!("Usage: {prog} {USAGE}")),
            "--profile" | "-P" => parsed.profile = it.next(),
            "--save" => parsed.save = true,
            "--pages" | "-n" => {
                let v = it.next().unwrap_or_default();
                parsed.pages = v
                    .parse()
                    .map_err(|_| format!("invalid page count '{v}'. Usage: {prog} {USAGE}"))?;
            }
            "--follow" | "-f" => parsed.follow = true,
            "--per-core" => parsed.per_core = Some(true),
            "--total-cpu" => parsed.per_core = Some(false),
            "--dry-run" => parsed.dry_run = true,
            _ if arg.starts_with("--profile=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        parsed.profile = Some(v.to_string());
                    }
                }
            }
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown option '{arg}'. Usage: {prog} {USAGE}"));
            }
            _ => {
                if parsed.url.is_none() {
                    parsed.url = Some(arg);
                } else {
                    return Err(format!("Unexpected argument. Usage: {prog} {USAGE}"));
                }
            }
        }
    }
    Ok(parsed)
}

fn print_snapshot(snap: &Snapshot) {
    match serde_json::to_string(snap) {
        Ok(line) => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        Err(e) => tracing::warn!("snapshot serialization failed: {e}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let mut settings = load_settings();
    settings.apply_env();
    if let Some(pc) = parsed.per_core {
        settings.per_core = pc;
    }

    let url = match resolve_profile(&settings, parsed.profile.as_deref(), parsed.url.as_deref()) {
        ResolveProfile::Direct(url, Some(name)) => {
            if remember_profile(&mut settings, &name, &url, parsed.save) {
                save_settings(&settings)
                    .with_context(|| format!("saving profile '{name}'"))?;
            }
            url
        }
        ResolveProfile::Direct(url, None) | ResolveProfile::Loaded(url) => url,
        ResolveProfile::Unknown(name) => {
            eprintln!("Profile '{name}' does not exist yet; pass a url to create it.");
            return Ok(());
        }
        ResolveProfile::Choose(names) => {
            eprintln!("No url given. Stored profiles ({}):", config_path().display());
            for n in names {
                eprintln!("  {n}");
            }
            return Ok(());
        }
        ResolveProfile::None => {
            eprintln!("No URL provided and no profiles stored.");
            return Ok(());
        }
    };

    if let Err(e) = parse_feed_url(&url) {
        eprintln!("{e}");
        return Ok(());
    }
    if parsed.dry_run {
        eprintln!("Resolved feed: {url}");
        return Ok(());
    }

    let mut app = App::new(settings);
    for _ in 0..parsed.pages {
        app.backfill_page(&url).await;
    }
    print_snapshot(&app.snapshot());

    if parsed.follow {
        tokio::select! {
            _ = app.live_tail(&url, print_snapshot) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        print_snapshot(&app.snapshot());
    }
    Ok(())
}
