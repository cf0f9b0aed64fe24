use futures::StreamExt;
use sockhist::app::now_ms;
use sockhist::history::{window_start, SLOTS_PER_WINDOW, TICK_INTERVAL_MS};
use sockhist::reduce::dashboard_metrics;
use sockhist::types::{FetchMode, OpenSpec, ServerMessage};
use sockhist::ws::{subscribe, SourceEvent};

// Integration probe: only runs when SOCKHIST_WS is set to an agent WebSocket URL.
// Example: SOCKHIST_WS=ws://127.0.0.1:3000/ws cargo test -p sockhist --test ws_probe -- --nocapture
#[tokio::test]
async fn probe_archive_subscription() {
    let url = match std::env::var("SOCKHIST_WS") {
        Ok(v) if !v.is_empty() => v,
        _ => {
            eprintln!(
                "skipping ws_probe: set SOCKHIST_WS=ws://host:port/ws to run this integration test"
            );
            return;
        }
    };

    let spec = OpenSpec {
        interval_ms: TICK_INTERVAL_MS as u64,
        mode: FetchMode::Archive,
        start_timestamp: Some(window_start(now_ms())),
        sample_limit: Some(SLOTS_PER_WINDOW),
        metrics: dashboard_metrics(),
    };
    let mut sub = subscribe(&url, &spec).await.expect("subscribe");

    // Meta first, then batches, then a clean close
    let first = sub.next().await;
    assert!(
        matches!(first, Some(SourceEvent::Message(ServerMessage::Meta(_)))),
        "expected meta, got {first:?}"
    );
    let mut closed = None;
    while let Some(ev) = sub.next().await {
        if let SourceEvent::Closed(problem) = ev {
            closed = Some(problem);
            break;
        }
    }
    assert_eq!(closed, Some(None), "archive fetch should close without a problem");
    sub.close().await;
}
