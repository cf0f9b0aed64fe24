//! End-to-end subscriptions against an in-process agent with a synthetic archive.

use std::net::SocketAddr;

use axum::{routing::get, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use sockhist_agent::metrics::{Snapshot, CPU_USER, MEM_TOTAL};
use sockhist_agent::state::AppState;
use sockhist_agent::ws::ws_handler;

async fn serve(state: AppState) -> SocketAddr {
    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn seeded(ticks: i64) -> AppState {
    let state = AppState::new(3000, 1000, Some("testhost".into()));
    for i in 0..ticks {
        let snap = Snapshot::new(i * 3000)
            .scalar(CPU_USER, (i * 300) as f64)
            .scalar(MEM_TOTAL, 8.0e9);
        state.publish(snap).await;
    }
    state
}

// Read frames until the agent's close message; returns every JSON message.
async fn exchange(addr: SocketAddr, request: Value) -> Vec<Value> {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws.send(Message::Text(request.to_string())).await.unwrap();
    let mut out = Vec::new();
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(t) = msg {
            let v: Value = serde_json::from_str(&t).unwrap();
            let done = v["type"] == "close";
            out.push(v);
            if done {
                break;
            }
        }
    }
    out
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(t))) => return serde_json::from_str(&t).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("stream ended: {other:?}"),
        }
    }
}

fn request(mode: &str, metric: &str, start: i64, limit: usize) -> Value {
    json!({
        "interval_ms": 3000,
        "mode": mode,
        "start_timestamp": start,
        "sample_limit": limit,
        "metrics": [
            {"name": metric, "derive": "rate"},
            {"name": MEM_TOTAL, "derive": "raw"}
        ]
    })
}

#[tokio::test]
async fn archive_replays_from_start_then_closes() {
    let addr = serve(seeded(10).await).await;
    let msgs = exchange(addr, request("archive", CPU_USER, 6000, 4)).await;

    assert_eq!(msgs[0]["type"], "meta");
    assert_eq!(msgs[0]["timestamp"], 6000);
    assert_eq!(msgs[0]["host"], "testhost");
    assert_eq!(msgs[1]["type"], "batch");
    let ticks = msgs[1]["ticks"].as_array().unwrap();
    assert_eq!(ticks.len(), 4);
    // primed from the 3000 snapshot: 300 ms of cpu per 3 s
    assert_eq!(ticks[0], json!([100.0, 8.0e9]));
    // steady rate, unchanged memory: nothing to send
    assert_eq!(ticks[1], json!([]));
    assert_eq!(msgs.last().unwrap(), &json!({"type": "close"}));
}

#[tokio::test]
async fn unknown_metric_is_refused() {
    let addr = serve(seeded(1).await).await;
    let msgs = exchange(addr, request("archive", "kernel.all.bogus", 0, 1)).await;
    assert_eq!(msgs, vec![json!({"type": "close", "problem": "not-found"})]);
}

#[tokio::test]
async fn interval_mismatch_is_refused() {
    let addr = serve(seeded(1).await).await;
    let mut req = request("live", CPU_USER, 0, 1);
    req["interval_ms"] = json!(1000);
    let msgs = exchange(addr, req).await;
    assert_eq!(msgs[0]["problem"], "unsupported-interval");
}

#[tokio::test]
async fn live_replays_anchor_then_streams() {
    let state = seeded(3).await;
    let addr = serve(state.clone()).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws.send(Message::Text(request("live", CPU_USER, 3000, 0).to_string()))
        .await
        .unwrap();

    let meta = next_json(&mut ws).await;
    assert_eq!(meta["type"], "meta");
    assert_eq!(meta["timestamp"], 3000);
    let replay = next_json(&mut ws).await;
    assert_eq!(replay["ticks"].as_array().unwrap().len(), 2);

    state
        .publish(Snapshot::new(9000).scalar(CPU_USER, 1200.0).scalar(MEM_TOTAL, 8.0e9))
        .await;
    let live = next_json(&mut ws).await;
    assert_eq!(live, json!({"type": "batch", "ticks": [[200.0]]}));
}

#[tokio::test]
async fn lagging_live_subscriber_catches_up_without_a_gap() {
    // a fan-out of one slot forces Lagged as soon as two snapshots queue up
    let state = AppState::with_fanout(3000, 1000, None, 1);
    for i in 0..3 {
        state
            .publish(Snapshot::new(i * 3000).scalar(CPU_USER, (i * 300) as f64).scalar(MEM_TOTAL, 8.0e9))
            .await;
    }
    let addr = serve(state.clone()).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws.send(Message::Text(request("live", CPU_USER, 3000, 0).to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "meta");
    assert_eq!(next_json(&mut ws).await["ticks"].as_array().unwrap().len(), 2);

    // published back to back, before the server task gets to run
    for i in 3..13 {
        state
            .publish(Snapshot::new(i * 3000).scalar(CPU_USER, (i * 300) as f64).scalar(MEM_TOTAL, 8.0e9))
            .await;
    }

    let mut received = 0;
    while received < 10 {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(5), next_json(&mut ws))
            .await
            .expect("ticks after lag");
        assert_eq!(msg["type"], "batch", "unexpected re-announce: {msg}");
        received += msg["ticks"].as_array().unwrap().len();
    }
    assert_eq!(received, 10);
}
