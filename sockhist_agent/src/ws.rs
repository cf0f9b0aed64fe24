//! WebSocket upgrade and per-connection subscription handler.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use flate2::{write::GzEncoder, Compression};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::encode::TickEncoder;
use crate::error::{validate, OpenError};
use crate::state::AppState;
use crate::types::{FetchMode, OpenSpec, ServerMessage};

// frames above this go out gzip-compressed as binary
const COMPRESS_ABOVE: usize = 64 * 1024;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    state.client_count.fetch_add(1, Ordering::Relaxed);

    struct ClientGuard(Arc<AtomicUsize>);
    impl Drop for ClientGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::Relaxed);
        }
    }
    let _guard = ClientGuard(state.client_count.clone());

    let spec = match read_request(&mut socket, &state).await {
        Some(Ok(spec)) => spec,
        Some(Err(e)) => {
            warn!("refusing subscription: {e}");
            let _ = send(&mut socket, &ServerMessage::close(Some(e.problem()))).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        None => return,
    };
    info!(
        mode = ?spec.mode,
        start = ?spec.start_timestamp,
        metrics = spec.metrics.len(),
        clients = state.client_count.load(Ordering::Relaxed),
        "subscription opened"
    );

    let served = match spec.mode {
        FetchMode::Archive => serve_archive(&mut socket, &state, spec).await,
        FetchMode::Live => serve_live(&mut socket, &state, spec).await,
    };
    match served {
        Ok(()) => info!("subscription closed"),
        Err(e) => debug!("client went away: {e}"),
    }
}

// None when the client leaves before asking for anything.
async fn read_request(
    socket: &mut WebSocket,
    state: &AppState,
) -> Option<Result<OpenSpec, OpenError>> {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => return Some(validate(&text, state.interval_ms, state.supported)),
            Message::Binary(_) => return Some(Err(OpenError::NotText)),
            Message::Close(_) => return None,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    None
}

fn encoder_for(state: &AppState, spec: OpenSpec) -> TickEncoder {
    TickEncoder::new(spec.metrics, state.interval_ms, state.hostname.clone())
}

async fn serve_archive(
    socket: &mut WebSocket,
    state: &AppState,
    spec: OpenSpec,
) -> Result<(), axum::Error> {
    let start = spec.start_timestamp.unwrap_or(i64::MIN);
    let limit = spec.sample_limit;
    let (prior, snaps) = {
        let archive = state.archive.read().await;
        (archive.before(start), archive.range_from(start, limit))
    };
    debug!(start, ticks = snaps.len(), "archive replay");

    let mut enc = encoder_for(state, spec);
    if let Some(p) = prior {
        enc.prime(p);
    }
    for msg in enc.encode_run(snaps) {
        send(socket, &msg).await?;
    }
    send(socket, &ServerMessage::close(None)).await?;
    socket.send(Message::Close(None)).await
}

async fn serve_live(
    socket: &mut WebSocket,
    state: &AppState,
    spec: OpenSpec,
) -> Result<(), axum::Error> {
    // subscribe before reading the archive so nothing falls between the two
    let mut rx = state.live.subscribe();
    let anchor = spec.start_timestamp;
    let (prior, replay) = {
        let archive = state.archive.read().await;
        match anchor {
            Some(ts) => (archive.before(ts), archive.range_from(ts, None)),
            None => (archive.newest().cloned(), Vec::new()),
        }
    };

    let mut enc = encoder_for(state, spec);
    if let Some(p) = prior {
        enc.prime(p);
    }
    for msg in enc.encode_run(replay) {
        send(socket, &msg).await?;
    }

    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Ok(snap) => {
                    if enc.last_timestamp().is_some_and(|t| snap.timestamp <= t) {
                        continue;
                    }
                    for msg in enc.encode_run([snap]) {
                        send(socket, &msg).await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "live subscriber lagged, catching up from archive");
                    let msgs = {
                        let archive = state.archive.read().await;
                        catch_up(&mut enc, &archive)
                    };
                    for msg in msgs {
                        send(socket, &msg).await?;
                    }
                }
                Err(RecvError::Closed) => {
                    send(socket, &ServerMessage::close(None)).await?;
                    return socket.send(Message::Close(None)).await;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Ok(()),
                Some(Ok(_)) => {}
            },
        }
    }
}

// Everything the archive holds past what the encoder already sent. Snapshots dropped
// from the broadcast are still archived, so a slow client sees them instead of a gap.
fn catch_up(enc: &mut TickEncoder, archive: &Archive) -> Vec<ServerMessage> {
    let missed = match enc.last_timestamp() {
        Some(last) => archive.range_from(last + 1, None),
        None => archive.newest().cloned().into_iter().collect(),
    };
    enc.encode_run(missed)
}

async fn send(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(msg) {
        Ok(t) => t,
        Err(e) => {
            warn!("dropping unserializable message: {e}");
            return Ok(());
        }
    };
    socket.send(frame(text)).await
}

fn frame(text: String) -> Message {
    if text.len() <= COMPRESS_ABOVE {
        return Message::Text(text);
    }
    let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
    match enc.write_all(text.as_bytes()).and_then(|_| enc.finish()) {
        Ok(bytes) => Message::Binary(bytes),
        Err(e) => {
            warn!("gzip failed, sending plain text: {e}");
            Message::Text(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Snapshot, MEM_TOTAL};
    use crate::types::{Derivation, MetricSpec};
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn small_frames_stay_text() {
        assert!(matches!(frame("{}".into()), Message::Text(t) if t == "{}"));
    }

    #[test]
    fn large_frames_are_gzipped() {
        let text = "x".repeat(COMPRESS_ABOVE + 1);
        let Message::Binary(bytes) = frame(text.clone()) else {
            panic!("expected binary frame");
        };
        let mut out = String::new();
        GzDecoder::new(&bytes[..]).read_to_string(&mut out).unwrap();
        assert_eq!(out, text);
    }

    #[test]
    fn catch_up_replays_missed_snapshots_without_a_gap() {
        let mut archive = Archive::new(16);
        for i in 0..6 {
            archive.push(Arc::new(Snapshot::new(i * 3000).scalar(MEM_TOTAL, i as f64)));
        }
        let mut enc = TickEncoder::new(
            vec![MetricSpec {
                name: MEM_TOTAL.to_string(),
                derive: Derivation::Raw,
                omit_instances: Vec::new(),
            }],
            3000,
            None,
        );
        let first = enc.encode_run(archive.range_from(0, Some(2)));
        assert!(matches!(first[0], ServerMessage::Meta(_)));

        let msgs = catch_up(&mut enc, &archive);
        assert_eq!(msgs.len(), 1);
        let ServerMessage::Batch { ticks } = &msgs[0] else {
            panic!("expected a batch, got {:?}", msgs[0]);
        };
        assert_eq!(ticks.len(), 4);
        assert_eq!(enc.last_timestamp(), Some(15_000));
        assert!(catch_up(&mut enc, &archive).is_empty());
    }
}
