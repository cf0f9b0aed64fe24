//! WebSocket client for the agent feed: one connection per subscription.

use std::io::Read;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use flate2::read::GzDecoder;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};
use url::Url;

use crate::error::FeedError;
use crate::types::{OpenSpec, ServerMessage, PROBLEM_DISCONNECTED};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What a subscription delivers: data messages, then exactly one close.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Message(ServerMessage),
    Closed(Option<String>),
}

impl From<ServerMessage> for SourceEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Close { problem } => SourceEvent::Closed(problem),
            other => SourceEvent::Message(other),
        }
    }
}

/// Check that `url` points at a WebSocket endpoint.
pub fn parse_feed_url(url: &str) -> Result<Url, FeedError> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(FeedError::Scheme(other.to_string())),
    }
}

// Connect to the agent and return the WS stream
pub async fn connect(url: &str) -> Result<WsStream, FeedError> {
    let url = parse_feed_url(url)?;
    let (ws, _) = connect_async(url.as_str()).await?;
    Ok(ws)
}

/// Open a subscription: connect and send the request as the first frame.
pub async fn subscribe(url: &str, spec: &OpenSpec) -> Result<Subscription, FeedError> {
    let mut ws = connect(url).await?;
    let body = serde_json::to_string(spec)?;
    ws.send(Message::Text(body)).await?;
    info!(mode = ?spec.mode, start = ?spec.start_timestamp, limit = ?spec.sample_limit, "subscription opened");
    Ok(Subscription { ws: Some(ws) })
}

/// Decode one frame. Text is JSON; binary is gzip-compressed JSON.
pub fn decode_frame(msg: Message) -> Option<Result<ServerMessage, FeedError>> {
    match msg {
        Message::Text(json) => Some(serde_json::from_str(&json).map_err(FeedError::from)),
        Message::Binary(bytes) => {
            let mut gz = GzDecoder::new(bytes.as_slice());
            let mut json = String::new();
            if let Err(e) = gz.read_to_string(&mut json) {
                return Some(Err(FeedError::Decompress(e)));
            }
            Some(serde_json::from_str(&json).map_err(FeedError::from))
        }
        _ => None,
    }
}

pub struct Subscription {
    ws: Option<WsStream>,
}

impl Subscription {
    /// Stop receiving. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
    }
}

impl Stream for Subscription {
    type Item = SourceEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SourceEvent>> {
        loop {
            let Some(ws) = self.ws.as_mut() else {
                return Poll::Ready(None);
            };
            let frame = ready!(ws.poll_next_unpin(cx));
            let msg = match frame {
                Some(Ok(Message::Close(_))) | None => {
                    self.ws = None;
                    return Poll::Ready(Some(SourceEvent::Closed(Some(
                        PROBLEM_DISCONNECTED.to_string(),
                    ))));
                }
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    warn!("feed transport error: {e}");
                    self.ws = None;
                    return Poll::Ready(Some(SourceEvent::Closed(Some(
                        PROBLEM_DISCONNECTED.to_string(),
                    ))));
                }
            };
            match decode_frame(msg) {
                Some(Ok(m)) => {
                    let ev = SourceEvent::from(m);
                    if matches!(ev, SourceEvent::Closed(_)) {
                        self.ws = None;
                    }
                    return Poll::Ready(Some(ev));
                }
                Some(Err(e)) => warn!("malformed feed message ignored: {e}"),
                None => {}
            }
        }
    }
}
