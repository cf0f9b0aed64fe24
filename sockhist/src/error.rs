//! Error types for the feed client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("websocket: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gzip: {0}")]
    Decompress(std::io::Error),
    #[error("invalid feed url: {0}")]
    Url(#[from] url::ParseError),
    #[error("feed url must use ws:// or wss://, got {0}://")]
    Scheme(String),
}
