//! Reasons a subscription request is refused.

use thiserror::Error;

use crate::metrics::CATALOG;
use crate::types::{
    OpenSpec, PROBLEM_NOT_FOUND, PROBLEM_NOT_SUPPORTED, PROBLEM_PROTOCOL,
    PROBLEM_UNSUPPORTED_INTERVAL,
};

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("host metrics are not supported on this platform")]
    NotSupported,
    #[error("unknown metric '{0}'")]
    NotFound(String),
    #[error("interval {requested} ms requested, agent samples every {served} ms")]
    UnsupportedInterval { requested: u64, served: u64 },
    #[error("malformed subscription request: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("first frame must be a text subscription request")]
    NotText,
}

impl OpenError {
    /// Problem code sent in the closing message.
    pub fn problem(&self) -> &'static str {
        match self {
            OpenError::NotSupported => PROBLEM_NOT_SUPPORTED,
            OpenError::NotFound(_) => PROBLEM_NOT_FOUND,
            OpenError::UnsupportedInterval { .. } => PROBLEM_UNSUPPORTED_INTERVAL,
            OpenError::Protocol(_) | OpenError::NotText => PROBLEM_PROTOCOL,
        }
    }
}

/// Parse and check a subscription request against what this agent can serve.
pub fn validate(text: &str, interval_ms: u64, supported: bool) -> Result<OpenSpec, OpenError> {
    let spec: OpenSpec = serde_json::from_str(text)?;
    if !supported {
        return Err(OpenError::NotSupported);
    }
    if let Some(m) = spec.metrics.iter().find(|m| !CATALOG.contains(&m.name.as_str())) {
        return Err(OpenError::NotFound(m.name.clone()));
    }
    if spec.interval_ms != interval_ms {
        return Err(OpenError::UnsupportedInterval {
            requested: spec.interval_ms,
            served: interval_ms,
        });
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK: &str = r#"{"interval_ms":3000,"mode":"live","metrics":[{"name":"hinv.ncpu","derive":"raw"}]}"#;

    #[test]
    fn accepts_known_metrics() {
        let spec = validate(OK, 3000, true).unwrap();
        assert_eq!(spec.metrics.len(), 1);
        assert!(spec.start_timestamp.is_none());
    }

    #[test]
    fn maps_refusals_to_problem_codes() {
        assert_eq!(validate(OK, 3000, false).unwrap_err().problem(), "not-supported");
        assert_eq!(validate(OK, 1000, true).unwrap_err().problem(), "unsupported-interval");
        assert_eq!(validate("get_metrics", 3000, true).unwrap_err().problem(), "protocol-error");
        let unknown = OK.replace("hinv.ncpu", "hinv.bogus");
        let err = validate(&unknown, 3000, true).unwrap_err();
        assert_eq!(err.problem(), "not-found");
        assert!(err.to_string().contains("hinv.bogus"));
    }
}
