//! Error taxonomy for the trading core.
//!
//! Policy outcomes (risk-gate denials, observe-only, daily caps) are NOT
//! errors; they become SKIP records with a reason and never travel this enum.
//!
//! The enum rides inside `anyhow::Error` at module seams: HTTP clients wrap
//! transport failures with [`TraderError::http`], the store tags FK failures
//! as `Consistency` and unrecoverable write failures as `Fatal`, and the
//! orchestrator downcasts to decide between absorbing, aborting the single
//! operation, or halting new scans.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraderError {
    /// Timeouts, 429s and 5xx from any external service. Absorbed per-market.
    #[error("transient io: {0}")]
    TransientIo(String),

    /// Malformed payloads from the LM or the market source. Absorbed
    /// per-market after the retry loop is exhausted.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Missing experiment run, FK failure. Aborts the current operation only.
    #[error("consistency: {0}")]
    Consistency(String),

    /// Corrupted state or a store write failure after retry. Halts new scans;
    /// resolution and void commands stay available.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl TraderError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TraderError::Fatal(_))
    }

    /// Absorbable inside a per-market pipeline (drop the market, keep the scan).
    pub fn is_absorbable(&self) -> bool {
        matches!(self, TraderError::TransientIo(_) | TraderError::Protocol(_))
    }

    /// Classify a reqwest failure: decode errors are protocol, 429/5xx and
    /// connection problems transient, other statuses protocol.
    pub fn from_http(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return TraderError::TransientIo(err.to_string());
        }
        if err.is_decode() {
            return TraderError::Protocol(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 429 || status.is_server_error() => {
                TraderError::TransientIo(err.to_string())
            }
            Some(_) => TraderError::Protocol(err.to_string()),
            None => TraderError::TransientIo(err.to_string()),
        }
    }

    /// Wrap a reqwest failure for `?` propagation, keeping the classified
    /// kind downcastable at the orchestrator.
    pub fn http(what: &str, err: &reqwest::Error) -> anyhow::Error {
        anyhow::Error::new(Self::from_http(err)).context(what.to_string())
    }
}
