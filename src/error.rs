//! Error taxonomy for the measure-update engine.
//!
//! Two classes matter to the poll loop:
//! - remote errors (transport, HTTP status, unparseable body) abort the
//!   whole cycle and clear the freshness gate
//! - data-shape errors are local to one measure (or one window of a
//!   measure); its previous value stays published and the cycle goes on

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeasureError {
    // ── Remote ──────────────────────────────────────────────────────
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned server error {status}: {body}")]
    Server {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint} rejected the request with {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    // ── Data shape ──────────────────────────────────────────────────
    #[error("measure {measure}: no result in response")]
    MissingResult { measure: String },

    #[error("measure {measure}: no data point for {date}")]
    MissingData { measure: String, date: NaiveDate },

    #[error("measure {measure}: expected exactly one data point for {date}, got {found}")]
    UnexpectedDataShape {
        measure: String,
        date: NaiveDate,
        found: String,
    },

    #[error("measure {measure}: expected data covering {start}..={end}, got {found}")]
    RangeCoverage {
        measure: String,
        start: NaiveDate,
        end: NaiveDate,
        found: String,
    },

    // ── Setup ───────────────────────────────────────────────────────
    #[error("measure {0} is declared more than once")]
    DuplicateMeasure(String),

    #[error("metrics registry: {0}")]
    Registry(#[from] prometheus::Error),
}

impl MeasureError {
    /// Raised by the remote side; aborts the poll cycle.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Server { .. }
                | Self::Rejected { .. }
                | Self::MalformedResponse { .. }
        )
    }

    /// Raised by local validation of an otherwise successful response.
    pub fn is_data_shape(&self) -> bool {
        matches!(
            self,
            Self::MissingResult { .. }
                | Self::MissingData { .. }
                | Self::UnexpectedDataShape { .. }
                | Self::RangeCoverage { .. }
        )
    }

    /// Measure the error is attributed to, if any.
    pub fn measure(&self) -> Option<&str> {
        match self {
            Self::MissingResult { measure }
            | Self::MissingData { measure, .. }
            | Self::UnexpectedDataShape { measure, .. }
            | Self::RangeCoverage { measure, .. } => Some(measure),
            Self::DuplicateMeasure(name) => Some(name),
            _ => None,
        }
    }
}
