// src/error.rs

use thiserror::Error;

/// Everything that can go wrong between the remote provider and a rendered view.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DashError {
    /// Provider unreachable, timed out, or answered with a non-2xx status.
    #[error("request to {url} failed: {reason}")]
    NetworkFailure { url: String, reason: String },

    /// Body arrived but is not the table shape we expected.
    #[error("malformed {what}: {reason}")]
    MalformedResponse { what: String, reason: String },

    /// Counties present on one side of the FIPS join but not the other.
    #[error(
        "FIPS join mismatch: no FIPS code for {missing_fips:?}, no results for {missing_results:?}"
    )]
    JoinMismatch {
        missing_fips: Vec<String>,
        missing_results: Vec<String>,
    },

    #[error("county {county:?} is not in the results table")]
    SelectionNotFound { county: String },

    #[error("unknown column {column:?}")]
    UnknownColumn { column: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("view binder was shut down")]
    BinderClosed,
}

pub type DashResult<T> = Result<T, DashError>;

impl DashError {
    /// Failures a user can sensibly retry from a banner.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DashError::NetworkFailure { .. })
    }

    pub(crate) fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        DashError::NetworkFailure {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(what: impl Into<String>, reason: impl ToString) -> Self {
        DashError::MalformedResponse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn config(reason: impl ToString) -> Self {
        DashError::Config {
            reason: reason.to_string(),
        }
    }
}
