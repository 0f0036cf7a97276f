// Remote API error taxonomy
//
// Remote failures are typed so callers can distinguish a lookup miss (which
// is sometimes auto-remediated, e.g. by creating a missing output folder)
// from an ambiguous match (always fatal) and a service failure (fatal, not
// retried).

use thiserror::Error;

/// Failure of a remote catalog or execution API call
#[derive(Debug, Error)]
pub enum ApiError {
    /// The looked-up entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The lookup matched more than one entity
    #[error("ambiguous match: {0}")]
    AmbiguousMatch(String),

    /// The resolved remote object contradicts the request
    #[error("data inconsistency: {0}")]
    DataInconsistency(String),

    /// The service rejected or failed the request
    #[error("ICA service error: {0}")]
    Service(String),

    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
