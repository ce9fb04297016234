use thiserror::Error;

/// Reasons a metadata lookup didn't produce anything. None of these are
/// fatal, the affected devices just stay unresolved.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Malformed metadata response: {0}")]
    MalformedResponse(String),
    #[error("Network failure: {0}")]
    NetworkFailure(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ScanError {
    /// Sources can't be restarted once they have been stopped
    #[error("Scan source can't be subscribed to again")]
    Exhausted,
    #[error("Scan source unavailable: {0}")]
    Unavailable(String),
    /// A timing setting that scanning can't run with, such as a zero period
    #[error("Invalid scan setting: {0}")]
    InvalidConfig(String),
}
