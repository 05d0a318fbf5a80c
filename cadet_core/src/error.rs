/// Common error type for `cadet_core`.
///
/// Ingestion-side failures (malformed records) are reported through
/// `ApplyOutcome` rather than returned, so most of these variants reach the
/// HTTP layer only through `/refresh` and `/poll`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{category} record is missing `{field}`")]
    MissingKey {
        category: &'static str,
        field: &'static str,
    },

    #[error("unknown refresh category: {0}")]
    UnknownCategory(String),

    #[error("refresh timed out with {pending} pending waiter(s)")]
    RefreshTimeout { pending: usize },

    #[error("broker closed: {0}")]
    Closed(String),
}

impl Error {
    pub fn missing_key(category: &'static str, field: &'static str) -> Self {
        Self::MissingKey { category, field }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
