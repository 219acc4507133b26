use thiserror::Error;

/// Errors raised by the decision engine and its collaborators
///
/// Missing indicator values are not errors; they are carried as
/// [`crate::models::Indicator::Insufficient`] and fail closed where used.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid exit tier table: {0}")]
    InvalidTierTable(String),

    #[error("malformed holding for {asset}: {reason}")]
    MalformedHolding { asset: String, reason: String },

    #[error("no exit tier matches remaining fraction {fraction:.4} for {asset}")]
    NoMatchingTier { asset: String, fraction: f64 },

    #[error("{service} error: {message}")]
    Upstream { service: String, message: String },

    #[error("{service} rejected request ({status}): {message}")]
    Rejected {
        service: String,
        status: u16,
        message: String,
    },

    #[error("giving up after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    pub fn upstream(service: &str, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status()
                        .map(|s| s.is_server_error() || s.as_u16() == 429)
                        .unwrap_or(false)
            }
            EngineError::Upstream { .. } => true,
            _ => false,
        }
    }

    /// Errors that exclude one asset or holding for a cycle without affecting others
    pub fn is_per_asset(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedHolding { .. } | EngineError::NoMatchingTier { .. }
        )
    }
}
