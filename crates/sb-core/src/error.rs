//! Error types for SiteBlock

/// Reason a user-entered URL was rejected by the translator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidUrl {
    #[error("URL is empty")]
    Empty,
    #[error("URL is too short (minimum {min} characters)")]
    TooShort { min: usize },
    #[error("URL is too long (maximum {max} characters)")]
    TooLong { max: usize },
    #[error("URL points to a forbidden page: {0}")]
    Forbidden(String),
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

/// Failure reported by a host API (rule engine, storage, tabs).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("Rule engine rejected update: {0}")]
    RuleEngine(String),
    #[error("Storage write failed: {0}")]
    Storage(String),
    #[error("Tab query failed: {0}")]
    Tabs(String),
    #[error("Malformed stored value for '{key}': {reason}")]
    Malformed { key: String, reason: String },
}

/// Error type for every operation the background handler performs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockerError {
    #[error("Invalid URL: {0}")]
    InvalidInput(#[from] InvalidUrl),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("Daily disable limit reached: {requested} requested, {remaining} remaining")]
    QuotaExceeded { requested: u32, remaining: u32 },
    #[error("No free rule id left (maximum {max} rules)")]
    RuleLimitReached { max: u32 },
    #[error("Unknown rule id: {0}")]
    UnknownRule(u32),
}

pub type Result<T> = std::result::Result<T, BlockerError>;
