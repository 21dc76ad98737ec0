use std::fmt;
use std::time::Duration;

/// Application-specific error types.
///
/// Provider-level variants (`RateLimited`, `Blocked`, `TransientProvider`,
/// `ExternalApiError`, `Validation`, `CircuitOpen`) never escape a
/// resolution: the resolver turns them into a provider miss. Only
/// `Configuration` is meant to reach the caller of a batch run.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Quota signal from a provider, optionally with the wait it asked for.
    RateLimited {
        /// Provider that signalled the quota.
        provider: String,
        /// Explicit `Retry-After` duration, when the provider sent one.
        retry_after: Option<Duration>,
    },
    /// Forbidden-class response (key revoked, IP blocked, quota denied).
    Blocked(String),
    /// Network failure or 5xx from a provider; worth retrying.
    TransientProvider(String),
    /// Permanent error interacting with an external API.
    ExternalApiError(String),
    /// Coordinates outside plausible bounds.
    Validation(String),
    /// Address data insufficient to attempt resolution.
    InvalidRecord(String),
    /// An entire batch fetch failed after all retries.
    BatchFailure(String),
    /// Missing or malformed configuration; the run must not start.
    Configuration(String),
    /// The provider's circuit breaker is open.
    CircuitOpen(String),
    /// Checkpoint could not be read or written.
    Checkpoint(String),
    /// Internal error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Quota-exceeded or forbidden-class signal; feeds block detection.
    pub fn is_quota_signal(&self) -> bool {
        match self {
            AppError::RateLimited { .. } | AppError::Blocked(_) => true,
            AppError::WithContext { source, .. } => source.is_quota_signal(),
            _ => false,
        }
    }

    /// Server-class or network error that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::TransientProvider(_) => true,
            AppError::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Explicit wait requested by a rate-limited provider.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AppError::RateLimited { retry_after, .. } => *retry_after,
            AppError::WithContext { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    /// Short label used for the error-type histogram of a batch run.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::DatabaseError(_) => "database",
            AppError::RateLimited { .. } => "quota_exceeded",
            AppError::Blocked(_) => "blocked",
            AppError::TransientProvider(_) => "transient",
            AppError::ExternalApiError(_) => "external_api",
            AppError::Validation(_) => "validation",
            AppError::InvalidRecord(_) => "invalid_cep",
            AppError::BatchFailure(_) => "batch_failure",
            AppError::Configuration(_) => "configuration",
            AppError::CircuitOpen(_) => "circuit_open",
            AppError::Checkpoint(_) => "checkpoint",
            AppError::InternalError(_) => "internal",
            AppError::WithContext { source, .. } => source.kind(),
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::RateLimited {
                provider,
                retry_after,
            } => match retry_after {
                Some(wait) => write!(
                    f,
                    "Rate limit exceeded for {} (retry after {}s)",
                    provider,
                    wait.as_secs()
                ),
                None => write!(f, "Rate limit exceeded for {}", provider),
            },
            AppError::Blocked(msg) => write!(f, "Provider blocked: {}", msg),
            AppError::TransientProvider(msg) => write!(f, "Transient provider error: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation failed: {}", msg),
            AppError::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
            AppError::BatchFailure(msg) => write!(f, "Batch failure: {}", msg),
            AppError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AppError::CircuitOpen(provider) => write!(f, "Circuit open for provider {}", provider),
            AppError::Checkpoint(msg) => write!(f, "Checkpoint error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is simplified to `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::RowNotFound),
            AppError::RateLimited {
                provider,
                retry_after,
            } => AppError::RateLimited {
                provider: provider.clone(),
                retry_after: *retry_after,
            },
            AppError::Blocked(msg) => AppError::Blocked(msg.clone()),
            AppError::TransientProvider(msg) => AppError::TransientProvider(msg.clone()),
            AppError::ExternalApiError(msg) => AppError::ExternalApiError(msg.clone()),
            AppError::Validation(msg) => AppError::Validation(msg.clone()),
            AppError::InvalidRecord(msg) => AppError::InvalidRecord(msg.clone()),
            AppError::BatchFailure(msg) => AppError::BatchFailure(msg.clone()),
            AppError::Configuration(msg) => AppError::Configuration(msg.clone()),
            AppError::CircuitOpen(msg) => AppError::CircuitOpen(msg.clone()),
            AppError::Checkpoint(msg) => AppError::Checkpoint(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    ///
    /// Timeouts and connection failures are transient; everything else is
    /// treated as a permanent provider error.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            AppError::TransientProvider(err.to_string())
        } else {
            AppError::ExternalApiError(err.to_string())
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Checkpoint(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(format!("JSON error: {}", err))
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}
