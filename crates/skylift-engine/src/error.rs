//! Error types for skylift-engine.

/// Result type alias using [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;

/// Message fragments that indicate an authorization failure.
///
/// Remote services are not consistent about status codes for permission
/// problems, so the retrier also matches on the error text.
const AUTH_PATTERNS: &[&str] = &[
    "access denied",
    "accessdenied",
    "not authorized",
    "unauthorized",
    "forbidden",
];

/// Errors that can occur while orchestrating a deployment.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A local precondition failed before any remote call was made.
    #[error("validation error: {0}")]
    Validation(String),

    /// The artifact exceeds the platform's source bundle size limit.
    #[error("artifact is {size} bytes which exceeds the {limit} byte limit")]
    ArtifactTooLarge {
        /// Actual artifact size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        limit: u64,
    },

    /// The storage bucket exists but belongs to a different account.
    #[error("bucket {bucket} exists but is owned by another account")]
    BucketOwnership {
        /// Bucket name.
        bucket: String,
    },

    /// The application version already exists.
    ///
    /// Raised by version creation; indicates a concurrent success elsewhere,
    /// so it is never retried.
    #[error("version {label} already exists for application {application}")]
    VersionConflict {
        /// Application name.
        application: String,
        /// Version label.
        label: String,
    },

    /// The remote service denied the request for authorization reasons.
    #[error("authorization denied: {0}")]
    AuthDenied(String),

    /// A resource that was asserted to exist could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transient remote service error.
    #[error("remote error: {0}")]
    Remote(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// All retry attempts for an operation were exhausted.
    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        /// Label of the operation that was retried.
        operation: String,
        /// Total attempts made.
        attempts: u32,
        /// Message of the last underlying error.
        last_error: String,
    },

    /// A convergence loop observed a definitive failure signal.
    #[error("{phase} failed: {reason}")]
    ConvergenceFailed {
        /// Which polling phase failed.
        phase: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A convergence loop ran out of time without success or failure.
    #[error("{phase} did not complete within {timeout_secs}s")]
    ConvergenceTimeout {
        /// Which polling phase timed out.
        phase: String,
        /// Configured timeout in seconds.
        timeout_secs: u64,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),
}

impl EngineError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a transient remote error.
    #[must_use]
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying this error can possibly help.
    ///
    /// Fatal errors are surfaced immediately by the retrier: local
    /// precondition failures, ownership conflicts, version conflicts and
    /// authorization denials. Everything else is treated as transient.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Validation(_)
            | Self::ArtifactTooLarge { .. }
            | Self::BucketOwnership { .. }
            | Self::VersionConflict { .. }
            | Self::AuthDenied(_)
            | Self::NotFound(_)
            | Self::RetriesExhausted { .. }
            | Self::ConvergenceFailed { .. }
            | Self::ConvergenceTimeout { .. }
            | Self::Config(_) => true,
            Self::Remote(msg) => matches_auth_pattern(msg),
            Self::Http(_) | Self::Io(_) | Self::Serialisation(_) => false,
        }
    }
}

/// Check whether an error message looks like an authorization denial.
#[must_use]
pub fn matches_auth_pattern(message: &str) -> bool {
    let lower = message.to_lowercase();
    AUTH_PATTERNS.iter().any(|p| lower.contains(p))
}
