//! Error types and result definitions for pipeline operations.
//!
//! Provides a kind-classified error type with captured callsite metadata.
//! [`PipelineError`] distinguishes record-level failures, which are routed to
//! dead letters, from run-level failures, which abort the current stage
//! invocation while leaving checkpoints untouched.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for pipeline operations using [`PipelineError`].
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Main error type for pipeline operations.
///
/// Carries an [`ErrorKind`] for classification, a static description, an
/// optional dynamic detail, an optional source error, and the callsite where
/// the error was created.
#[derive(Debug, Clone)]
pub struct PipelineError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Specific categories of errors that can occur during pipeline operations.
///
/// Record-level kinds never abort a batch; run-level kinds abort the current
/// stage invocation with its checkpoint unchanged.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source errors
    SourceUnavailable,

    // Record-level validation errors
    SchemaViolation,
    TypeCoercionError,
    ReferentialIntegrityError,

    // Checkpoint errors
    StaleOffset,

    // Merge errors
    DuplicateKeyInBatch,

    // Store errors
    StoreIoError,

    // Data & configuration errors
    InvalidData,
    ConfigError,

    // State errors
    InvalidState,

    // Unknown / uncategorized
    Unknown,
}

impl ErrorKind {
    /// Returns whether a failed run may be retried as a whole.
    ///
    /// Retryable failures leave checkpoints unchanged, so re-running the stage
    /// reprocesses the same window safely.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::SourceUnavailable | ErrorKind::StoreIoError)
    }
}

impl PipelineError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Returns whether the whole stage invocation may be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Attaches an originating [`error::Error`] to this error and returns the
    /// modified instance. The stored source is exposed via
    /// [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates a [`PipelineError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        PipelineError {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
        }
    }
}

impl PartialEq for PipelineError {
    fn eq(&self, other: &PipelineError) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.kind,
            self.description,
            self.location.file(),
            self.location.line(),
            self.location.column()
        )?;

        if let Some(detail) = self.detail.as_deref() {
            write!(f, "\n  Detail: {detail}")?;
        }

        Ok(())
    }
}

impl error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Creates a [`PipelineError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for PipelineError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> PipelineError {
        PipelineError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`PipelineError`] from an error kind, static description, and
/// dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for PipelineError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> PipelineError {
        PipelineError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`std::io::Error`] to [`PipelineError`] with [`ErrorKind::StoreIoError`].
impl From<std::io::Error> for PipelineError {
    #[track_caller]
    fn from(err: std::io::Error) -> PipelineError {
        let detail = err.to_string();
        let source = Arc::new(err);
        PipelineError::from_components(
            ErrorKind::StoreIoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`serde_json::Error`] to [`PipelineError`] with [`ErrorKind::InvalidData`].
impl From<serde_json::Error> for PipelineError {
    #[track_caller]
    fn from(err: serde_json::Error) -> PipelineError {
        let detail = err.to_string();
        let source = Arc::new(err);
        PipelineError::from_components(
            ErrorKind::InvalidData,
            Cow::Borrowed("JSON serialization failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`chrono::ParseError`] to [`PipelineError`] with [`ErrorKind::TypeCoercionError`].
impl From<chrono::ParseError> for PipelineError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> PipelineError {
        let detail = err.to_string();
        let source = Arc::new(err);
        PipelineError::from_components(
            ErrorKind::TypeCoercionError,
            Cow::Borrowed("Datetime parsing failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`medallion_config::shared::ValidationError`] to [`PipelineError`]
/// with [`ErrorKind::ConfigError`].
impl From<medallion_config::shared::ValidationError> for PipelineError {
    #[track_caller]
    fn from(err: medallion_config::shared::ValidationError) -> PipelineError {
        let detail = err.to_string();
        let source = Arc::new(err);
        PipelineError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Configuration validation failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline_error;

    #[test]
    fn captures_kind_and_detail() {
        let err = pipeline_error!(
            ErrorKind::StaleOffset,
            "Offset moved backwards",
            format!("new offset {} <= current {}", 3, 7)
        );

        assert_eq!(err.kind(), ErrorKind::StaleOffset);
        assert_eq!(err.detail(), Some("new offset 3 <= current 7"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn classifies_retryable_kinds() {
        assert!(ErrorKind::SourceUnavailable.is_retryable());
        assert!(ErrorKind::StoreIoError.is_retryable());
        assert!(!ErrorKind::DuplicateKeyInBatch.is_retryable());
        assert!(!ErrorKind::SchemaViolation.is_retryable());
    }
}
