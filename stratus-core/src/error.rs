//! Error types shared by every Stratus service.
//!
//! Errors are classified by [`ErrorKind`], independent of transport. Each
//! error carries a stable machine-readable `reason` token and a human
//! message; the HTTP adapter maps kinds to status codes and renders the
//! Google-style error envelope.

use thiserror::Error;

/// Transport-independent classification of a service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or semantically invalid input. Never retried.
    InvalidArgument,
    /// The referenced resource does not exist.
    NotFound,
    /// A resource with the same identity already exists.
    AlreadyExists,
    /// An `if-*-match` style precondition did not hold.
    PreconditionFailed,
    /// An optimistic-concurrency or serialization conflict. Retryable.
    Aborted,
    /// The resource is in a state that does not permit the operation.
    FailedPrecondition,
    /// A range or capacity boundary was exceeded (subnet exhausted,
    /// unsatisfiable byte range).
    OutOfRange,
    /// The container runtime or another backing system is unreachable.
    Unavailable,
    /// An unexpected internal failure.
    Internal,
    /// The per-call deadline elapsed before the operation completed.
    DeadlineExceeded,
    /// The caller cancelled the request.
    Cancelled,
}

impl ErrorKind {
    /// The HTTP status code this kind renders as.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidArgument | ErrorKind::FailedPrecondition => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists | ErrorKind::Aborted => 409,
            ErrorKind::PreconditionFailed => 412,
            ErrorKind::OutOfRange => 416,
            ErrorKind::Cancelled => 499,
            ErrorKind::Internal => 500,
            ErrorKind::Unavailable => 503,
            ErrorKind::DeadlineExceeded => 504,
        }
    }

    /// The default `reason` token for this kind, used unless a more
    /// specific one is attached at the call site.
    pub fn default_reason(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid",
            ErrorKind::NotFound => "notFound",
            ErrorKind::AlreadyExists => "conflict",
            ErrorKind::PreconditionFailed => "conditionNotMet",
            ErrorKind::Aborted => "aborted",
            ErrorKind::FailedPrecondition => "failedPrecondition",
            ErrorKind::OutOfRange => "requestedRangeNotSatisfiable",
            ErrorKind::Unavailable => "backendError",
            ErrorKind::Internal => "internalError",
            ErrorKind::DeadlineExceeded => "deadlineExceeded",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// A classified service error with a stable reason token.
///
/// Constructors exist per kind; `with_reason` attaches a more specific
/// token (e.g. `subnetOverlap`) and `with_resource` the full resource link
/// the failure is about.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StratusError {
    kind: ErrorKind,
    reason: &'static str,
    message: String,
    resource: Option<String>,
}

impl StratusError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, reason: kind.default_reason(), message: message.into(), resource: None }
    }

    /// Override the machine-readable reason token.
    pub fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }

    /// Attach the resource link the error refers to.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(what: &str, name: impl AsRef<str>) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} '{}' not found", what, name.as_ref()))
    }

    pub fn already_exists(what: &str, name: impl AsRef<str>) -> Self {
        Self::new(ErrorKind::AlreadyExists, format!("{} '{}' already exists", what, name.as_ref()))
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfRange, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(ErrorKind::DeadlineExceeded, "operation deadline exceeded")
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled by the caller")
    }

    /// Whether a bounded retry is worthwhile for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Aborted)
    }
}

impl From<std::io::Error> for StratusError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => {
                StratusError::new(ErrorKind::NotFound, format!("file not found: {err}"))
            }
            _ => StratusError::internal(format!("i/o error: {err}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, StratusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_wire_contract() {
        assert_eq!(ErrorKind::InvalidArgument.http_status(), 400);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::AlreadyExists.http_status(), 409);
        assert_eq!(ErrorKind::Aborted.http_status(), 409);
        assert_eq!(ErrorKind::PreconditionFailed.http_status(), 412);
        assert_eq!(ErrorKind::OutOfRange.http_status(), 416);
        assert_eq!(ErrorKind::Cancelled.http_status(), 499);
    }

    #[test]
    fn reason_override_sticks() {
        let err = StratusError::invalid_argument("subnet 10.0.1.0/24 overlaps")
            .with_reason("subnetOverlap");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.reason(), "subnetOverlap");
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn not_found_names_the_resource() {
        let err = StratusError::not_found("bucket", "demo").with_resource("/storage/v1/b/demo");
        assert_eq!(err.reason(), "notFound");
        assert_eq!(err.resource(), Some("/storage/v1/b/demo"));
        assert_eq!(err.to_string(), "bucket 'demo' not found");
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StratusError = io.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn only_aborted_is_retryable() {
        assert!(StratusError::aborted("etag mismatch").is_retryable());
        assert!(!StratusError::invalid_argument("bad name").is_retryable());
        assert!(!StratusError::unavailable("runtime down").is_retryable());
    }
}
