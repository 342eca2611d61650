//! Error taxonomy for resource store operations.

use std::fmt;

use thiserror::Error;

use crate::types::Status;

/// Result type alias for resource store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// What went wrong, independent of the resource kind involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Unauthorized,
    Forbidden,
    /// The request was malformed or rejected by validation (400/422).
    Invalid,
    /// A watch asked for a resourceVersion the store no longer has (410).
    Expired,
    ServerError,
    NetworkError,
    /// The response body did not match the expected resource shape.
    Decode,
}

impl ErrorKind {
    /// Classify an HTTP status code.
    pub fn from_status(code: u16) -> Self {
        match code {
            400 | 422 => ErrorKind::Invalid,
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            410 => ErrorKind::Expired,
            _ => ErrorKind::ServerError,
        }
    }

    /// Errors a long-running loop should back off and retry on.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::ServerError | ErrorKind::NetworkError | ErrorKind::Expired
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Expired => "expired",
            ErrorKind::ServerError => "server error",
            ErrorKind::NetworkError => "network error",
            ErrorKind::Decode => "decode error",
        };
        f.write_str(s)
    }
}

/// A failed store operation.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: ErrorKind,
    /// HTTP status, when the error came from a response.
    pub status: Option<u16>,
    /// Structured status body, when the server sent one.
    pub body: Option<Status>,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            body: None,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }

    /// Build an error from a non-2xx response.
    pub fn from_response(code: u16, body: &[u8]) -> Self {
        let status: Option<Status> = serde_json::from_slice(body).ok();
        let message = status
            .as_ref()
            .and_then(|s| s.message.clone())
            .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
        Self {
            kind: ErrorKind::from_status(code),
            status: Some(code),
            body: status,
            message,
        }
    }

    /// Build an error from a status object embedded in a watch stream.
    pub fn from_status_object(status: Status) -> Self {
        let code = status.code.unwrap_or(500);
        Self {
            kind: ErrorKind::from_status(code),
            status: Some(code),
            message: status.message.clone().unwrap_or_default(),
            body: Some(status),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl From<crate::selector::SelectorError> for StoreError {
    fn from(e: crate::selector::SelectorError) -> Self {
        StoreError::invalid(e.to_string())
    }
}

/// Treat `NotFound` as an ordinary, empty outcome.
pub trait StoreResultExt<T> {
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert_eq!(ErrorKind::from_status(404), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_status(409), ErrorKind::Conflict);
        assert_eq!(ErrorKind::from_status(403), ErrorKind::Forbidden);
        assert_eq!(ErrorKind::from_status(410), ErrorKind::Expired);
        assert_eq!(ErrorKind::from_status(422), ErrorKind::Invalid);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::ServerError);
    }

    #[test]
    fn from_response_keeps_structured_body() {
        let body = br#"{"kind":"Status","status":"Failure","message":"secrets \"ssh-host-keys\" already exists","reason":"AlreadyExists","code":409}"#;
        let err = StoreError::from_response(409, body);
        assert!(err.is_conflict());
        assert_eq!(err.status, Some(409));
        assert_eq!(err.body.as_ref().and_then(|s| s.reason.as_deref()), Some("AlreadyExists"));
        assert!(err.message.contains("already exists"));
    }

    #[test]
    fn from_response_falls_back_to_text() {
        let err = StoreError::from_response(502, b"bad gateway\n");
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert!(err.body.is_none());
        assert_eq!(err.message, "bad gateway");
    }

    #[test]
    fn optional_swallows_only_not_found() {
        let missing: StoreResult<u32> = Err(StoreError::not_found("gone"));
        assert_eq!(missing.optional().unwrap(), None);

        let present: StoreResult<u32> = Ok(7);
        assert_eq!(present.optional().unwrap(), Some(7));

        let conflict: StoreResult<u32> = Err(StoreError::conflict("taken"));
        assert!(conflict.optional().unwrap_err().is_conflict());
    }
}
