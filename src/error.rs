//! Error taxonomy. mostly copy/paste of the shape from `xitca-postgres`'s `error.rs`:
//! a boxed trait object core with small marker types carrying the actual detail,
//! rather than a single enum.

use core::fmt;
use std::{collections::HashMap, error, io};

/// Crate-wide error type. Wraps the actual cause behind a boxed trait object so new
/// error kinds can be added without breaking the public API shape.
pub struct Error(Box<dyn error::Error + Send + Sync>);

impl Error {
    fn new<E>(e: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        Self(Box::new(e))
    }

    /// A transport-level error on the WebSocket connection (or a protocol violation on
    /// it) is fatal: every in-flight statement on that connection must be aborted and
    /// the connection treated as unusable afterwards.
    pub fn is_fatal(&self) -> bool {
        self.0.is::<WebSocketError>() || self.0.is::<ProtocolError>()
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::new(ValidationError(msg.into()))
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::new(ProtocolError(msg.into()))
    }

    pub(crate) fn db(code: String, message: String, details: HashMap<String, String>) -> Self {
        Self::new(DatabaseError { code, message, details })
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0.source()
    }
}

/// Caller-side misuse: unsupported parameter shape, bad connection string, empty
/// credentials.
#[derive(Debug)]
pub struct ValidationError(pub(crate) String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation error: {}", self.0)
    }
}

impl error::Error for ValidationError {}

impl From<&str> for ValidationError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ValidationError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Self(Box::new(e))
    }
}

/// HTTP transport failure: a non-2xx status, or a null/unreadable response body.
#[derive(Debug)]
pub struct HttpResponseError {
    pub status: u16,
    pub message: String,
}

impl fmt::Display for HttpResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http response error ({}): {}", self.status, self.message)
    }
}

impl error::Error for HttpResponseError {}

impl From<HttpResponseError> for Error {
    fn from(e: HttpResponseError) -> Self {
        Self(Box::new(e))
    }
}

/// WebSocket transport failure: `onerror`, `onclose` with a non-normal code, or a send
/// failure. Always fatal to the connection (see [`Error::is_fatal`]).
#[derive(Debug)]
pub struct WebSocketError {
    pub message: String,
    pub code: Option<u16>,
    pub reason: Option<String>,
}

impl fmt::Display for WebSocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "websocket error: {}", self.message)?;
        if let Some(code) = self.code {
            write!(f, " (code {code})")?;
        }
        if let Some(ref reason) = self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

impl error::Error for WebSocketError {}

impl From<WebSocketError> for Error {
    fn from(e: WebSocketError) -> Self {
        Self(Box::new(e))
    }
}

/// A server-reported SQL error. `code` is the SQLSTATE; `details` excludes `code` and
/// `message` to avoid duplicating them.
#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub code: String,
    pub message: String,
    pub details: HashMap<String, String>,
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "database error {}: {}", self.code, self.message)
    }
}

impl error::Error for DatabaseError {}

impl From<DatabaseError> for Error {
    fn from(e: DatabaseError) -> Self {
        Self(Box::new(e))
    }
}

/// Unexpected frame ordering, missing required fields, a binary message on the
/// WebSocket read path, or a malformed `exec` row. Reported under the relevant
/// transport category per the spec, but always fatal on the WebSocket transport.
#[derive(Debug)]
pub struct ProtocolError(String);

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error: {}", self.0)
    }
}

impl error::Error for ProtocolError {}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self(Box::new(e))
    }
}

impl From<&str> for ProtocolError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProtocolError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self(Box::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e)
    }
}

impl From<xitca_client::error::Error> for Error {
    fn from(e: xitca_client::error::Error) -> Self {
        Self::new(e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fatal_classification() {
        let e: Error = WebSocketError {
            message: "boom".into(),
            code: Some(1002),
            reason: None,
        }
        .into();
        assert!(e.is_fatal());

        let e: Error = ValidationError("bad shape".into()).into();
        assert!(!e.is_fatal());
    }

    #[test]
    fn display_formats() {
        let e: Error = HttpResponseError {
            status: 500,
            message: "oops".into(),
        }
        .into();
        assert_eq!(e.to_string(), "http response error (500): oops");
    }
}
