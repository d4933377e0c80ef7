use std::fmt;

use thiserror::Error;

/// Errors that can occur when sending requests to Azure Storage.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The service answered with a non-success status.
    ///
    /// Only produced by the operation layer; the pipeline itself hands
    /// non-2xx responses back as responses.
    #[error("HTTP error: {status} ({code}) - {message}")]
    Http {
        status: u16,
        code: String,
        message: String,
    },

    /// The request never produced a response.
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// A response body could not be read or parsed.
    #[error("Parse error: {message}")]
    Parse {
        message: String,
        /// The body ended before it was complete, typically because the
        /// service timed out mid-stream.
        incomplete: bool,
    },

    /// The operation was aborted through its [`AbortSignal`](crate::abort::AbortSignal).
    #[error("The operation was aborted.")]
    Cancelled,

    /// Token acquisition failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The endpoint URL is invalid.
    #[error("Invalid endpoint URL: {message}")]
    InvalidEndpoint {
        message: String,
        #[source]
        source: Option<url::ParseError>,
    },

    /// The shared key is not valid base64.
    #[error("Invalid account key: {0}")]
    InvalidAccountKey(String),

    /// A header name or value was rejected.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// A policy was positioned relative to a policy that is not in the pipeline.
    #[error("No policy named '{0}' in the pipeline")]
    InvalidPolicyPosition(String),

    /// A required configuration value is missing.
    #[error("Missing configuration: {0}")]
    MissingConfig(String),
}

impl StorageError {
    /// Create an HTTP error from a status and an error code.
    pub fn http(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a transport error of the given kind.
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Create an endpoint error carrying the URL parse failure.
    pub fn invalid_endpoint_with_source(message: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidEndpoint {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an endpoint error without an underlying parse failure.
    pub fn invalid_endpoint(message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            message: message.into(),
            source: None,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error was raised while configuring a client or pipeline.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidEndpoint { .. }
                | Self::InvalidAccountKey(_)
                | Self::InvalidPolicyPosition(_)
                | Self::MissingConfig(_)
        )
    }
}

/// Structured category of a transport failure.
///
/// The retry policy decides on these categories instead of inspecting
/// error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection or the request timed out.
    Timeout,
    /// The peer reset the connection.
    ConnectionReset,
    /// The peer refused the connection.
    ConnectionRefused,
    /// The host name could not be resolved.
    Dns,
    /// A connection could not be established for another reason, including
    /// resolver failures the transport does not report separately.
    Connect,
    /// The connection broke while writing.
    BrokenPipe,
    /// The request could not be sent.
    Send,
    /// Anything else, such as a malformed request.
    Other,
}

impl TransportErrorKind {
    /// Whether a failure of this kind is worth another attempt.
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection reset",
            Self::ConnectionRefused => "connection refused",
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::BrokenPipe => "broken pipe",
            Self::Send => "send",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
