use std::fmt;

/// Framing-layer failures: violations of the wire format itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A declared message length was below the minimum of 4 (the length
    /// field includes its own four bytes).
    InvalidDeclaredLength(u32),
    /// A message exceeded `max_message_bytes` during the handshake.
    MessageTooLarge { declared: usize, max: usize },
    /// The client's initial bytes weren't the expected SSLRequest frame.
    UnexpectedSslRequest,
    /// StartupMessage carried a protocol version other than 196608.
    UnsupportedProtocolVersion(u32),
    /// Expected one message tag, got another.
    UnexpectedTag { expected: u8, found: u8 },
    /// StartupMessage was missing a required key (`user` or `database`).
    MissingStartupField(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidDeclaredLength(len) => {
                write!(f, "declared message length {len} is smaller than the 4-byte length field itself")
            }
            ProtocolError::MessageTooLarge { declared, max } => {
                write!(f, "message of {declared} bytes exceeds the {max} byte cap")
            }
            ProtocolError::UnexpectedSslRequest => {
                write!(f, "expected the SSLRequest frame as the first bytes on the wire")
            }
            ProtocolError::UnsupportedProtocolVersion(v) => {
                write!(f, "unsupported protocol version {v}")
            }
            ProtocolError::UnexpectedTag { expected, found } => {
                write!(
                    f,
                    "expected message tag '{}', found '{}'",
                    *expected as char, *found as char
                )
            }
            ProtocolError::MissingStartupField(field) => {
                write!(f, "StartupMessage is missing required field '{field}'")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// JWT verification failed, or the token's `sub` didn't match the claimed
/// database user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownstreamAuthenticationError {
    MalformedToken,
    InvalidSignature,
    SubjectMismatch,
}

impl fmt::Display for DownstreamAuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownstreamAuthenticationError::MalformedToken => write!(f, "malformed JWT"),
            DownstreamAuthenticationError::InvalidSignature => write!(f, "invalid JWT signature"),
            DownstreamAuthenticationError::SubjectMismatch => {
                write!(f, "JWT subject does not match the claimed database user")
            }
        }
    }
}

impl std::error::Error for DownstreamAuthenticationError {}

/// Top level error type threaded through the proxy.
#[derive(Debug)]
pub enum ProxyError {
    Protocol(ProtocolError),
    DownstreamAuthentication(DownstreamAuthenticationError),
    ConnectionClosed,
    Tls(String),
    Io(std::io::Error),
    Config(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Protocol(e) => write!(f, "protocol error: {e}"),
            ProxyError::DownstreamAuthentication(e) => write!(f, "authentication failed: {e}"),
            ProxyError::ConnectionClosed => write!(f, "connection closed"),
            ProxyError::Tls(msg) => write!(f, "TLS error: {msg}"),
            ProxyError::Io(e) => write!(f, "I/O error: {e}"),
            ProxyError::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Protocol(e) => Some(e),
            ProxyError::DownstreamAuthentication(e) => Some(e),
            ProxyError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ProxyError {
    fn from(e: ProtocolError) -> Self {
        ProxyError::Protocol(e)
    }
}

impl From<DownstreamAuthenticationError> for ProxyError {
    fn from(e: DownstreamAuthenticationError) -> Self {
        ProxyError::DownstreamAuthentication(e)
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProxyError::ConnectionClosed
        } else {
            ProxyError::Io(e)
        }
    }
}
