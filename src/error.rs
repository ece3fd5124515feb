use std::{self, fmt, result};

/// Short form to compose Error values.
///
/// Here are few possible ways:
///
/// ```ignore
/// err!(InvalidInput, desc: "invalid ttl {}", ttl);
/// ```
///
/// ```ignore
/// err!(IOError, try: fs::read(loc), "reading config from {:?}", loc);
/// ```
///
/// ```ignore
/// err!(IOError, cause: err, "opening recorder {:?}", name);
/// ```
#[macro_export]
macro_rules! err {
    ($v:ident, try: $res:expr, $($arg:expr),+) => {{
        match $res {
            Ok(val) => Ok(val),
            Err(err) => {
                let kind = ErrorKind::$v;
                let description = format!($($arg),+);
                let e = Error {
                    kind,
                    description,
                    cause: Some(Box::new(err)),
                };

                log_error!(e);
                Err(e)
            }
        }
    }};
    ($v:ident, cause: $cause:expr, $($arg:expr),+) => {{
        let kind = ErrorKind::$v;
        let description = format!($($arg),+);
        let e = Error {
            kind,
            description,
            cause: Some(Box::new($cause)),
        };

        log_error!(e);
        Err(e)
    }};
    ($v:ident, desc: $($arg:expr),+) => {{
        let kind = ErrorKind::$v;
        let description = format!($($arg),+);
        let e = Error { kind, description, cause: None };

        log_error!(e);
        Err(e)
    }};
}

#[macro_export]
macro_rules! log_error {
    ($e:ident) => {{
        use log::error;

        error!("{}: {}", $e.kind, $e.description);
    }};
}

/// Error that is part of [Result](crate::Result) type.
pub struct Error {
    pub(crate) kind: ErrorKind,
    pub(crate) description: String,
    pub(crate) cause: Option<Box<dyn std::error::Error>>,
}

impl Default for Error {
    fn default() -> Error {
        Error {
            kind: ErrorKind::InvalidInput,
            description: String::default(),
            cause: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.description)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "<{},{}>", self.kind, self.description)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|b| b.as_ref())
    }
}

impl Error {
    /// Return the error kind, caller should know how to handle it.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Error kind expected to be handled by calling functions.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Handshake or path bookkeeping request that contradicts current state.
    ProtocolViolation,
    /// Caller supplied argument is not usable, like a nil peer handle.
    InvalidArgument,
    /// Stream ack-open failed, the outbound path is torn down abruptly.
    InvalidStreamState,
    /// Peer died or became unreachable before/after the handshake.
    PeerUnavailable,
    /// User asked to unpeer from a handle that is not connected.
    NoSuchPeer,
    /// Store lookup miss.
    NoSuchKey,
    /// Channel or pipe to a collaborator has gone away.
    Disconnected,
    IOError,
    InvalidInput,
    IPCFail,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use ErrorKind::*;

        match self {
            ProtocolViolation => write!(f, "ProtocolViolation"),
            InvalidArgument => write!(f, "InvalidArgument"),
            InvalidStreamState => write!(f, "InvalidStreamState"),
            PeerUnavailable => write!(f, "PeerUnavailable"),
            NoSuchPeer => write!(f, "NoSuchPeer"),
            NoSuchKey => write!(f, "NoSuchKey"),
            Disconnected => write!(f, "Disconnected"),
            IOError => write!(f, "IOError"),
            InvalidInput => write!(f, "InvalidInput"),
            IPCFail => write!(f, "IPCFail"),
        }
    }
}
