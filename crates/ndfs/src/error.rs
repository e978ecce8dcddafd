//! Error type shared by every layer of the client.
//!
//! An [`Error`] is a value: an errno-compatible code, a human readable
//! message and an optional lower-level cause. Higher layers add context with
//! [`Error::prepend`], which keeps the original code and cause intact.

use std::{error, fmt, io};

use nix::errno::Errno;

/// Re-exported errno values, e.g. `errno::ENOENT`.
pub mod errno {
    pub use nix::errno::Errno;
    pub use nix::errno::Errno::*;
}

type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Coarse classification of an [`Error`] code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Federated or HA address requested, or an unsupported setting.
    Unsupported,
    /// Malformed path, bad port string, or an invalid target.
    InvalidArgument,
    /// Missing path or directory.
    NotFound,
    /// The path exists with the wrong type, or a directory is not empty.
    AlreadyExists,
    OutOfMemory,
    /// A caller supplied buffer is too small, or a path is too long to send.
    NameTooLong,
    /// Opaque transport or authority failure.
    Internal,
}

impl ErrorKind {
    /// The errno an error of this kind is created with.
    pub fn errno(self) -> Errno {
        match self {
            ErrorKind::Unsupported => Errno::ENOTSUP,
            ErrorKind::InvalidArgument => Errno::EINVAL,
            ErrorKind::NotFound => Errno::ENOENT,
            ErrorKind::AlreadyExists => Errno::EEXIST,
            ErrorKind::OutOfMemory => Errno::ENOMEM,
            ErrorKind::NameTooLong => Errno::ENAMETOOLONG,
            ErrorKind::Internal => Errno::EIO,
        }
    }

    fn from_errno(code: Errno) -> ErrorKind {
        match code {
            Errno::ENOTSUP => ErrorKind::Unsupported,
            Errno::EINVAL => ErrorKind::InvalidArgument,
            Errno::ENOENT | Errno::ENOTDIR => ErrorKind::NotFound,
            Errno::EEXIST | Errno::ENOTEMPTY => ErrorKind::AlreadyExists,
            Errno::ENOMEM => ErrorKind::OutOfMemory,
            Errno::ENAMETOOLONG => ErrorKind::NameTooLong,
            _ => ErrorKind::Internal,
        }
    }
}

pub struct Error {
    code: Errno,
    msg: String,
    cause: Option<BoxError>,
}

impl Error {
    pub fn new(code: Errno, msg: impl Into<String>) -> Error {
        Error {
            code,
            msg: msg.into(),
            cause: None,
        }
    }

    /// Create an error wrapping a lower-level cause.
    pub fn with_cause(code: Errno, msg: impl Into<String>, cause: impl Into<BoxError>) -> Error {
        Error {
            code,
            msg: msg.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn from_kind(kind: ErrorKind, msg: impl Into<String>) -> Error {
        Error::new(kind.errno(), msg)
    }

    /// An opaque failure below this layer, kept as the cause.
    pub fn internal(msg: impl Into<String>, cause: impl Into<BoxError>) -> Error {
        Error::with_cause(Errno::EIO, msg, cause)
    }

    /// Get the errno for this error.
    pub fn errno(&self) -> Errno {
        self.code
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_errno(self.code)
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn cause(&self) -> Option<&(dyn error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Prefix the message with `context`, keeping the code and cause.
    pub fn prepend(self, context: impl fmt::Display) -> Error {
        Error {
            msg: format!("{}: {}", context, self.msg),
            ..self
        }
    }

    /// Like [`prepend`](Self::prepend), replacing the code as well.
    pub fn prepend_with_code(self, code: Errno, context: impl fmt::Display) -> Error {
        Error {
            code,
            ..self.prepend(context)
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = f.debug_struct("Error");
        s.field("code", &self.code).field("msg", &self.msg);
        if let Some(cause) = &self.cause {
            s.field("cause", cause);
        }
        s.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.msg, self.code)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.cause {
            Some(ref e) => Some(e.as_ref()),
            None => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        let code = e
            .raw_os_error()
            .map(Errno::from_raw)
            .unwrap_or(Errno::EIO);
        Error::with_cause(code, e.to_string(), e)
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::new(e, e.desc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_keeps_code_and_cause() {
        let io = io::Error::other("socket closed");
        let err = Error::internal("call failed", io).prepend("delete(/a)");

        assert_eq!(err.errno(), Errno::EIO);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.message(), "delete(/a): call failed");
        assert_eq!(err.cause().unwrap().to_string(), "socket closed");
    }

    #[test]
    fn prepend_with_code_overrides() {
        let err = Error::new(Errno::EINVAL, "foo bar baz 101")
            .prepend_with_code(Errno::EIO, "Turboencabulator error");

        assert_eq!(err.errno(), Errno::EIO);
        assert_eq!(err.message(), "Turboencabulator error: foo bar baz 101");
    }

    #[test]
    fn kinds_round_trip_through_errno() {
        for kind in [
            ErrorKind::Unsupported,
            ErrorKind::InvalidArgument,
            ErrorKind::NotFound,
            ErrorKind::AlreadyExists,
            ErrorKind::OutOfMemory,
            ErrorKind::NameTooLong,
            ErrorKind::Internal,
        ] {
            assert_eq!(Error::from_kind(kind, "x").kind(), kind);
        }
    }

    #[test]
    fn io_error_keeps_os_code() {
        let err = Error::from(io::Error::from_raw_os_error(Errno::ECONNREFUSED as i32));
        assert_eq!(err.errno(), Errno::ECONNREFUSED);
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
