use std::fmt;

macro_rules! bail {
    ($err:expr $(,)?) => {
        return Err(Into::into($err))
    };
}
pub(crate) use bail;

/// Alias of `Result` with the crate error type as the default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised from inode bookkeeping, scanning, or ordering.
///
/// All errors are fatal to the ordering run. Nothing is retried at this
/// layer; either the full ordering completes with every inode numbered, or
/// the operation fails.
pub struct Error(Box<ErrorInner>);

#[derive(Debug)]
pub(crate) enum ErrorInner {
    /// An operation requires a file-bearing inode.
    NoFile,
    /// `set_files` was called twice on the same inode.
    AlreadySet,
    /// Script ordering was requested but the script declines to order.
    InvalidRequest(&'static str),
    /// A postcondition failed. Indicates a bug, fail hard.
    Internal(&'static str),

    Io(std::io::Error),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ErrorInner::NoFile => f.pad("inode has no file"),
            ErrorInner::AlreadySet => f.pad("files already set for inode"),
            ErrorInner::InvalidRequest(msg) => write!(f, "{msg}"),
            ErrorInner::Internal(msg) => write!(f, "internal error: {msg}"),
            ErrorInner::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &*self.0 {
            ErrorInner::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ErrorInner> for Error {
    #[cold]
    fn from(err: ErrorInner) -> Self {
        Self(Box::new(err))
    }
}

impl From<std::io::Error> for Error {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        Self(Box::new(ErrorInner::Io(err)))
    }
}
