use std::fmt;

/// The crate-wide error type.
///
/// `Syntax` and `Command` are user-input errors: the shell reports them
/// and keeps running. `Storage` is the fatal invariant/I/O bucket from
/// the on-disk engine (corrupt file, out-of-bounds page, a read/write/
/// seek failure, an internal node reached with zero keys) — the shell
/// prints it and terminates the process.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Storage(String),
    Syntax(String),
    Command(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "{}", e),
            Error::Storage(msg) => write!(f, "{}", msg),
            Error::Syntax(msg) => write!(f, "{}", msg),
            Error::Command(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl Error {
    /// Fatal errors are the ones that terminate the process: I/O failures
    /// and internal invariant violations. Syntax/command errors are
    /// reported by the shell and do not propagate past a single statement.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Storage(_))
    }
}

/// Build an `Error` variant with a formatted message, logging it at
/// `error` level first. Used throughout `storage` for the many
/// bounds/decode checks the node and pager codecs perform.
#[macro_export]
macro_rules! err {
    ($variant:ident, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        tracing::error!("{}", msg);
        $crate::errors::Error::$variant(msg)
    }};
}
