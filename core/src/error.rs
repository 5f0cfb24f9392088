use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("Invalid stream header: {0}")]
    Header(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Cannot decide decompressor for: {extension}")]
    UnknownDecompressor { extension: String },

    #[error("Object not found: {path}")]
    NotFound { path: String },

    #[error("Storage {op} failed for {path}: {source}")]
    Storage {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Close failed: {}", join_errors(.0))]
    Close(Vec<std::io::Error>),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn join_errors(errors: &[std::io::Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Wraps the error so it can travel through `std::io::Read`/`Write`.
    /// `From<std::io::Error>` recovers the original variant on the other side.
    pub fn into_io(self) -> std::io::Error {
        match self {
            Error::Io(e) => e,
            Error::Header(_) => std::io::Error::new(std::io::ErrorKind::InvalidData, self),
            Error::Decryption(_) => std::io::Error::new(std::io::ErrorKind::InvalidData, self),
            Error::NotFound { .. } => std::io::Error::new(std::io::ErrorKind::NotFound, self),
            other => std::io::Error::other(other),
        }
    }

    /// Wraps an I/O failure with the operation and path it happened on, unless it is
    /// already one of ours travelling through a stream.
    pub fn storage(op: &'static str, path: impl Into<String>, err: std::io::Error) -> Self {
        match Error::from(err) {
            Error::Io(source) => Error::Storage {
                op,
                path: path.into(),
                source,
            },
            typed => typed,
        }
    }

    /// An equivalent error, for reporting a cached failure again.
    pub fn replay(&self) -> Error {
        fn io(e: &std::io::Error) -> std::io::Error {
            std::io::Error::new(e.kind(), e.to_string())
        }

        match self {
            Error::Io(e) => Error::Io(io(e)),
            Error::Header(msg) => Error::Header(msg.clone()),
            Error::Decryption(msg) => Error::Decryption(msg.clone()),
            Error::Encryption(msg) => Error::Encryption(msg.clone()),
            Error::KeyDerivation(msg) => Error::KeyDerivation(msg.clone()),
            Error::UnknownDecompressor { extension } => Error::UnknownDecompressor {
                extension: extension.clone(),
            },
            Error::NotFound { path } => Error::NotFound { path: path.clone() },
            Error::Storage { op, path, source } => Error::Storage {
                op: *op,
                path: path.clone(),
                source: io(source),
            },
            Error::Close(errors) => Error::Close(errors.iter().map(io).collect()),
            Error::Task(msg) => Error::Task(msg.clone()),
            Error::Config(msg) => Error::Config(msg.clone()),
            Error::Other(msg) => Error::Other(msg.clone()),
        }
    }

    pub fn is_decryption(&self) -> bool {
        matches!(self, Error::Decryption(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(typed) = inner.downcast::<Error>() {
                    return *typed;
                }
            }
            return Error::Other("unreadable wrapped error".to_string());
        }
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_error_survives_io_boundary() {
        let io_err = Error::Decryption("tampering or corruption detected".to_string()).into_io();
        assert_eq!(io_err.kind(), std::io::ErrorKind::InvalidData);

        let back = Error::from(io_err);
        assert!(back.is_decryption());
    }

    #[test]
    fn test_replay_keeps_variant_and_kind() {
        let header = Error::Header("invalid file header".into());
        assert!(matches!(header.replay(), Error::Header(msg) if msg == "invalid file header"));

        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "net down"));
        match io.replay() {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_plain_io_error_stays_io() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_storage_annotation() {
        let err = Error::storage(
            "write",
            "data/a.gz",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let message = err.to_string();
        assert!(message.contains("write"));
        assert!(message.contains("data/a.gz"));

        let passthrough = Error::storage("write", "data/a.gz", Error::Header("bad".into()).into_io());
        assert!(matches!(passthrough, Error::Header(_)));
    }

    #[test]
    fn test_close_errors_are_joined() {
        let err = Error::Close(vec![
            std::io::Error::other("first"),
            std::io::Error::other("second"),
        ]);
        assert_eq!(err.to_string(), "Close failed: first; second");
    }
}
