use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// A key was referenced that no descriptor declares.
    #[error("unknown datatype: {0}")]
    UnknownDatatype(String),
    /// A record arrived without the time key.
    #[error("record has no `{0}` value")]
    MissingTimestamp(String),
    #[error("corrupt data: {0}")]
    Corrupt(String),
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
    #[error("invalid descriptor `{key}`: {reason}")]
    InvalidDescriptor { key: String, reason: String },
    #[error("type mismatch for `{name}`: expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("derived quantity recalculation failed: {0}")]
    Derived(String),
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }

    pub(crate) fn invalid_descriptor(key: &str, reason: impl Into<String>) -> Self {
        Error::InvalidDescriptor {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
