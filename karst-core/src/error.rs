use thiserror::Error;

pub type Result<T> = std::result::Result<T, KarstError>;

#[derive(Error, Debug)]
pub enum KarstError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("duplicate content: {0}")]
    DuplicateContent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("chunk size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("seal error: {0}")]
    Seal(String),

    #[error("seal rejected with status {status}: {detail}")]
    SealRejected { status: u16, detail: String },

    #[error("malformed seal response: {0}")]
    MalformedSealResponse(String),

    #[error("storage market error: {0}")]
    Market(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification of a [`KarstError`]. Each boundary (wire protocol,
/// command line) decides how to project a kind onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    DuplicateContent,
    Storage,
    Seal,
    SealRejected,
    MalformedSealResponse,
    Protocol,
    NotFound,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Input | ErrorKind::Protocol => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::DuplicateContent => 409,
            ErrorKind::Storage => 500,
            ErrorKind::Seal | ErrorKind::SealRejected | ErrorKind::MalformedSealResponse => 502,
        }
    }
}

impl KarstError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KarstError::Input(_) | KarstError::Config(_) => ErrorKind::Input,
            KarstError::DuplicateContent(_) => ErrorKind::DuplicateContent,
            KarstError::Io(_)
            | KarstError::Database(_)
            | KarstError::Serialization(_)
            | KarstError::Storage(_)
            | KarstError::SizeMismatch { .. } => ErrorKind::Storage,
            KarstError::Seal(_) | KarstError::Market(_) => ErrorKind::Seal,
            KarstError::SealRejected { .. } => ErrorKind::SealRejected,
            KarstError::MalformedSealResponse(_) => ErrorKind::MalformedSealResponse,
            KarstError::Protocol(_) => ErrorKind::Protocol,
            KarstError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for KarstError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        KarstError::Seal(err.to_string())
    }
}

impl From<reqwest::Error> for KarstError {
    fn from(err: reqwest::Error) -> Self {
        KarstError::Seal(err.to_string())
    }
}
