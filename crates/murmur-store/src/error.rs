use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The platform reports no home/data directory for the default path.
    #[error("no data directory available for the chat database")]
    NoDataDir,

    #[error("cannot prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such record")]
    NotFound,

    #[error("schema migration to v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// The request breaks a rule of the chat model (empty group name,
    /// self-conversation, reply across conversations...).
    #[error("{0}")]
    Invalid(String),

    #[error("database lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;
