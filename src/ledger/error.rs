use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt sequence counter: {0}")]
    CorruptSequence(String),

    #[error("Buffer config not found: {0}")]
    BufferNotFound(u64),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(u64),

    #[error("Forwarding config not found: {0}")]
    RuleNotFound(u64),

    #[error("Writer lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
