use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for the cue engine. Nothing here is fatal to the
/// process: every variant degrades to "this one operation did not happen".
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid {field}: {value:?}")]
    Validation { field: &'static str, value: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("cue {number} already exists")]
    Conflict { number: u32 },

    #[error("playback is paused")]
    BlockedWhilePaused,

    #[error("no show folder is open")]
    NoShowFolder,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("corrupt cue record {}: {source}", .path.display())]
    CorruptRecord {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
