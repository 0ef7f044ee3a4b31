//! Streaming engine errors.

use geoclip_tile::TileError;
use thiserror::Error;

/// Errors raised by the clipmap streaming engine.
#[derive(Error, Debug)]
pub enum StreamingError {
    /// Clipmap configuration rejected.
    #[error(transparent)]
    Config(#[from] geoclip_core::Error),

    /// Attribute source construction failed.
    #[error(transparent)]
    Tile(#[from] TileError),

    /// Level index outside the configured level count.
    #[error("level {level} out of range (level count {level_count})")]
    LevelOutOfRange { level: usize, level_count: usize },

    /// The GPU side rejected a level upload.
    #[error("upload of level {level} failed")]
    Upload {
        level: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Worker thread could not be started.
    #[error("failed to spawn streaming worker")]
    WorkerSpawn(#[source] std::io::Error),

    /// Worker thread panicked.
    #[error("streaming worker panicked")]
    WorkerPanicked,
}

impl StreamingError {
    /// True for failures that only affect the current drain.
    pub const fn is_upload_failure(&self) -> bool {
        matches!(self, Self::Upload { .. })
    }
}

/// Result type alias for streaming operations.
pub type Result<T> = std::result::Result<T, StreamingError>;
