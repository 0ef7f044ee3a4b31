//! Procedural terrain and clipmap streaming for Geoclip.
//!
//! The [`ClipmapStreamingEngine`] tracks one toroidal texture per clipmap
//! level. Each frame the camera position turns into a desired origin per
//! level; levels that moved get a job, and draining a job makes the needed
//! tiles resident, rewrites only the texels that scrolled in and hands them
//! to a [`ClipmapUploader`].

pub mod engine;
pub mod error;
pub mod generation;
pub mod populate;
pub mod queue;
pub mod tracker;
pub mod upload;
pub mod visible;
pub mod worker;

pub use engine::{ClipmapStreamingEngine, DrainReport, JobOutcome, LevelSnapshot, StreamingStats};
pub use error::{Result, StreamingError};
pub use generation::{AttributeImages, TerrainConfig, TerrainGenerator};
pub use populate::{populate_attribute, populate_level, LevelTexture, LevelTextures};
pub use queue::{PendingFlag, StreamingJob, StreamingJobQueue};
pub use tracker::{
    desired_origin, FullRefreshReason, LevelOriginTracker, LevelUpdatePlan, TexelOffset, UpdateKind,
};
pub use upload::{
    ClipmapUploader, DispatchSize, InjectedUploadError, LevelUpload, RecordingUploader,
    RegionUpload, UploadPushConstants, UploadRecord,
};
pub use visible::{collect_visible_tiles, VisibleTiles};
pub use worker::StreamingWorker;

/// World seed for procedural generation.
pub type WorldSeed = u64;
