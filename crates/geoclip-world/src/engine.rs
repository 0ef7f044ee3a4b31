//! The clipmap streaming engine.
//!
//! Owns one [`AttributeSource`] per attribute and one level state per
//! clipmap level. Every method takes `&self`, so the engine can be shared
//! through an `Arc` between a frame driver that enqueues jobs and a worker
//! that drains them.
//!
//! Lock order: the queue lock is released before a level lock is taken; a
//! job holds its level lock for the whole populate and upload, and takes the
//! attribute locks one at a time underneath it. The camera lock is a leaf.

use std::sync::atomic::{AtomicU64, Ordering};

use geoclip_core::{Attribute, AttributeConfig, ClipmapConfig, SampleCoord};
use geoclip_tile::{AttributeImage, AttributeSource, CacheStats};
use glam::Vec2;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, StreamingError};
use crate::generation::{AttributeImages, TerrainGenerator};
use crate::populate::{populate_level, LevelTexture, LevelTextures};
use crate::queue::{PendingFlag, StreamingJob, StreamingJobQueue};
use crate::tracker::{desired_origin, LevelOriginTracker, TexelOffset, UpdateKind};
use crate::upload::{ClipmapUploader, LevelUpload};
use crate::visible::collect_visible_tiles;

/// Mutable state of one clipmap level, guarded by the level lock.
struct ClipmapLevel {
    tracker: LevelOriginTracker,
    world_origin: Vec2,
    textures: LevelTextures,
}

struct LevelSlot {
    state: Mutex<ClipmapLevel>,
    pending: PendingFlag,
}

#[derive(Clone, Copy, Debug, Default)]
struct CameraState {
    sample: SampleCoord,
    frame: u64,
}

#[derive(Default)]
struct StatsCounters {
    jobs_enqueued: AtomicU64,
    jobs_run: AtomicU64,
    full_refreshes: AtomicU64,
    incremental_updates: AtomicU64,
    unchanged: AtomicU64,
    retargeted: AtomicU64,
    texels_written: AtomicU64,
    bytes_uploaded: AtomicU64,
    upload_failures: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Point-in-time statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamingStats {
    pub jobs_enqueued: u64,
    pub jobs_run: u64,
    pub full_refreshes: u64,
    pub incremental_updates: u64,
    /// Jobs whose level was already at the desired origin when drained.
    pub unchanged: u64,
    /// Jobs whose camera moved to a different origin between enqueue and drain.
    pub retargeted: u64,
    pub texels_written: u64,
    pub bytes_uploaded: u64,
    pub upload_failures: u64,
    pub tiles_synthesized: u64,
    pub cache_hits: u64,
    pub evictions: u64,
    pub resident_tiles: usize,
}

/// Public view of one level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelSnapshot {
    pub level: usize,
    pub spacing: i64,
    pub origin: Option<SampleCoord>,
    pub world_origin: Vec2,
    pub offset: TexelOffset,
    pub pending: bool,
}

impl LevelSnapshot {
    pub const fn is_initialized(&self) -> bool {
        self.origin.is_some()
    }
}

/// What one drained job did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobOutcome {
    pub level: usize,
    pub origin: SampleCoord,
    pub kind: UpdateKind,
    pub texels_written: u64,
    pub tiles_synthesized: usize,
}

/// Jobs completed by one drain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub outcomes: Vec<JobOutcome>,
}

impl DrainReport {
    pub fn jobs(&self) -> usize {
        self.outcomes.len()
    }

    pub fn texels_written(&self) -> u64 {
        self.outcomes.iter().map(|outcome| outcome.texels_written).sum()
    }

    pub fn full_refreshes(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.kind, UpdateKind::Full(_)))
            .count()
    }
}

/// Clipmap streaming engine.
pub struct ClipmapStreamingEngine {
    config: ClipmapConfig,
    levels: Vec<LevelSlot>,
    sources: [Mutex<AttributeSource>; 3],
    queue: StreamingJobQueue,
    camera: Mutex<CameraState>,
    counters: StatsCounters,
}

impl ClipmapStreamingEngine {
    /// Create an engine over pre-built attribute images.
    pub fn new(config: ClipmapConfig, images: AttributeImages) -> Result<Self> {
        config.validate()?;

        let [height, diffuse, normal] = images.into_array();
        let sources = [
            Mutex::new(make_source(&config, Attribute::Height, height)?),
            Mutex::new(make_source(&config, Attribute::Diffuse, diffuse)?),
            Mutex::new(make_source(&config, Attribute::Normal, normal)?),
        ];

        let texture_size = config.texture_size();
        let levels = (0..config.level_count)
            .map(|level| LevelSlot {
                state: Mutex::new(ClipmapLevel {
                    tracker: LevelOriginTracker::new(level, texture_size),
                    world_origin: Vec2::ZERO,
                    textures: LevelTextures::new(texture_size),
                }),
                pending: PendingFlag::new(),
            })
            .collect();

        info!(
            levels = config.level_count,
            grid_size = config.grid_size,
            texture_size,
            "Created clipmap streaming engine"
        );

        Ok(Self {
            config,
            levels,
            sources,
            queue: StreamingJobQueue::new(),
            camera: Mutex::new(CameraState::default()),
            counters: StatsCounters::default(),
        })
    }

    /// Create an engine with procedurally generated images.
    pub fn with_terrain(config: ClipmapConfig, generator: &TerrainGenerator) -> Result<Self> {
        config.validate()?;
        let images = generator.generate_images(&config)?;
        Self::new(config, images)
    }

    #[inline]
    pub const fn config(&self) -> &ClipmapConfig {
        &self.config
    }

    #[inline]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Camera position in level-0 samples as last set.
    pub fn camera_sample(&self) -> SampleCoord {
        self.camera.lock().sample
    }

    /// Frame counter, advanced by every [`request_update`](Self::request_update).
    pub fn frame(&self) -> u64 {
        self.camera.lock().frame
    }

    /// Origin `level` should have for the current camera.
    pub fn desired_origin(&self, level: usize) -> SampleCoord {
        desired_origin(self.camera_sample(), level, self.config.texture_size())
    }

    /// Move the camera and enqueue a job for every level whose resident
    /// origin differs from its desired one. Levels with a job already
    /// queued or running are skipped.
    ///
    /// Returns the number of jobs enqueued.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn request_update(&self, camera: SampleCoord) -> usize {
        {
            let mut state = self.camera.lock();
            state.sample = camera;
            state.frame += 1;
        }

        let texture_size = self.config.texture_size();
        let mut enqueued = 0;
        for (level, slot) in self.levels.iter().enumerate() {
            let desired = desired_origin(camera, level, texture_size);
            let state = slot.state.lock();
            if state.tracker.origin() == Some(desired) {
                continue;
            }
            if slot.pending.try_claim() {
                self.queue.push(StreamingJob {
                    level,
                    desired_origin: desired,
                });
                enqueued += 1;
            }
            drop(state);
        }
        StatsCounters::bump(&self.counters.jobs_enqueued, enqueued as u64);
        if enqueued > 0 {
            trace!(enqueued, x = camera.x, y = camera.y, "Enqueued streaming jobs");
        }
        enqueued
    }

    /// Enqueue a job for one level regardless of its origin.
    ///
    /// Returns `false` when the level already has a job pending.
    pub fn request_level(&self, level: usize) -> Result<bool> {
        let slot = self.slot(level)?;
        let _state = slot.state.lock();
        if !slot.pending.try_claim() {
            return Ok(false);
        }
        self.queue.push(StreamingJob {
            level,
            desired_origin: self.desired_origin(level),
        });
        StatsCounters::bump(&self.counters.jobs_enqueued, 1);
        Ok(true)
    }

    /// Run every queued job.
    ///
    /// On an upload failure the failing level's pending flag is cleared, its
    /// tracker is reset so the next job rewrites it in full, and the error is
    /// returned. Jobs still queued stay queued.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn drain<U: ClipmapUploader + ?Sized>(&self, uploader: &mut U) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        while let Some(job) = self.queue.pop() {
            report.outcomes.push(self.run_job(job, uploader)?);
        }
        Ok(report)
    }

    /// Enqueue and drain in one call; the per-frame entry point.
    pub fn update<U: ClipmapUploader + ?Sized>(&self, camera: SampleCoord, uploader: &mut U) -> Result<DrainReport> {
        self.request_update(camera);
        self.drain(uploader)
    }

    /// Number of queued jobs.
    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    pub fn level_snapshot(&self, level: usize) -> Result<LevelSnapshot> {
        let slot = self.slot(level)?;
        let state = slot.state.lock();
        Ok(LevelSnapshot {
            level,
            spacing: state.tracker.spacing(),
            origin: state.tracker.origin(),
            world_origin: state.world_origin,
            offset: state.tracker.offset(),
            pending: slot.pending.is_set(),
        })
    }

    /// Snapshots of every level, finest first.
    pub fn level_snapshots(&self) -> Vec<LevelSnapshot> {
        (0..self.levels.len())
            .filter_map(|level| self.level_snapshot(level).ok())
            .collect()
    }

    /// Read a level's CPU texture under its lock.
    pub fn with_level_texture<R>(
        &self,
        level: usize,
        attribute: Attribute,
        read: impl FnOnce(&LevelTexture) -> R,
    ) -> Result<R> {
        let slot = self.slot(level)?;
        let state = slot.state.lock();
        Ok(read(state.textures.get(attribute)))
    }

    /// Cache counters of one attribute.
    pub fn cache_stats(&self, attribute: Attribute) -> CacheStats {
        self.sources[attribute.index()].lock().cache_stats()
    }

    /// Number of resident tiles of one attribute.
    pub fn resident_tiles(&self, attribute: Attribute) -> usize {
        self.sources[attribute.index()].lock().cache().len()
    }

    pub fn stats(&self) -> StreamingStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let mut stats = StreamingStats {
            jobs_enqueued: load(&self.counters.jobs_enqueued),
            jobs_run: load(&self.counters.jobs_run),
            full_refreshes: load(&self.counters.full_refreshes),
            incremental_updates: load(&self.counters.incremental_updates),
            unchanged: load(&self.counters.unchanged),
            retargeted: load(&self.counters.retargeted),
            texels_written: load(&self.counters.texels_written),
            bytes_uploaded: load(&self.counters.bytes_uploaded),
            upload_failures: load(&self.counters.upload_failures),
            ..StreamingStats::default()
        };
        for source in &self.sources {
            let source = source.lock();
            let cache = source.cache_stats();
            stats.tiles_synthesized += cache.synthesized;
            stats.cache_hits += cache.hits;
            stats.evictions += cache.evictions;
            stats.resident_tiles += source.cache().len();
        }
        stats
    }

    fn slot(&self, level: usize) -> Result<&LevelSlot> {
        self.levels.get(level).ok_or(StreamingError::LevelOutOfRange {
            level,
            level_count: self.levels.len(),
        })
    }

    fn run_job<U: ClipmapUploader + ?Sized>(&self, job: StreamingJob, uploader: &mut U) -> Result<JobOutcome> {
        let slot = self.slot(job.level)?;
        let mut level = slot.state.lock();
        let CameraState { sample, frame } = *self.camera.lock();

        // Target where the camera is now, not where it was at enqueue time.
        let origin = desired_origin(sample, job.level, self.config.texture_size());
        if origin != job.desired_origin {
            StatsCounters::bump(&self.counters.retargeted, 1);
            debug!(
                level = job.level,
                queued_x = job.desired_origin.x,
                queued_y = job.desired_origin.y,
                origin_x = origin.x,
                origin_y = origin.y,
                "Camera moved while job was queued"
            );
        }
        let plan = level.tracker.plan(origin);
        StatsCounters::bump(&self.counters.jobs_run, 1);

        if plan.is_noop() {
            level.world_origin = origin.to_world(self.config.sample_world_size);
            slot.pending.clear();
            StatsCounters::bump(&self.counters.unchanged, 1);
            return Ok(JobOutcome {
                level: job.level,
                origin,
                kind: plan.kind,
                texels_written: 0,
                tiles_synthesized: 0,
            });
        }

        let visible = collect_visible_tiles(&self.config, job.level, origin);
        let mut tiles_synthesized = 0;
        for attribute in Attribute::ALL {
            let mut source = self.sources[attribute.index()].lock();
            source.set_frame(frame);
            tiles_synthesized += source.ensure_set_resident(visible.get(attribute));
            source.enforce_budget(&visible.required_set(attribute));
        }

        let texels_written = populate_level(
            &plan,
            |attribute| self.sources[attribute.index()].lock(),
            &mut level.textures,
        );

        let upload = LevelUpload::from_plan(&plan, &level.textures, self.config.sample_world_size);
        if let Err(err) = uploader.upload_level(&upload) {
            level.tracker.reset();
            slot.pending.clear();
            StatsCounters::bump(&self.counters.upload_failures, 1);
            warn!(level = job.level, error = %err, "Clipmap level upload failed");
            return Err(StreamingError::Upload {
                level: job.level,
                source: Box::new(err),
            });
        }

        level.tracker.commit(&plan);
        level.world_origin = origin.to_world(self.config.sample_world_size);
        slot.pending.clear();
        drop(level);

        match plan.kind {
            UpdateKind::Full(_) => StatsCounters::bump(&self.counters.full_refreshes, 1),
            UpdateKind::Incremental { .. } => StatsCounters::bump(&self.counters.incremental_updates, 1),
            UpdateKind::Unchanged => {}
        }
        StatsCounters::bump(&self.counters.texels_written, texels_written);
        StatsCounters::bump(&self.counters.bytes_uploaded, upload.total_bytes() as u64);

        debug!(
            level = job.level,
            kind = ?plan.kind,
            regions = plan.regions.len(),
            texels_written,
            tiles_synthesized,
            "Streamed clipmap level"
        );

        Ok(JobOutcome {
            level: job.level,
            origin,
            kind: plan.kind,
            texels_written,
            tiles_synthesized,
        })
    }
}

fn make_source(config: &ClipmapConfig, attribute: Attribute, image: AttributeImage) -> Result<AttributeSource> {
    if image.attribute() != attribute {
        return Err(geoclip_core::Error::InvalidData(format!(
            "expected a {attribute} image, got {}",
            image.attribute()
        ))
        .into());
    }
    let attribute_config: AttributeConfig = *config.attribute(attribute);
    Ok(AttributeSource::new(attribute_config, image)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::RecordingUploader;
    use geoclip_core::AttributeConfig;

    fn small_config() -> ClipmapConfig {
        ClipmapConfig::new(3, 31)
            .with_attribute(Attribute::Height, AttributeConfig::new(64, 64).with_tile_size(16))
            .with_attribute(Attribute::Diffuse, AttributeConfig::new(64, 64).with_tile_size(16))
            .with_attribute(Attribute::Normal, AttributeConfig::new(64, 64).with_tile_size(16))
    }

    fn engine() -> ClipmapStreamingEngine {
        ClipmapStreamingEngine::with_terrain(small_config(), &TerrainGenerator::with_seed(9)).unwrap()
    }

    #[test]
    fn first_update_fills_every_level() {
        let engine = engine();
        let mut uploader = RecordingUploader::new();
        let report = engine.update(SampleCoord::ZERO, &mut uploader).unwrap();
        assert_eq!(report.jobs(), 3);
        assert_eq!(report.full_refreshes(), 3);
        assert!(uploader.records().iter().all(|record| record.first_upload));
        for snapshot in engine.level_snapshots() {
            assert!(snapshot.is_initialized());
            assert!(!snapshot.pending);
            assert_eq!(snapshot.origin, Some(engine.desired_origin(snapshot.level)));
        }
    }

    #[test]
    fn small_move_is_incremental() {
        let engine = engine();
        let mut uploader = RecordingUploader::new();
        engine.update(SampleCoord::ZERO, &mut uploader).unwrap();

        let report = engine.update(SampleCoord::new(2, 0), &mut uploader).unwrap();
        // Only level 0 snaps to a new origin.
        assert_eq!(report.jobs(), 1);
        assert_eq!(report.outcomes[0].kind, UpdateKind::Incremental { shift_x: 2, shift_y: 0 });
        assert_eq!(report.texels_written(), 2 * 32);
        assert_eq!(engine.level_snapshot(0).unwrap().offset, TexelOffset::new(2, 0));
        assert_eq!(engine.stats().incremental_updates, 1);
    }

    #[test]
    fn pending_flag_blocks_duplicate_jobs() {
        let engine = engine();
        assert_eq!(engine.request_update(SampleCoord::ZERO), 3);
        assert_eq!(engine.request_update(SampleCoord::new(64, 64)), 0);
        assert_eq!(engine.pending_jobs(), 3);
        assert!(!engine.request_level(1).unwrap());

        // Drained jobs target the newest camera.
        let mut uploader = RecordingUploader::new();
        let report = engine.drain(&mut uploader).unwrap();
        assert_eq!(report.jobs(), 3);
        for outcome in report.outcomes {
            assert_eq!(
                outcome.origin,
                desired_origin(SampleCoord::new(64, 64), outcome.level, 32)
            );
        }
        assert_eq!(engine.request_update(SampleCoord::new(64, 64)), 0);
        assert_eq!(engine.stats().retargeted, 3);
    }

    #[test]
    fn upload_failure_resets_level() {
        let engine = engine();
        let mut uploader = RecordingUploader::new();
        engine.update(SampleCoord::ZERO, &mut uploader).unwrap();

        uploader.fail_next(0);
        let err = engine.update(SampleCoord::new(4, 0), &mut uploader).unwrap_err();
        assert!(err.is_upload_failure());
        let snapshot = engine.level_snapshot(0).unwrap();
        assert!(!snapshot.pending);
        assert!(!snapshot.is_initialized());
        assert_eq!(engine.stats().upload_failures, 1);

        // Level 1's job from the failed drain is still queued ahead of the retry.
        let report = engine.update(SampleCoord::new(4, 0), &mut uploader).unwrap();
        let levels: Vec<_> = report.outcomes.iter().map(|outcome| outcome.level).collect();
        assert_eq!(levels, vec![1, 0]);
        assert!(matches!(report.outcomes[1].kind, UpdateKind::Full(_)));
        assert!(uploader.records().last().is_some_and(|record| record.first_upload));
    }

    #[test]
    fn level_out_of_range() {
        let engine = engine();
        assert!(matches!(
            engine.level_snapshot(3),
            Err(StreamingError::LevelOutOfRange { level: 3, level_count: 3 })
        ));
        assert!(engine.request_level(7).is_err());
    }

    #[test]
    fn rejects_swapped_images() {
        let config = small_config();
        let generator = TerrainGenerator::with_seed(1);
        let mut images = generator.generate_images(&config).unwrap();
        std::mem::swap(&mut images.diffuse, &mut images.normal);
        assert!(ClipmapStreamingEngine::new(config, images).is_err());
    }

    #[test]
    fn engine_is_shareable() {
        fn assert_sync<T: Send + Sync>() {}
        assert_sync::<ClipmapStreamingEngine>();
    }
}
