//! Camera path and streaming loop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use geoclip_core::ClipmapConfig;
use geoclip_gpu::GpuContextBuilder;
use geoclip_render::{OrbitCamera, RingMeshBuilder, VulkanClipmapUploader};
use geoclip_world::upload::ClipmapUploader;
use geoclip_world::{ClipmapStreamingEngine, RecordingUploader, StreamingWorker, TerrainGenerator};
use glam::Vec3;
use tracing::{info, warn};

/// Frames between progress logs.
const LOG_INTERVAL: u64 = 120;

/// Flythrough options (from CLI or defaults).
#[derive(Debug, Clone, PartialEq)]
pub struct FlythroughConfig {
    pub frames: u64,
    pub seed: u64,
    pub levels: usize,
    pub grid_size: u32,
    pub radius: f32,
    pub speed: f32,
    pub worker: bool,
    pub gpu: bool,
    pub region_shader: Option<PathBuf>,
    pub validation: bool,
}

impl Default for FlythroughConfig {
    fn default() -> Self {
        Self {
            frames: 600,
            seed: 42,
            levels: 6,
            grid_size: 127,
            radius: 600.0,
            speed: 0.01,
            worker: false,
            gpu: false,
            region_shader: None,
            validation: false,
        }
    }
}

impl FlythroughConfig {
    /// Parse options, skipping the program name.
    pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--frames" => config.frames = value(&arg, args.next())?,
                "--seed" => config.seed = value(&arg, args.next())?,
                "--levels" => config.levels = value(&arg, args.next())?,
                "--grid" => config.grid_size = value(&arg, args.next())?,
                "--radius" => config.radius = value(&arg, args.next())?,
                "--speed" => config.speed = value(&arg, args.next())?,
                "--region-shader" => config.region_shader = Some(value(&arg, args.next())?),
                "--worker" => config.worker = true,
                "--gpu" => config.gpu = true,
                "--validation" => config.validation = true,
                other => bail!("unknown option {other}"),
            }
        }
        Ok(config)
    }

    fn clipmap(&self) -> ClipmapConfig {
        ClipmapConfig::new(self.levels, self.grid_size)
    }

    /// Camera pose at `frame`. The target circles the origin and the view
    /// turns with it.
    pub fn camera_at(&self, frame: u64) -> OrbitCamera {
        let angle = frame as f32 * self.speed;
        let target = Vec3::new(self.radius * angle.cos(), 0.0, self.radius * angle.sin());
        let mut camera = OrbitCamera::new(target, 80.0);
        camera.orbit(angle, 0.0);
        camera
    }
}

fn value<T: std::str::FromStr>(flag: &str, raw: Option<String>) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = raw.with_context(|| format!("{flag} needs a value"))?;
    raw.parse().with_context(|| format!("invalid value {raw:?} for {flag}"))
}

/// Build the engine and fly the path with the selected uploader.
pub fn run(config: &FlythroughConfig) -> anyhow::Result<()> {
    let clipmap = config.clipmap();
    let generator = TerrainGenerator::with_seed(config.seed);
    let engine = Arc::new(ClipmapStreamingEngine::with_terrain(clipmap.clone(), &generator)?);

    let mesh = RingMeshBuilder::for_clipmap(&clipmap).build()?;
    info!(
        levels = clipmap.level_count,
        grid = clipmap.grid_size,
        seed = config.seed,
        triangles = mesh.triangle_count(),
        "Starting flythrough"
    );

    if config.gpu {
        let context = Arc::new(
            GpuContextBuilder::new()
                .app_name("Geoclip Flythrough")
                .validation(config.validation)
                .build()?,
        );
        info!(device = context.device_name(), "Using GPU uploads");
        let mut uploader = VulkanClipmapUploader::new(Arc::clone(&context), &clipmap)?;
        if let Some(path) = &config.region_shader {
            let mut file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
            let code = ash::util::read_spv(&mut file).with_context(|| format!("reading {}", path.display()))?;
            uploader = uploader.with_region_pass(&code)?;
        }
        fly(config, &engine, uploader)?;
        context.wait_idle()?;
    } else {
        let uploader = fly(config, &engine, RecordingUploader::new())?;
        info!(uploads = uploader.records().len(), "Recorded uploads");
    }

    let stats = engine.stats();
    info!(
        jobs = stats.jobs_run,
        full = stats.full_refreshes,
        incremental = stats.incremental_updates,
        texels = stats.texels_written,
        bytes = stats.bytes_uploaded,
        tiles = stats.tiles_synthesized,
        hits = stats.cache_hits,
        evictions = stats.evictions,
        resident = stats.resident_tiles,
        "Flythrough finished"
    );
    for snapshot in engine.level_snapshots() {
        info!(
            level = snapshot.level,
            origin = ?snapshot.origin,
            offset = ?snapshot.offset,
            "Level state"
        );
    }
    Ok(())
}

fn fly<U: ClipmapUploader + Send + 'static>(
    config: &FlythroughConfig,
    engine: &Arc<ClipmapStreamingEngine>,
    mut uploader: U,
) -> anyhow::Result<U> {
    let sample_world_size = engine.config().sample_world_size;

    if config.worker {
        let worker = StreamingWorker::spawn(Arc::clone(engine), uploader)?;
        for frame in 0..config.frames {
            let camera = config.camera_at(frame);
            worker.request_update(camera.sample_position(sample_world_size));
            while let Some(err) = worker.try_recv_error() {
                warn!(frame, error = %err, "Streaming worker reported an error");
            }
            if frame % LOG_INTERVAL == 0 {
                info!(frame, pending = engine.pending_jobs(), "Flythrough progress");
            }
        }
        return Ok(worker.shutdown()?);
    }

    for frame in 0..config.frames {
        let camera = config.camera_at(frame);
        match engine.update(camera.sample_position(sample_world_size), &mut uploader) {
            Ok(report) if frame % LOG_INTERVAL == 0 => {
                info!(frame, jobs = report.jobs(), texels = report.texels_written(), "Flythrough progress");
            }
            Ok(_) => {}
            Err(err) if err.is_upload_failure() => {
                warn!(frame, error = %err, "Upload failed, levels will refresh");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(uploader)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| (*arg).to_string()).collect()
    }

    #[test]
    fn parses_options() {
        let config = FlythroughConfig::parse(args(&["--frames", "10", "--gpu", "--grid", "63"])).unwrap();
        assert_eq!(config.frames, 10);
        assert_eq!(config.grid_size, 63);
        assert!(config.gpu);
        assert!(!config.worker);
    }

    #[test]
    fn rejects_bad_options() {
        assert!(FlythroughConfig::parse(args(&["--frames"])).is_err());
        assert!(FlythroughConfig::parse(args(&["--frames", "many"])).is_err());
        assert!(FlythroughConfig::parse(args(&["--fly"])).is_err());
    }

    #[test]
    fn path_stays_on_circle() {
        let config = FlythroughConfig::default();
        for frame in [0, 50, 300] {
            let target = config.camera_at(frame).target;
            assert!((target.length() - config.radius).abs() < 1e-2);
        }
    }

    #[test]
    fn short_cpu_flythrough_streams() {
        let config = FlythroughConfig {
            frames: 20,
            levels: 3,
            grid_size: 31,
            ..FlythroughConfig::default()
        };
        let engine = Arc::new(ClipmapStreamingEngine::with_terrain(config.clipmap(), &TerrainGenerator::with_seed(1)).unwrap());
        let uploader = fly(&config, &engine, RecordingUploader::new()).unwrap();
        assert!(!uploader.records().is_empty());
        assert_eq!(engine.pending_jobs(), 0);
    }
}
