//! Geoclip headless flythrough
//!
//! Flies an orbit camera around a circular path over procedurally generated
//! terrain and streams the clipmap as it goes. Uploads are recorded on the
//! CPU by default, or written into Vulkan images with `--gpu`.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p geoclip-flythrough -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod flythrough;

use tracing_subscriber::EnvFilter;

use crate::flythrough::FlythroughConfig;

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = FlythroughConfig::parse(std::env::args().skip(1))?;
    flythrough::run(&config)
}

fn print_help() {
    eprintln!(
        "Geoclip headless flythrough

USAGE:
    cargo run -p geoclip-flythrough -- [OPTIONS]

STREAMING OPTIONS:
    --frames <N>            Number of camera steps (default: 600)
    --seed <N>              Terrain seed (default: 42)
    --levels <N>            Clipmap level count (default: 6)
    --grid <N>              Grid size per level, 2^k - 1 (default: 127)
    --radius <F>            Path radius in world units (default: 600)
    --speed <F>             Path angle per frame in radians (default: 0.01)
    --worker                Drain jobs on a background streaming thread

GPU OPTIONS:
    --gpu                   Upload into Vulkan images (headless device)
    --region-shader <PATH>  SPIR-V compute shader run over each dirty region
    --validation            Enable Vulkan validation layers

OTHER:
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
