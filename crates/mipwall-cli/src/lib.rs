//! # Mipwall CLI
//!
//! Headless tooling around the texture pipeline.
//!
//! ## Commands
//! - `plan` - Decode an image and show every GPU call its load would make
//! - `palette` - List the marker colors per mip level
//! - `probe` - Dry-run the vendor memory probe

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mipwall_assets::ImageFileSource;
use mipwall_core::{DiagnosticsConfig, Mat4, UploadPreference, WallConfig};
use mipwall_renderer::memory::{ATI_TEXTURE_FREE_MEMORY, NVX_CURRENT_AVAILABLE_VIDMEM, NVX_EVICTED_MEMORY};
use mipwall_renderer::mip::{MARKER_COLORS, marker_index};
use mipwall_renderer::recording::Call;
use mipwall_renderer::{Capabilities, RecordingGpu, TexturedQuad, query_memory};

/// Mipwall texture diagnostics
#[derive(Parser)]
#[command(name = "mipwall")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Allocation path override
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageArg {
    Auto,
    Immutable,
    Mutable,
}

impl From<StorageArg> for UploadPreference {
    fn from(arg: StorageArg) -> Self {
        match arg {
            StorageArg::Auto => UploadPreference::Auto,
            StorageArg::Immutable => UploadPreference::Immutable,
            StorageArg::Mutable => UploadPreference::Mutable,
        }
    }
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show the GPU calls loading an image would make
    Plan {
        /// Image to load
        image: PathBuf,

        /// Wall configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the allocation path
        #[arg(short, long, value_enum)]
        storage: Option<StorageArg>,

        /// Use color-coded marker mips
        #[arg(short, long)]
        manual: bool,

        /// Pretend the device lacks immutable texture storage
        #[arg(long)]
        legacy: bool,
    },

    /// List marker colors per mip level
    Palette {
        /// Number of levels to list
        #[arg(short, long, default_value = "12")]
        levels: u32,
    },

    /// Dry-run the memory probe for a vendor string
    Probe {
        /// Vendor string as reported by the driver
        #[arg(long)]
        vendor: String,

        /// Available memory to report, in KiB
        #[arg(long, default_value = "0")]
        available: i32,

        /// Evicted memory to report, in KiB
        #[arg(long, default_value = "0")]
        evicted: i32,
    },
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match cli.command {
        Commands::Plan {
            image,
            config,
            storage,
            manual,
            legacy,
        } => {
            let mut wall = match config {
                Some(path) => WallConfig::from_json_file(&path)
                    .with_context(|| format!("loading config from {}", path.display()))?,
                None => WallConfig::default(),
            };
            if let Some(storage) = storage {
                wall.quad.upload = storage.into();
            }
            if manual {
                wall.quad.use_mipmap = true;
                wall.quad.use_manual_mipmap = true;
            }
            wall.validate().context("validating configuration")?;

            for line in plan(&wall, image, legacy)? {
                log::info!("{}", line);
            }
        }

        Commands::Palette { levels } => {
            for line in palette(levels) {
                log::info!("{}", line);
            }
        }

        Commands::Probe {
            vendor,
            available,
            evicted,
        } => {
            let gpu = RecordingGpu::new();
            gpu.set_vendor(vendor);
            gpu.set_integers(NVX_CURRENT_AVAILABLE_VIDMEM, &[available]);
            gpu.set_integers(NVX_EVICTED_MEMORY, &[evicted]);
            gpu.set_integers(ATI_TEXTURE_FREE_MEMORY, &[available, 0, 0, 0]);

            let report = query_memory(&gpu, &DiagnosticsConfig::default());
            log::info!("Probe result: {:?}", report);
        }
    }

    Ok(())
}

/// Load `image` against a recording device and describe what happened
pub fn plan(wall: &WallConfig, image: PathBuf, legacy: bool) -> Result<Vec<String>> {
    let gpu = RecordingGpu::with_capabilities(Capabilities {
        texture_storage: !legacy,
        ..Default::default()
    });
    let mut quad = TexturedQuad::new(gpu.clone(), image.clone(), wall.placement(), wall.quad.clone());
    let uploaded = quad
        .setup(&ImageFileSource::new())
        .with_context(|| format!("loading {}", image.display()))?;

    let mut lines = vec![format!(
        "{}: {} with {} levels",
        image.display(),
        uploaded.extent,
        uploaded.levels
    )];
    lines.extend(describe_calls(&gpu.calls()));

    let model_view = quad.update(Mat4::IDENTITY, &gpu)?;
    lines.push(format!("model: {:?}", model_view.to_cols_array()));
    Ok(lines)
}

/// One line per recorded texture call
pub fn describe_calls(calls: &[Call]) -> Vec<String> {
    calls
        .iter()
        .filter_map(|call| match call {
            Call::AllocateStorage {
                levels,
                width,
                height,
            } => Some(format!("storage  {} levels of {}x{}", levels, width, height)),
            Call::SubImage {
                level,
                width,
                height,
                format,
            } => Some(format!(
                "sub      level {:>2} {}x{} {:?}{}",
                level,
                width,
                height,
                format,
                marker_note(*level)
            )),
            Call::Image {
                level,
                width,
                height,
                format,
            } => Some(format!(
                "image    level {:>2} {}x{} {:?}{}",
                level,
                width,
                height,
                format,
                marker_note(*level)
            )),
            Call::GenerateMipmap => Some("generate mipmaps".to_string()),
            Call::SetSampling(params) => Some(format!(
                "sampling {:?} levels {}..={}",
                params.min_filter, params.base_level, params.max_level
            )),
            _ => None,
        })
        .collect()
}

fn marker_note(level: u32) -> String {
    if level == 0 {
        String::new()
    } else {
        format!(" marker {}", marker_index(level))
    }
}

/// Marker color for each of the first `levels` mip levels
pub fn palette(levels: u32) -> Vec<String> {
    (0..levels)
        .map(|level| {
            let [r, g, b, a] = MARKER_COLORS[marker_index(level)];
            format!(
                "level {:>2}: marker {} rgba({}, {}, {}, {})",
                level,
                marker_index(level),
                r,
                g,
                b,
                a
            )
        })
        .collect()
}
