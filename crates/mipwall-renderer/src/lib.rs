//! # Mipwall Renderer
//!
//! Texture lifecycle and manual mip chains for probing how a display wall's
//! GPU selects mip levels.
//!
//! ## Features
//! - Color-coded marker mips so the sampled level is visible on screen
//! - Immutable-storage or per-level upload, chosen from device capabilities
//! - Aspect-correct quad placement published as a model-view uniform
//! - Vendor-specific video memory probe
//! - Recording backend for headless runs, `glow` backend behind the `gl` feature

pub mod gpu;
pub mod memory;
pub mod mip;
pub mod quad;
pub mod recording;
pub mod upload;

#[cfg(feature = "gl")]
pub mod gl;

pub use gpu::{
    Capabilities, Extent, MemoryQuery, MinFilter, SamplingParams, TextureApi, TextureId,
    UniformLocation, UniformSink,
};
pub use memory::{MemoryReport, Vendor, query_memory};
pub use mip::{MARKER_COLORS, MARKER_LEVELS, MarkerChain, MipSynthesizer};
pub use quad::{LoadState, TexturedQuad};
pub use recording::RecordingGpu;
pub use upload::{UploadPlan, UploadStrategy, UploadedTexture};

use mipwall_assets::AssetError;
use thiserror::Error;

/// Renderer errors
#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Image decode failed: {0}")]
    Decode(#[from] AssetError),

    #[error("No image data")]
    EmptyImage,

    #[error("Pixel buffer too short: expected {expected} bytes, got {actual}")]
    InvalidPixelData { expected: usize, actual: usize },

    #[error("Manual mipmapping requested without marker images")]
    MissingMarkers,

    #[error("GPU allocation failed: {0}")]
    Allocation(String),

    #[error("Texture is not loaded")]
    NotLoaded,

    #[error("Capability not supported: {0}")]
    UnsupportedCapability(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),
}

/// Result type for renderer operations
pub type RendererResult<T> = Result<T, RendererError>;
