//! Configuration
//!
//! Quad, diagnostics and wall-level settings. Everything is passed by
//! reference to the component that needs it; there is no process-wide state.

use std::path::Path;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::Placement;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Side length of each synthetic marker image
pub const DEFAULT_MARKER_DIMENSION: u32 = 4096;

/// Channel order of host pixel data handed to the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgba,
    Bgra,
}

/// Which allocation path the upload strategy should take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadPreference {
    /// Immutable storage when the device supports it, per-level images otherwise
    #[default]
    Auto,
    /// Always pre-allocate the full pyramid
    Immutable,
    /// Always allocate level by level
    Mutable,
}

/// Per-quad texture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadConfig {
    /// Build a mip chain at all
    pub use_mipmap: bool,
    /// Supply color-coded marker levels instead of driver-generated mips
    pub use_manual_mipmap: bool,
    /// Skip per-image aspect correction
    pub arrange_mode: bool,
    /// Side length of each marker image
    pub marker_dimension: u32,
    /// Allocation path
    pub upload: UploadPreference,
    /// Channel order of the decoded image
    pub source_format: PixelFormat,
    /// Drop host copies of pixel data once the GPU owns them
    pub release_host_pixels: bool,
}

impl QuadConfig {
    /// Whether the marker chain is in play
    pub fn wants_manual_mips(&self) -> bool {
        self.use_mipmap && self.use_manual_mipmap
    }
}

impl Default for QuadConfig {
    fn default() -> Self {
        Self {
            use_mipmap: true,
            use_manual_mipmap: false,
            arrange_mode: false,
            marker_dimension: DEFAULT_MARKER_DIMENSION,
            upload: UploadPreference::Auto,
            source_format: PixelFormat::Rgba,
            release_host_pixels: false,
        }
    }
}

/// Diagnostic toggles consumed by the memory probe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Quiet mode for automated runs: reports are returned but not logged
    pub test_mode: bool,
}

/// Top-level document describing one displayed image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallConfig {
    /// Aspect ratio of the containing viewport
    pub window_aspect: f32,
    /// World-space position
    pub position: [f32; 3],
    /// Base scale
    pub scale: [f32; 2],
    /// Texture settings
    pub quad: QuadConfig,
    /// Diagnostic toggles
    pub diagnostics: DiagnosticsConfig,
}

impl WallConfig {
    /// Read a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Parse a configuration from JSON text
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        log::debug!("Parsed wall config: {:?}", config);
        Ok(config)
    }

    /// Reject values the renderer cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.window_aspect.is_finite() || self.window_aspect <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "window_aspect",
                reason: format!("must be finite and positive, got {}", self.window_aspect),
            });
        }
        if self.position.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "position",
                reason: format!("must be finite, got {:?}", self.position),
            });
        }
        if self.scale.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "scale",
                reason: format!("must be finite, got {:?}", self.scale),
            });
        }
        let dim = self.quad.marker_dimension;
        if !dim.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "quad.marker_dimension",
                reason: format!("must be a nonzero power of two, got {}", dim),
            });
        }
        Ok(())
    }

    /// Placement described by this document
    pub fn placement(&self) -> Placement {
        Placement::new(
            self.window_aspect,
            Vec3::from_array(self.position),
            Vec2::from_array(self.scale),
        )
    }
}

impl Default for WallConfig {
    fn default() -> Self {
        Self {
            window_aspect: 16.0 / 9.0,
            position: [0.0; 3],
            scale: [1.0; 2],
            quad: QuadConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}
