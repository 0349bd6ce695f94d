//! # Mipwall Core
//!
//! Shared foundation for the mipwall texture diagnostics:
//! - **Math**: glam re-exports and the aspect-correct quad placement used every frame
//! - **Config**: quad, diagnostics and wall-level configuration documents

pub mod config;
pub mod math;

pub use config::{
    ConfigError, ConfigResult, DiagnosticsConfig, PixelFormat, QuadConfig, UploadPreference,
    WallConfig,
};
pub use math::{Mat4, Placement, Vec2, Vec3};
