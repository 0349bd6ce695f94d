//! GPU Seams
//!
//! The renderer talks to the GPU through these traits. Texture calls follow
//! bound-texture semantics: every call after `bind_texture` applies to the
//! currently bound 2D texture.

use std::num::NonZeroU32;

use glam::Mat4;
use mipwall_core::PixelFormat;

use crate::RendererResult;

/// Opaque texture handle; zero is not a valid handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub NonZeroU32);

impl TextureId {
    /// Raw handle value
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

/// Shader uniform address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Width and height of one texture level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    /// Create a new extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes a tightly packed four-channel level of this extent occupies
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Device features resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Immutable pre-sized storage (`glTexStorage2D`) is available
    pub texture_storage: bool,
    /// Largest supported texture side
    pub max_texture_size: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            texture_storage: true,
            max_texture_size: 16384,
        }
    }
}

/// Minification filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinFilter {
    #[default]
    Linear,
    LinearMipmapLinear,
}

/// Sampler state applied to a texture at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingParams {
    /// Minification filter; magnification is always linear
    pub min_filter: MinFilter,
    /// Always 0
    pub base_level: u32,
    /// Highest level the sampler may select
    pub max_level: u32,
}

impl SamplingParams {
    /// Sampling for a texture with `levels` levels
    pub fn for_levels(levels: u32, mipmapped: bool) -> Self {
        Self {
            min_filter: if mipmapped {
                MinFilter::LinearMipmapLinear
            } else {
                MinFilter::Linear
            },
            base_level: 0,
            max_level: levels.saturating_sub(1),
        }
    }
}

/// 2D texture object API. Wrap modes are always clamp-to-edge on both axes.
pub trait TextureApi {
    /// Device features
    fn capabilities(&self) -> Capabilities;

    /// Create a texture object
    fn create_texture(&self) -> RendererResult<TextureId>;

    /// Release a texture object
    fn delete_texture(&self, id: TextureId);

    /// Bind to the 2D target of the active unit, or unbind with `None`
    fn bind_texture(&self, id: Option<TextureId>);

    /// Select the active texture unit
    fn active_texture_unit(&self, unit: u32);

    /// Apply wrap and filter state to the bound texture
    fn set_sampling(&self, params: &SamplingParams) -> RendererResult<()>;

    /// Pre-allocate `levels` immutable levels for the bound texture
    fn allocate_storage(&self, levels: u32, width: u32, height: u32) -> RendererResult<()>;

    /// Fill a level of pre-allocated storage
    fn sub_image(
        &self,
        level: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &[u8],
    ) -> RendererResult<()>;

    /// Allocate and fill a single mutable level
    fn image(
        &self,
        level: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &[u8],
    ) -> RendererResult<()>;

    /// Let the driver build levels 1.. from level 0
    fn generate_mipmap(&self) -> RendererResult<()>;

    /// Read back the extent of a level of the bound texture
    fn level_extent(&self, level: u32) -> RendererResult<Extent>;
}

/// Destination for per-frame shader uniforms
pub trait UniformSink {
    /// Write a column-major 4x4 matrix
    fn write_mat4(&self, location: UniformLocation, value: &Mat4);
}

/// Raw integer state queries used by the memory probe
pub trait MemoryQuery {
    /// The `GL_VENDOR` string
    fn vendor(&self) -> String;

    /// Query a single integer
    fn integer(&self, pname: u32) -> i32;

    /// Query an integer vector into `out`
    fn integers(&self, pname: u32, out: &mut [i32]);
}
