//! OpenGL Backend
//!
//! Maps the GPU seams onto a `glow` context. Every allocation and upload is
//! followed by a `glGetError` check so driver rejections surface as
//! [`RendererError::Allocation`].
//!
//! `glow` has no binding for `glGetTexLevelParameteriv`, so level extents are
//! answered from a per-texture table kept in step with the allocation calls.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use glam::Mat4;
use glow::HasContext;
use mipwall_core::PixelFormat;

use crate::gpu::{
    Capabilities, Extent, MemoryQuery, MinFilter, SamplingParams, TextureApi, TextureId,
    UniformLocation, UniformSink,
};
use crate::{RendererError, RendererResult};

/// Shared handle to a GL context; must only be used on the context's thread
#[derive(Clone)]
pub struct GlGpu {
    gl: Rc<glow::Context>,
    caps: Capabilities,
    levels: Rc<RefCell<LevelTracker>>,
}

impl GlGpu {
    /// Wrap a context and resolve its capabilities once
    pub fn new(gl: Rc<glow::Context>) -> Self {
        let caps = detect_capabilities(&gl);
        log::info!(
            "GL {}.{}{}: texture storage {}, max texture size {}",
            gl.version().major,
            gl.version().minor,
            if gl.version().is_embedded { " ES" } else { "" },
            caps.texture_storage,
            caps.max_texture_size
        );
        Self {
            gl,
            caps,
            levels: Rc::new(RefCell::new(LevelTracker::default())),
        }
    }

    /// The wrapped context
    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    fn check(&self, what: &str) -> RendererResult<()> {
        // SAFETY: glGetError has no preconditions beyond a current context.
        let error = unsafe { self.gl.get_error() };
        if error == glow::NO_ERROR {
            Ok(())
        } else {
            Err(RendererError::Allocation(format!("{} failed with GL error 0x{:04X}", what, error)))
        }
    }

    /// Like [`check`](Self::check) for state queries: a failed query is
    /// logged and reads as zero.
    fn checked_query<T: Default>(&self, what: &str, value: T) -> T {
        or_default(self.check(what), value)
    }
}

fn or_default<T: Default>(status: RendererResult<()>, value: T) -> T {
    match status {
        Ok(()) => value,
        Err(e) => {
            log::warn!("{}; reporting 0", e);
            T::default()
        }
    }
}

/// Level extents GL has defined for each texture name
///
/// Mirrors the bound-texture model: every mutation applies to the texture
/// last passed to [`bind`](Self::bind).
#[derive(Debug, Default)]
struct LevelTracker {
    bound: Option<TextureId>,
    textures: HashMap<TextureId, TrackedTexture>,
}

#[derive(Debug)]
struct TrackedTexture {
    max_level: u32,
    levels: BTreeMap<u32, Extent>,
}

impl Default for TrackedTexture {
    fn default() -> Self {
        // GL's initial TEXTURE_MAX_LEVEL
        Self {
            max_level: 1000,
            levels: BTreeMap::new(),
        }
    }
}

impl LevelTracker {
    fn bind(&mut self, id: Option<TextureId>) {
        self.bound = id;
    }

    fn forget(&mut self, id: TextureId) {
        self.textures.remove(&id);
        if self.bound == Some(id) {
            self.bound = None;
        }
    }

    fn bound_mut(&mut self) -> Option<&mut TrackedTexture> {
        let id = self.bound?;
        Some(self.textures.entry(id).or_default())
    }

    fn set_max_level(&mut self, max_level: u32) {
        if let Some(texture) = self.bound_mut() {
            texture.max_level = max_level;
        }
    }

    fn define_storage(&mut self, levels: u32, width: u32, height: u32) {
        if let Some(texture) = self.bound_mut() {
            texture.levels = (0..levels)
                .map(|level| (level, halved(width, height, level)))
                .collect();
        }
    }

    fn define_level(&mut self, level: u32, width: u32, height: u32) {
        if let Some(texture) = self.bound_mut() {
            texture.levels.insert(level, Extent::new(width, height));
        }
    }

    fn derive_chain(&mut self) {
        let Some(texture) = self.bound_mut() else {
            return;
        };
        let Some(base) = texture.levels.get(&0).copied() else {
            return;
        };
        let mut level = 1;
        while level <= texture.max_level {
            let prev = halved(base.width, base.height, level - 1);
            if prev.width == 1 && prev.height == 1 {
                break;
            }
            texture
                .levels
                .insert(level, halved(base.width, base.height, level));
            level += 1;
        }
    }

    fn extent(&self, level: u32) -> RendererResult<Extent> {
        let id = self.bound.ok_or(RendererError::NotLoaded)?;
        self.textures
            .get(&id)
            .and_then(|texture| texture.levels.get(&level))
            .copied()
            .ok_or_else(|| RendererError::ResourceNotFound(format!("level {}", level)))
    }
}

fn halved(width: u32, height: u32, level: u32) -> Extent {
    Extent::new(
        width.checked_shr(level).unwrap_or(0).max(1),
        height.checked_shr(level).unwrap_or(0).max(1),
    )
}

impl std::fmt::Debug for GlGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlGpu").field("caps", &self.caps).finish()
    }
}

fn detect_capabilities(gl: &glow::Context) -> Capabilities {
    let version = gl.version();
    let core_storage = if version.is_embedded {
        version.major >= 3
    } else {
        (version.major, version.minor) >= (4, 2)
    };
    let extensions = gl.supported_extensions();
    let texture_storage = core_storage
        || extensions.contains("GL_ARB_texture_storage")
        || extensions.contains("GL_EXT_texture_storage");

    // SAFETY: plain integer state query.
    let max = unsafe { gl.get_parameter_i32(glow::MAX_TEXTURE_SIZE) };
    Capabilities {
        texture_storage,
        max_texture_size: max.max(0) as u32,
    }
}

fn gl_format(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::Rgba => glow::RGBA,
        PixelFormat::Bgra => glow::BGRA,
    }
}

fn native(id: TextureId) -> glow::NativeTexture {
    glow::NativeTexture(id.0)
}

impl TextureApi for GlGpu {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn create_texture(&self) -> RendererResult<TextureId> {
        // SAFETY: creating a texture name has no preconditions.
        let texture = unsafe { self.gl.create_texture() }.map_err(RendererError::Allocation)?;
        Ok(TextureId(texture.0))
    }

    fn delete_texture(&self, id: TextureId) {
        // SAFETY: deleting a name that is already gone is ignored by GL.
        unsafe { self.gl.delete_texture(native(id)) }
        self.levels.borrow_mut().forget(id);
    }

    fn bind_texture(&self, id: Option<TextureId>) {
        // SAFETY: binding a valid name or zero.
        unsafe { self.gl.bind_texture(glow::TEXTURE_2D, id.map(native)) }
        self.levels.borrow_mut().bind(id);
    }

    fn active_texture_unit(&self, unit: u32) {
        // SAFETY: unit offsets stay within the implementation's unit count.
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) }
    }

    fn set_sampling(&self, params: &SamplingParams) -> RendererResult<()> {
        let min_filter = match params.min_filter {
            MinFilter::Linear => glow::LINEAR,
            MinFilter::LinearMipmapLinear => glow::LINEAR_MIPMAP_LINEAR,
        };
        // SAFETY: parameters applied to the bound 2D texture.
        unsafe {
            let gl = &self.gl;
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, min_filter as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_BASE_LEVEL, params.base_level as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAX_LEVEL, params.max_level as i32);
        }
        self.check("glTexParameteri")?;
        self.levels.borrow_mut().set_max_level(params.max_level);
        Ok(())
    }

    fn allocate_storage(&self, levels: u32, width: u32, height: u32) -> RendererResult<()> {
        // SAFETY: allocation on the bound 2D texture.
        unsafe {
            self.gl.tex_storage_2d(
                glow::TEXTURE_2D,
                levels as i32,
                glow::RGBA8,
                width as i32,
                height as i32,
            );
        }
        self.check("glTexStorage2D")?;
        self.levels.borrow_mut().define_storage(levels, width, height);
        Ok(())
    }

    fn sub_image(
        &self,
        level: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &[u8],
    ) -> RendererResult<()> {
        let needed = Extent::new(width, height).byte_len();
        let data = pixels.get(..needed).ok_or(RendererError::InvalidPixelData {
            expected: needed,
            actual: pixels.len(),
        })?;
        // SAFETY: `data` covers exactly width * height tightly packed pixels.
        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                level as i32,
                0,
                0,
                width as i32,
                height as i32,
                gl_format(format),
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(data)),
            );
        }
        self.check("glTexSubImage2D")
    }

    fn image(
        &self,
        level: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &[u8],
    ) -> RendererResult<()> {
        let needed = Extent::new(width, height).byte_len();
        let data = pixels.get(..needed).ok_or(RendererError::InvalidPixelData {
            expected: needed,
            actual: pixels.len(),
        })?;
        // SAFETY: `data` covers exactly width * height tightly packed pixels.
        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                level as i32,
                glow::RGBA8 as i32,
                width as i32,
                height as i32,
                0,
                gl_format(format),
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(data)),
            );
        }
        self.check("glTexImage2D")?;
        self.levels.borrow_mut().define_level(level, width, height);
        Ok(())
    }

    fn generate_mipmap(&self) -> RendererResult<()> {
        // SAFETY: level 0 of the bound texture is defined before this call.
        unsafe { self.gl.generate_mipmap(glow::TEXTURE_2D) }
        self.check("glGenerateMipmap")?;
        self.levels.borrow_mut().derive_chain();
        Ok(())
    }

    fn level_extent(&self, level: u32) -> RendererResult<Extent> {
        self.levels.borrow().extent(level)
    }
}

impl UniformSink for GlGpu {
    fn write_mat4(&self, location: UniformLocation, value: &Mat4) {
        let location = glow::NativeUniformLocation(location.0);
        // SAFETY: the program owning `location` is current; data is column-major.
        unsafe {
            self.gl
                .uniform_matrix_4_f32_slice(Some(&location), false, &value.to_cols_array());
        }
    }
}

impl MemoryQuery for GlGpu {
    fn vendor(&self) -> String {
        // SAFETY: string state query.
        unsafe { self.gl.get_parameter_string(glow::VENDOR) }
    }

    fn integer(&self, pname: u32) -> i32 {
        // SAFETY: vendor enums are only queried after vendor dispatch.
        let value = unsafe { self.gl.get_parameter_i32(pname) };
        self.checked_query("glGetIntegerv", value)
    }

    fn integers(&self, pname: u32, out: &mut [i32]) {
        // SAFETY: `out` is sized for the queried enum.
        unsafe { self.gl.get_parameter_i32_slice(pname, out) };
        if self.check("glGetIntegerv").is_err() {
            log::warn!("glGetIntegerv(0x{:04X}) failed; reporting 0", pname);
            out.fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;

    fn id(n: u32) -> TextureId {
        TextureId(NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn test_storage_defines_every_level() {
        let mut tracker = LevelTracker::default();
        tracker.bind(Some(id(1)));
        tracker.define_storage(9, 512, 256);

        assert_eq!(tracker.extent(0).unwrap(), Extent::new(512, 256));
        assert_eq!(tracker.extent(7).unwrap(), Extent::new(4, 2));
        assert_eq!(tracker.extent(8).unwrap(), Extent::new(2, 1));
        assert!(matches!(tracker.extent(9), Err(RendererError::ResourceNotFound(_))));
    }

    #[test]
    fn test_mipmap_generation_stops_at_max_level() {
        let mut tracker = LevelTracker::default();
        tracker.bind(Some(id(1)));
        tracker.set_max_level(3);
        tracker.define_level(0, 64, 32);
        tracker.derive_chain();

        assert_eq!(tracker.extent(3).unwrap(), Extent::new(8, 4));
        assert!(tracker.extent(4).is_err());
    }

    #[test]
    fn test_mipmap_generation_stops_at_one_pixel() {
        let mut tracker = LevelTracker::default();
        tracker.bind(Some(id(1)));
        tracker.define_level(0, 8, 2);
        tracker.derive_chain();

        assert_eq!(tracker.extent(1).unwrap(), Extent::new(4, 1));
        assert_eq!(tracker.extent(3).unwrap(), Extent::new(1, 1));
        assert!(tracker.extent(4).is_err());
    }

    #[test]
    fn test_levels_follow_the_bound_texture() {
        let mut tracker = LevelTracker::default();
        tracker.bind(Some(id(1)));
        tracker.define_level(0, 16, 16);
        tracker.bind(Some(id(2)));
        tracker.define_level(0, 4, 4);

        assert_eq!(tracker.extent(0).unwrap(), Extent::new(4, 4));
        tracker.bind(Some(id(1)));
        assert_eq!(tracker.extent(0).unwrap(), Extent::new(16, 16));

        tracker.bind(None);
        assert!(matches!(tracker.extent(0), Err(RendererError::NotLoaded)));
    }

    #[test]
    fn test_deleted_texture_forgets_levels() {
        let mut tracker = LevelTracker::default();
        tracker.bind(Some(id(1)));
        tracker.define_storage(3, 8, 8);
        tracker.forget(id(1));

        assert!(tracker.textures.is_empty());
        tracker.bind(Some(id(1)));
        assert!(matches!(tracker.extent(0), Err(RendererError::ResourceNotFound(_))));
    }

    #[test]
    fn test_failed_query_reads_as_zero() {
        let failed = Err(RendererError::Allocation("glGetIntegerv".into()));
        assert_eq!(or_default(failed, 4096), 0);
        assert_eq!(or_default(Ok(()), 4096), 4096);
    }
}
