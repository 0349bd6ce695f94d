//! Textured Quad
//!
//! One image-backed (or host-fed) quad: owns a single GPU texture, drives the
//! decode -> marker -> upload pipeline on load, and publishes an
//! aspect-correct model-view matrix every frame.

use std::path::{Path, PathBuf};

use glam::{Mat4, Vec2};
use mipwall_assets::{DecodedImage, ImageSource};
use mipwall_core::{Placement, QuadConfig};

use crate::gpu::{Extent, TextureApi, TextureId, UniformLocation, UniformSink};
use crate::mip::{MARKER_LEVELS, MarkerChain, MipSynthesizer};
use crate::upload::{self, UploadPlan, UploadStrategy, UploadedTexture};
use crate::{RendererError, RendererResult};

/// Where a quad is in its load lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Unloaded,
    Decoding,
    Uploading,
    Ready,
    Failed,
}

/// A quad displaying one texture.
///
/// Not thread-safe; every call must come from the thread owning the GPU
/// context. Dropping the quad releases its texture.
pub struct TexturedQuad<G: TextureApi> {
    gpu: G,
    source_path: Option<PathBuf>,
    placement: Placement,
    config: QuadConfig,
    image: Option<DecodedImage>,
    extent: Option<Extent>,
    markers: Option<MarkerChain>,
    texture: Option<UploadedTexture>,
    state: LoadState,
    uniform_modelview: UniformLocation,
}

impl<G: TextureApi> TexturedQuad<G> {
    /// Quad backed by the image at `path`
    pub fn new(gpu: G, path: impl Into<PathBuf>, placement: Placement, config: QuadConfig) -> Self {
        Self::build(gpu, Some(path.into()), placement, config)
    }

    /// Quad whose pixels are pushed by the host through [`Self::set_pixels`]
    pub fn procedural(gpu: G, placement: Placement, config: QuadConfig) -> Self {
        Self::build(gpu, None, placement, config)
    }

    fn build(
        gpu: G,
        source_path: Option<PathBuf>,
        placement: Placement,
        config: QuadConfig,
    ) -> Self {
        let mut quad = Self {
            gpu,
            source_path,
            placement,
            config,
            image: None,
            extent: None,
            markers: None,
            texture: None,
            state: LoadState::Unloaded,
            uniform_modelview: UniformLocation(0),
        };
        if quad.config.wants_manual_mips() {
            quad.ensure_markers();
        }
        quad
    }

    fn ensure_markers(&mut self) {
        if self.markers.is_none() {
            let synth = MipSynthesizer::new(self.config.marker_dimension);
            log::info!(
                "Generating false color mips, {} levels of {}x{}",
                MARKER_LEVELS,
                synth.dimension(),
                synth.dimension()
            );
            self.markers = Some(synth.generate());
        }
    }

    /// Same as [`Self::load`]
    pub fn setup(&mut self, source: &dyn ImageSource) -> RendererResult<UploadedTexture> {
        self.load(source)
    }

    /// Decode if needed, then upload into a fresh texture.
    ///
    /// Cached pixels skip the decode. A texture from an earlier load is
    /// released first. On failure the quad is left without a texture and may
    /// be loaded again later.
    pub fn load(&mut self, source: &dyn ImageSource) -> RendererResult<UploadedTexture> {
        self.release_texture();
        if self.image.is_none() {
            self.state = LoadState::Decoding;
            if let Err(e) = self.decode(source) {
                log::warn!("No image data: {}", e);
                self.state = LoadState::Failed;
                return Err(e);
            }
        }

        self.state = LoadState::Uploading;
        match self.upload() {
            Ok(uploaded) => {
                self.texture = Some(uploaded);
                self.state = LoadState::Ready;
                if self.config.release_host_pixels {
                    self.image = None;
                }
                Ok(uploaded)
            }
            Err(e) => {
                log::error!("Texture load failed: {}", e);
                self.state = LoadState::Failed;
                Err(e)
            }
        }
    }

    fn decode(&mut self, source: &dyn ImageSource) -> RendererResult<()> {
        let path = self.source_path.as_deref().ok_or(RendererError::EmptyImage)?;
        let decoded = source.decode(path)?;
        if decoded.is_empty() {
            return Err(RendererError::EmptyImage);
        }
        self.set_pixels(decoded);
        Ok(())
    }

    fn upload(&mut self) -> RendererResult<UploadedTexture> {
        let caps = self.gpu.capabilities();
        let strategy = UploadStrategy::select(self.config.upload, &caps)?;
        if self.config.wants_manual_mips() {
            self.ensure_markers();
        }

        let image = self.image.as_ref().ok_or(RendererError::EmptyImage)?;
        let plan = UploadPlan::new(
            strategy,
            image.width,
            image.height,
            self.config.use_mipmap,
            self.config.use_manual_mipmap,
        );
        upload::execute(
            &self.gpu,
            &plan,
            image,
            self.config.source_format,
            self.markers.as_ref(),
        )
    }

    fn release_texture(&mut self) {
        if let Some(texture) = self.texture.take() {
            self.gpu.delete_texture(texture.id);
        }
    }

    /// Release the texture; cached pixels stay. A no-op when nothing is loaded.
    pub fn unload(&mut self) {
        self.release_texture();
        self.state = LoadState::Unloaded;
    }

    /// Provide pixel data directly, replacing any cached image
    pub fn set_pixels(&mut self, image: DecodedImage) {
        self.extent = Some(Extent::new(image.width, image.height));
        self.image = Some(image);
    }

    /// Scale after aspect correction for the loaded image
    pub fn corrected_scale(&self) -> RendererResult<Vec2> {
        let extent = self.loaded_extent()?;
        Ok(self
            .placement
            .corrected_scale(extent.width, extent.height, self.config.arrange_mode))
    }

    /// Compute this frame's model-view matrix and write it to the shader
    pub fn update<S: UniformSink + ?Sized>(&self, view: Mat4, sink: &S) -> RendererResult<Mat4> {
        let extent = self.loaded_extent()?;
        let model_view = self.placement.model_view(
            view,
            extent.width,
            extent.height,
            self.config.arrange_mode,
        );
        sink.write_mat4(self.uniform_modelview, &model_view);
        Ok(model_view)
    }

    /// Make this texture current on unit 0
    pub fn bind(&self) -> RendererResult<()> {
        let id = self.texture_id().ok_or(RendererError::NotLoaded)?;
        self.gpu.active_texture_unit(0);
        self.gpu.bind_texture(Some(id));
        Ok(())
    }

    /// Clear the texture from unit 0
    pub fn unbind(&self) {
        self.gpu.active_texture_unit(0);
        self.gpu.bind_texture(None);
    }

    /// Read back a level's extent from the GPU
    pub fn level_extent(&self, level: u32) -> RendererResult<Extent> {
        let id = self.texture_id().ok_or(RendererError::NotLoaded)?;
        self.gpu.bind_texture(Some(id));
        let extent = self.gpu.level_extent(level);
        self.gpu.bind_texture(None);
        extent
    }

    fn loaded_extent(&self) -> RendererResult<Extent> {
        self.texture
            .map(|t| t.extent)
            .ok_or(RendererError::NotLoaded)
    }

    /// Shader location receiving the model-view matrix
    pub fn set_uniform_location(&mut self, location: UniformLocation) {
        self.uniform_modelview = location;
    }

    /// Load lifecycle state
    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Whether a texture is currently held
    pub fn is_loaded(&self) -> bool {
        self.texture.is_some()
    }

    /// Current texture handle
    pub fn texture_id(&self) -> Option<TextureId> {
        self.texture.map(|t| t.id)
    }

    /// Details of the current texture
    pub fn texture(&self) -> Option<&UploadedTexture> {
        self.texture.as_ref()
    }

    /// Extent of the decoded image, kept even after host pixels are released
    pub fn image_extent(&self) -> Option<Extent> {
        self.extent
    }

    /// Whether decoded pixels are cached on the host
    pub fn has_pixels(&self) -> bool {
        self.image.is_some()
    }

    /// Marker chain, when manual mips are in use
    pub fn markers(&self) -> Option<&MarkerChain> {
        self.markers.as_ref()
    }

    /// Source image path, `None` for procedural quads
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// World placement
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Texture settings
    pub fn config(&self) -> &QuadConfig {
        &self.config
    }

    /// The GPU this quad talks to
    pub fn gpu(&self) -> &G {
        &self.gpu
    }
}

impl<G: TextureApi> Drop for TexturedQuad<G> {
    fn drop(&mut self) {
        self.unload();
    }
}

impl<G: TextureApi> std::fmt::Debug for TexturedQuad<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TexturedQuad")
            .field("source_path", &self.source_path)
            .field("placement", &self.placement)
            .field("state", &self.state)
            .field("extent", &self.extent)
            .field("texture", &self.texture)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use glam::Vec3;
    use mipwall_assets::{AssetError, AssetResult};
    use mipwall_core::UploadPreference;

    use super::*;
    use crate::gpu::Capabilities;
    use crate::mip::MARKER_COLORS;
    use crate::recording::{Call, RecordingGpu};

    struct CountingSource {
        calls: Cell<usize>,
        results: RefCell<Vec<Option<DecodedImage>>>,
    }

    impl CountingSource {
        fn ok(image: DecodedImage) -> Self {
            Self::scripted(vec![Some(image)])
        }

        fn failing() -> Self {
            Self::scripted(vec![None])
        }

        /// Results are consumed in order; the last one repeats
        fn scripted(results: Vec<Option<DecodedImage>>) -> Self {
            Self {
                calls: Cell::new(0),
                results: RefCell::new(results),
            }
        }
    }

    impl ImageSource for CountingSource {
        fn decode(&self, path: &Path) -> AssetResult<DecodedImage> {
            self.calls.set(self.calls.get() + 1);
            let mut results = self.results.borrow_mut();
            let next = if results.len() > 1 {
                results.remove(0)
            } else {
                results[0].clone()
            };
            next.ok_or_else(|| AssetError::DecodeFailed {
                path: path.display().to_string(),
                reason: "corrupt".to_string(),
            })
        }
    }

    fn small_config() -> QuadConfig {
        QuadConfig {
            marker_dimension: 256,
            ..Default::default()
        }
    }

    fn manual_config() -> QuadConfig {
        QuadConfig {
            use_manual_mipmap: true,
            ..small_config()
        }
    }

    fn quad(gpu: &RecordingGpu, placement: Placement, config: QuadConfig) -> TexturedQuad<RecordingGpu> {
        TexturedQuad::new(gpu.clone(), "wall.png", placement, config)
    }

    #[test]
    fn test_load_reads_back_decoded_extent() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::ok(DecodedImage::solid(512, 256, [1, 2, 3, 255]));
        let mut quad = quad(&gpu, Placement::default(), small_config());

        let uploaded = quad.setup(&source).unwrap();
        assert_eq!(quad.state(), LoadState::Ready);
        assert_eq!(uploaded.extent, Extent::new(512, 256));
        assert_eq!(quad.level_extent(0).unwrap(), Extent::new(512, 256));
        assert_eq!(quad.image_extent(), Some(Extent::new(512, 256)));

        let texture = gpu.texture(uploaded.id).unwrap();
        assert_eq!(texture.storage_levels, 8);
        assert_eq!(texture.sampling.unwrap().max_level, 7);
    }

    #[test]
    fn test_second_load_skips_decode() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::ok(DecodedImage::solid(64, 64, [0; 4]));
        let mut quad = quad(&gpu, Placement::default(), small_config());

        let first = quad.load(&source).unwrap();
        let second = quad.load(&source).unwrap();

        assert_eq!(source.calls.get(), 1);
        assert_ne!(first.id, second.id);
        assert!(gpu.texture(first.id).is_none());
        assert_eq!(gpu.live_textures(), 1);
    }

    #[test]
    fn test_failed_decode_makes_no_gpu_calls() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::failing();
        let mut quad = quad(&gpu, Placement::default(), manual_config());

        let result = quad.load(&source);
        assert!(matches!(result, Err(RendererError::Decode(_))));
        assert_eq!(quad.state(), LoadState::Failed);
        assert_eq!(quad.texture_id(), None);
        assert!(gpu.calls().is_empty());
    }

    #[test]
    fn test_empty_decode_is_a_failure() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::ok(DecodedImage::new(Vec::new(), 0, 0));
        let mut quad = quad(&gpu, Placement::default(), small_config());

        assert!(matches!(quad.load(&source), Err(RendererError::EmptyImage)));
        assert!(!quad.has_pixels());
        assert!(gpu.calls().is_empty());
    }

    #[test]
    fn test_retry_after_failed_decode() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::scripted(vec![None, Some(DecodedImage::solid(8, 8, [0; 4]))]);
        let mut quad = quad(&gpu, Placement::default(), small_config());

        assert!(quad.load(&source).is_err());
        quad.load(&source).unwrap();
        assert_eq!(source.calls.get(), 2);
        assert_eq!(quad.state(), LoadState::Ready);
    }

    #[test]
    fn test_unload_twice_is_harmless() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::ok(DecodedImage::solid(16, 16, [0; 4]));
        let mut quad = quad(&gpu, Placement::default(), small_config());

        quad.load(&source).unwrap();
        quad.unload();
        quad.unload();

        assert_eq!(quad.state(), LoadState::Unloaded);
        assert_eq!(gpu.live_textures(), 0);
        let deletes = gpu.calls().iter().filter(|c| matches!(c, Call::Delete(_))).count();
        assert_eq!(deletes, 1);
        // pixels survive unload, so a reload does not decode again
        assert!(quad.has_pixels());
        quad.load(&source).unwrap();
        assert_eq!(source.calls.get(), 1);
    }

    #[test]
    fn test_unload_never_loaded() {
        let gpu = RecordingGpu::new();
        let mut quad = quad(&gpu, Placement::default(), small_config());
        quad.unload();
        assert!(gpu.calls().is_empty());
    }

    #[test]
    fn test_drop_releases_texture() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::ok(DecodedImage::solid(16, 16, [0; 4]));
        {
            let mut quad = quad(&gpu, Placement::default(), small_config());
            quad.load(&source).unwrap();
            assert_eq!(gpu.live_textures(), 1);
        }
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn test_update_and_bind_are_guarded() {
        let gpu = RecordingGpu::new();
        let quad = quad(&gpu, Placement::default(), small_config());

        assert!(matches!(quad.update(Mat4::IDENTITY, &gpu), Err(RendererError::NotLoaded)));
        assert!(matches!(quad.bind(), Err(RendererError::NotLoaded)));
        assert!(matches!(quad.level_extent(0), Err(RendererError::NotLoaded)));
        assert!(gpu.calls().is_empty());
    }

    #[test]
    fn test_update_landscape() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::ok(DecodedImage::solid(200, 100, [0; 4]));
        let placement = Placement::new(1.5, Vec3::new(0.0, 0.0, -1.0), Vec2::new(0.5, 0.5));
        let mut quad = quad(&gpu, placement, small_config());
        quad.set_uniform_location(UniformLocation(3));
        quad.load(&source).unwrap();
        gpu.clear_calls();

        assert_eq!(quad.corrected_scale().unwrap(), Vec2::new(1.0, 0.5));
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let mv = quad.update(view, &gpu).unwrap();

        assert_eq!(mv.transform_point3(Vec3::ZERO), Vec3::new(0.0, 0.0, -6.0));
        assert_eq!(
            gpu.calls(),
            vec![Call::WriteMat4 {
                location: UniformLocation(3),
                value: mv
            }]
        );
    }

    #[test]
    fn test_update_portrait_and_arranged() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::ok(DecodedImage::solid(200, 100, [0; 4]));
        let placement = Placement::new(0.5, Vec3::ZERO, Vec2::new(0.8, 0.8));

        let mut portrait = quad(&gpu, placement, small_config());
        portrait.load(&source).unwrap();
        assert_eq!(portrait.corrected_scale().unwrap(), Vec2::new(0.8, 0.4));

        let arranged_config = QuadConfig {
            arrange_mode: true,
            ..small_config()
        };
        let mut arranged = quad(&gpu, placement, arranged_config);
        arranged.load(&source).unwrap();
        assert_eq!(arranged.corrected_scale().unwrap(), Vec2::new(0.8, 0.8));
    }

    #[test]
    fn test_bind_and_unbind() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::ok(DecodedImage::solid(8, 8, [0; 4]));
        let mut quad = quad(&gpu, Placement::default(), small_config());
        let id = quad.load(&source).unwrap().id;
        gpu.clear_calls();

        quad.bind().unwrap();
        assert_eq!(gpu.bound(), Some(id));
        assert_eq!(gpu.active_unit(), 0);
        quad.unbind();
        assert_eq!(gpu.bound(), None);
        assert_eq!(
            gpu.calls(),
            vec![
                Call::ActiveUnit(0),
                Call::Bind(Some(id)),
                Call::ActiveUnit(0),
                Call::Bind(None)
            ]
        );
    }

    #[test]
    fn test_manual_mips_are_color_coded() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::ok(DecodedImage::solid(512, 256, [9, 9, 9, 255]));
        let mut quad = quad(&gpu, Placement::default(), manual_config());
        assert_eq!(quad.markers().unwrap().dimension(), 256);

        let id = quad.load(&source).unwrap().id;
        let texture = gpu.texture(id).unwrap();

        assert_eq!(texture.levels[&0].first_pixel, Some([9, 9, 9, 255]));
        for level in 1..=7u32 {
            assert_eq!(
                texture.levels[&level].first_pixel,
                Some(MARKER_COLORS[level as usize % 6]),
                "level {}",
                level
            );
        }
        assert_eq!(quad.level_extent(7).unwrap(), Extent::new(4, 2));
        assert!(!gpu.calls().contains(&Call::GenerateMipmap));
    }

    #[test]
    fn test_mutable_path_on_legacy_device() {
        let gpu = RecordingGpu::with_capabilities(Capabilities {
            texture_storage: false,
            ..Default::default()
        });
        let source = CountingSource::ok(DecodedImage::solid(32, 32, [0; 4]));
        let mut quad = quad(&gpu, Placement::default(), manual_config());

        quad.load(&source).unwrap();
        let calls = gpu.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::AllocateStorage { .. })));
        let images = calls.iter().filter(|c| matches!(c, Call::Image { .. })).count();
        assert_eq!(images, 5);
    }

    #[test]
    fn test_forced_immutable_on_legacy_device_fails() {
        let gpu = RecordingGpu::with_capabilities(Capabilities {
            texture_storage: false,
            ..Default::default()
        });
        let source = CountingSource::ok(DecodedImage::solid(32, 32, [0; 4]));
        let config = QuadConfig {
            upload: UploadPreference::Immutable,
            ..small_config()
        };
        let mut quad = quad(&gpu, Placement::default(), config);

        assert!(matches!(
            quad.load(&source),
            Err(RendererError::UnsupportedCapability(_))
        ));
        assert_eq!(quad.state(), LoadState::Failed);
        assert!(quad.has_pixels());
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn test_allocation_failure_leaves_quad_inert() {
        let gpu = RecordingGpu::new();
        gpu.fail_create(true);
        let source = CountingSource::ok(DecodedImage::solid(32, 32, [0; 4]));
        let mut quad = quad(&gpu, Placement::default(), small_config());

        assert!(matches!(quad.load(&source), Err(RendererError::Allocation(_))));
        assert!(!quad.is_loaded());
        assert!(matches!(quad.bind(), Err(RendererError::NotLoaded)));

        gpu.fail_create(false);
        quad.load(&source).unwrap();
        assert_eq!(source.calls.get(), 1);
    }

    #[test]
    fn test_release_host_pixels() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::ok(DecodedImage::solid(64, 32, [0; 4]));
        let config = QuadConfig {
            release_host_pixels: true,
            ..manual_config()
        };
        let mut quad = quad(&gpu, Placement::new(2.0, Vec3::ZERO, Vec2::ONE), config);

        quad.load(&source).unwrap();
        assert!(!quad.has_pixels());
        assert!(quad.markers().is_some());
        assert_eq!(quad.corrected_scale().unwrap(), Vec2::new(2.0, 1.0));

        // a second load decodes again but keeps the marker chain
        let markers = quad.markers().unwrap().clone();
        quad.load(&source).unwrap();
        assert_eq!(source.calls.get(), 2);
        assert_eq!(quad.markers(), Some(&markers));
    }

    #[test]
    fn test_failed_redecode_drops_previous_texture() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::scripted(vec![Some(DecodedImage::solid(64, 32, [0; 4])), None]);
        let config = QuadConfig {
            release_host_pixels: true,
            ..manual_config()
        };
        let mut quad = quad(&gpu, Placement::default(), config);

        quad.load(&source).unwrap();
        assert!(quad.is_loaded());

        assert!(matches!(quad.load(&source), Err(RendererError::Decode(_))));
        assert_eq!(quad.state(), LoadState::Failed);
        assert!(!quad.is_loaded());
        assert!(matches!(quad.bind(), Err(RendererError::NotLoaded)));
        assert!(matches!(quad.update(Mat4::IDENTITY, &gpu), Err(RendererError::NotLoaded)));
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn test_procedural_quad() {
        let gpu = RecordingGpu::new();
        let source = CountingSource::failing();
        let mut quad = TexturedQuad::procedural(gpu.clone(), Placement::default(), small_config());
        assert!(quad.source_path().is_none());

        assert!(matches!(quad.load(&source), Err(RendererError::EmptyImage)));
        assert_eq!(source.calls.get(), 0);

        quad.set_pixels(DecodedImage::solid(4, 4, [5, 5, 5, 5]));
        let uploaded = quad.load(&source).unwrap();
        assert_eq!(uploaded.extent, Extent::new(4, 4));
        assert_eq!(source.calls.get(), 0);
    }
}
