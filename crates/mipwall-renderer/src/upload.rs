//! Texture Upload
//!
//! Moves decoded pixels, and optionally the marker chain, into a GPU texture.
//! Two allocation paths exist: immutable storage sized for the whole pyramid
//! up front, or independent per-level images.

use mipwall_assets::DecodedImage;
use mipwall_core::{PixelFormat, UploadPreference};

use crate::gpu::{Capabilities, Extent, SamplingParams, TextureApi, TextureId};
use crate::mip::{MarkerChain, marker_index};
use crate::{RendererError, RendererResult};

/// Number of levels the texture is allocated with.
///
/// `floor(log2(min(width, height)))` when mipmapping, else 1. Never less than
/// one so a 1-pixel-wide image still gets a valid allocation.
pub fn level_count(width: u32, height: u32, use_mipmap: bool) -> u32 {
    if !use_mipmap {
        return 1;
    }
    width.min(height).max(1).ilog2().max(1)
}

/// Levels 1.. filled from the marker chain.
///
/// Each level halves the previous one (integer division) starting from half
/// the source extent, and the walk stops as soon as either side is no longer
/// greater than one; that level is not uploaded.
pub fn manual_level_schedule(width: u32, height: u32) -> Vec<(u32, Extent)> {
    let mut schedule = Vec::new();
    let (mut w, mut h) = (width / 2, height / 2);
    let mut level = 0;
    while w > 1 && h > 1 {
        level += 1;
        schedule.push((level, Extent::new(w, h)));
        w /= 2;
        h /= 2;
    }
    schedule
}

/// Allocation path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Pre-allocate every level, then fill with sub-image uploads
    ImmutableStorage,
    /// Allocate and fill each level independently
    MutableImage,
}

impl UploadStrategy {
    /// Pick the path for a device, honoring an explicit preference
    pub fn select(preference: UploadPreference, caps: &Capabilities) -> RendererResult<Self> {
        match preference {
            UploadPreference::Auto if caps.texture_storage => Ok(Self::ImmutableStorage),
            UploadPreference::Auto => Ok(Self::MutableImage),
            UploadPreference::Immutable if caps.texture_storage => Ok(Self::ImmutableStorage),
            UploadPreference::Immutable => Err(RendererError::UnsupportedCapability(
                "immutable texture storage".to_string(),
            )),
            UploadPreference::Mutable => Ok(Self::MutableImage),
        }
    }
}

/// Where the bytes of a level come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSource {
    /// The decoded image
    Image,
    /// A marker image, by palette index
    Marker(usize),
}

/// One level upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelUpload {
    pub level: u32,
    pub extent: Extent,
    pub source: LevelSource,
}

/// Everything the upload will do, computed before any GPU call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    pub strategy: UploadStrategy,
    /// Levels allocated by immutable storage, and the sampler's level range
    pub levels: u32,
    pub sampling: SamplingParams,
    pub uploads: Vec<LevelUpload>,
    /// Driver builds levels 1.. after level 0
    pub generate_mipmap: bool,
}

impl UploadPlan {
    /// Plan the upload of a `width` x `height` image
    pub fn new(
        strategy: UploadStrategy,
        width: u32,
        height: u32,
        use_mipmap: bool,
        use_manual_mipmap: bool,
    ) -> Self {
        let levels = level_count(width, height, use_mipmap);
        let mut uploads = vec![LevelUpload {
            level: 0,
            extent: Extent::new(width, height),
            source: LevelSource::Image,
        }];

        let manual = use_mipmap && use_manual_mipmap;
        if manual {
            uploads.extend(manual_level_schedule(width, height).into_iter().map(
                |(level, extent)| LevelUpload {
                    level,
                    extent,
                    source: LevelSource::Marker(marker_index(level)),
                },
            ));
        }

        Self {
            strategy,
            levels,
            sampling: SamplingParams::for_levels(levels, use_mipmap),
            uploads,
            generate_mipmap: use_mipmap && !manual,
        }
    }

    /// Largest marker-backed level, if any
    pub fn largest_marker_level(&self) -> Option<Extent> {
        self.uploads
            .iter()
            .find(|u| matches!(u.source, LevelSource::Marker(_)))
            .map(|u| u.extent)
    }
}

/// Handle and shape of a finished upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadedTexture {
    pub id: TextureId,
    pub levels: u32,
    pub extent: Extent,
}

/// Check pixel data before anything touches the GPU
pub fn validate_image(image: &DecodedImage) -> RendererResult<()> {
    if image.is_empty() {
        return Err(RendererError::EmptyImage);
    }
    let expected = image.expected_len();
    if image.pixels.len() < expected {
        return Err(RendererError::InvalidPixelData {
            expected,
            actual: image.pixels.len(),
        });
    }
    Ok(())
}

/// Run a plan against the GPU.
///
/// Validation happens first; no texture is created for bad input. If any GPU
/// call fails after creation the texture is deleted before the error is
/// returned.
pub fn execute<G: TextureApi + ?Sized>(
    api: &G,
    plan: &UploadPlan,
    image: &DecodedImage,
    format: PixelFormat,
    markers: Option<&MarkerChain>,
) -> RendererResult<UploadedTexture> {
    validate_image(image)?;

    let caps = api.capabilities();
    if image.width > caps.max_texture_size || image.height > caps.max_texture_size {
        return Err(RendererError::Allocation(format!(
            "{}x{} exceeds the device limit of {}",
            image.width, image.height, caps.max_texture_size
        )));
    }
    if plan.strategy == UploadStrategy::ImmutableStorage && !caps.texture_storage {
        return Err(RendererError::UnsupportedCapability(
            "immutable texture storage".to_string(),
        ));
    }
    if let Some(largest) = plan.largest_marker_level() {
        let chain = markers.ok_or(RendererError::MissingMarkers)?;
        if !chain.covers(largest) {
            return Err(RendererError::InvalidPixelData {
                expected: largest.byte_len(),
                actual: chain.for_level(1).len(),
            });
        }
    }

    let id = api.create_texture()?;
    api.bind_texture(Some(id));
    let result = fill(api, plan, image, format, markers);
    api.bind_texture(None);

    match result {
        Ok(()) => {
            log::debug!(
                "Uploaded texture {} ({}x{}, {} levels, {:?})",
                id.get(),
                image.width,
                image.height,
                plan.levels,
                plan.strategy
            );
            Ok(UploadedTexture {
                id,
                levels: plan.levels,
                extent: Extent::new(image.width, image.height),
            })
        }
        Err(e) => {
            log::error!("Texture upload failed, releasing texture {}: {}", id.get(), e);
            api.delete_texture(id);
            Err(e)
        }
    }
}

fn fill<G: TextureApi + ?Sized>(
    api: &G,
    plan: &UploadPlan,
    image: &DecodedImage,
    format: PixelFormat,
    markers: Option<&MarkerChain>,
) -> RendererResult<()> {
    api.set_sampling(&plan.sampling)?;

    if plan.strategy == UploadStrategy::ImmutableStorage {
        api.allocate_storage(plan.levels, image.width, image.height)?;
    }

    for upload in &plan.uploads {
        let Extent { width, height } = upload.extent;
        let (bytes, level_format) = match upload.source {
            LevelSource::Image => (&image.pixels[..upload.extent.byte_len()], format),
            LevelSource::Marker(index) => {
                let chain = markers.ok_or(RendererError::MissingMarkers)?;
                (
                    &chain.levels()[index][..upload.extent.byte_len()],
                    PixelFormat::Rgba,
                )
            }
        };

        match plan.strategy {
            UploadStrategy::ImmutableStorage => {
                api.sub_image(upload.level, width, height, level_format, bytes)?
            }
            UploadStrategy::MutableImage => {
                api.image(upload.level, width, height, level_format, bytes)?
            }
        }
        log::debug!("Uploaded level {} ({})", upload.level, upload.extent);
    }

    if plan.generate_mipmap {
        api.generate_mipmap()?;
    }
    Ok(())
}
