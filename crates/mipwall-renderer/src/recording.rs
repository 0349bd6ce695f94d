//! Recording Backend
//!
//! A software stand-in for the GPU. It keeps every texture's level extents,
//! records each call in order, and can be told to fail specific uploads.
//! Used for headless planning and for tests.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::sync::Arc;

use glam::Mat4;
use mipwall_core::PixelFormat;
use parking_lot::Mutex;

use crate::gpu::{
    Capabilities, Extent, MemoryQuery, SamplingParams, TextureApi, TextureId, UniformLocation,
    UniformSink,
};
use crate::{RendererError, RendererResult};

/// One recorded GPU call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(TextureId),
    Delete(TextureId),
    Bind(Option<TextureId>),
    ActiveUnit(u32),
    SetSampling(SamplingParams),
    AllocateStorage {
        levels: u32,
        width: u32,
        height: u32,
    },
    SubImage {
        level: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    Image {
        level: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    GenerateMipmap,
    WriteMat4 {
        location: UniformLocation,
        value: Mat4,
    },
}

/// What a level currently holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelRecord {
    pub extent: Extent,
    /// First pixel of the uploaded data; `None` for storage not yet filled
    pub first_pixel: Option<[u8; 4]>,
}

/// State of one live texture
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedTexture {
    /// Levels allocated by immutable storage, zero for mutable textures
    pub storage_levels: u32,
    pub sampling: Option<SamplingParams>,
    pub levels: BTreeMap<u32, LevelRecord>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u32,
    calls: Vec<Call>,
    textures: HashMap<TextureId, RecordedTexture>,
    bound: Option<TextureId>,
    active_unit: u32,
    fail_create: bool,
    fail_level: Option<u32>,
    vendor: String,
    integers: HashMap<u32, Vec<i32>>,
}

/// Cloneable handle to a shared recording device
#[derive(Debug, Clone)]
pub struct RecordingGpu {
    caps: Capabilities,
    state: Arc<Mutex<State>>,
}

impl RecordingGpu {
    /// A device with immutable storage support
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::default())
    }

    /// A device with the given features
    pub fn with_capabilities(caps: Capabilities) -> Self {
        Self {
            caps,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls; texture state is kept
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Snapshot of a live texture
    pub fn texture(&self, id: TextureId) -> Option<RecordedTexture> {
        self.state.lock().textures.get(&id).cloned()
    }

    /// Number of textures created and not yet deleted
    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// Currently bound texture
    pub fn bound(&self) -> Option<TextureId> {
        self.state.lock().bound
    }

    /// Currently active texture unit
    pub fn active_unit(&self) -> u32 {
        self.state.lock().active_unit
    }

    /// Make the next `create_texture` calls fail
    pub fn fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    /// Make uploads to `level` fail
    pub fn fail_level_upload(&self, level: u32) {
        self.state.lock().fail_level = Some(level);
    }

    /// Set the vendor string reported to the memory probe
    pub fn set_vendor(&self, vendor: impl Into<String>) {
        self.state.lock().vendor = vendor.into();
    }

    /// Set the values reported for an integer query
    pub fn set_integers(&self, pname: u32, values: &[i32]) {
        self.state.lock().integers.insert(pname, values.to_vec());
    }

    fn upload_level(
        &self,
        level: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &[u8],
        immutable: bool,
    ) -> RendererResult<()> {
        let mut state = self.state.lock();
        state.calls.push(if immutable {
            Call::SubImage {
                level,
                width,
                height,
                format,
            }
        } else {
            Call::Image {
                level,
                width,
                height,
                format,
            }
        });

        if state.fail_level == Some(level) {
            return Err(RendererError::Allocation(format!(
                "upload of level {} rejected",
                level
            )));
        }
        let extent = Extent::new(width, height);
        if extent.byte_len() == 0 {
            return Err(RendererError::Allocation(format!(
                "level {} has zero extent {}",
                level, extent
            )));
        }
        if pixels.len() < extent.byte_len() {
            return Err(RendererError::InvalidPixelData {
                expected: extent.byte_len(),
                actual: pixels.len(),
            });
        }

        let bound = bound_texture(&state)?;
        let texture = state
            .textures
            .get_mut(&bound)
            .ok_or_else(|| RendererError::Allocation("bound texture was deleted".to_string()))?;

        if immutable {
            let expected = texture.levels.get(&level).map(|l| l.extent);
            if expected != Some(extent) {
                return Err(RendererError::Allocation(format!(
                    "sub-image {} does not match storage level {} ({:?})",
                    extent, level, expected
                )));
            }
        } else if texture.storage_levels > 0 {
            return Err(RendererError::Allocation(
                "cannot respecify an immutable texture".to_string(),
            ));
        }

        let mut first = [0u8; 4];
        first.copy_from_slice(&pixels[..4]);
        texture.levels.insert(
            level,
            LevelRecord {
                extent,
                first_pixel: Some(first),
            },
        );
        Ok(())
    }
}

impl Default for RecordingGpu {
    fn default() -> Self {
        Self::new()
    }
}

fn bound_texture(state: &State) -> RendererResult<TextureId> {
    state
        .bound
        .ok_or_else(|| RendererError::Allocation("no texture bound".to_string()))
}

impl TextureApi for RecordingGpu {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn create_texture(&self) -> RendererResult<TextureId> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(RendererError::Allocation("texture creation rejected".to_string()));
        }
        state.next_id += 1;
        let id = NonZeroU32::new(state.next_id)
            .map(TextureId)
            .ok_or_else(|| RendererError::Allocation("texture names exhausted".to_string()))?;
        state.textures.insert(id, RecordedTexture::default());
        state.calls.push(Call::Create(id));
        Ok(id)
    }

    fn delete_texture(&self, id: TextureId) {
        let mut state = self.state.lock();
        state.calls.push(Call::Delete(id));
        state.textures.remove(&id);
        if state.bound == Some(id) {
            state.bound = None;
        }
    }

    fn bind_texture(&self, id: Option<TextureId>) {
        let mut state = self.state.lock();
        state.calls.push(Call::Bind(id));
        state.bound = id;
    }

    fn active_texture_unit(&self, unit: u32) {
        let mut state = self.state.lock();
        state.calls.push(Call::ActiveUnit(unit));
        state.active_unit = unit;
    }

    fn set_sampling(&self, params: &SamplingParams) -> RendererResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::SetSampling(*params));
        let bound = bound_texture(&state)?;
        if let Some(texture) = state.textures.get_mut(&bound) {
            texture.sampling = Some(*params);
        }
        Ok(())
    }

    fn allocate_storage(&self, levels: u32, width: u32, height: u32) -> RendererResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::AllocateStorage {
            levels,
            width,
            height,
        });
        if levels == 0 || width == 0 || height == 0 {
            return Err(RendererError::Allocation(format!(
                "invalid storage: {} levels of {}x{}",
                levels, width, height
            )));
        }
        let max_levels = width.max(height).ilog2() + 1;
        if levels > max_levels {
            return Err(RendererError::Allocation(format!(
                "{} levels requested, {}x{} allows {}",
                levels, width, height, max_levels
            )));
        }

        let bound = bound_texture(&state)?;
        let texture = state
            .textures
            .get_mut(&bound)
            .ok_or_else(|| RendererError::Allocation("bound texture was deleted".to_string()))?;
        if texture.storage_levels > 0 {
            return Err(RendererError::Allocation(
                "storage already allocated".to_string(),
            ));
        }
        texture.storage_levels = levels;
        for level in 0..levels {
            texture.levels.insert(
                level,
                LevelRecord {
                    extent: Extent::new((width >> level).max(1), (height >> level).max(1)),
                    first_pixel: None,
                },
            );
        }
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
        self.upload_level(level, width, height, format, pixels, true)
    }

    fn image(
        &self,
        level: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &[u8],
    ) -> RendererResult<()> {
        self.upload_level(level, width, height, format, pixels, false)
    }

    fn generate_mipmap(&self) -> RendererResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::GenerateMipmap);
        let bound = bound_texture(&state)?;
        let texture = state
            .textures
            .get_mut(&bound)
            .ok_or_else(|| RendererError::Allocation("bound texture was deleted".to_string()))?;
        let base = texture
            .levels
            .get(&0)
            .map(|l| l.extent)
            .ok_or_else(|| RendererError::Allocation("level 0 is undefined".to_string()))?;

        let max_level = texture
            .sampling
            .map(|s| s.max_level)
            .unwrap_or_else(|| base.width.max(base.height).ilog2());
        for level in 1..=max_level {
            let extent = Extent::new((base.width >> level).max(1), (base.height >> level).max(1));
            texture.levels.insert(
                level,
                LevelRecord {
                    extent,
                    first_pixel: None,
                },
            );
        }
        Ok(())
    }

    fn level_extent(&self, level: u32) -> RendererResult<Extent> {
        let state = self.state.lock();
        let bound = bound_texture(&state)?;
        state
            .textures
            .get(&bound)
            .and_then(|t| t.levels.get(&level))
            .map(|l| l.extent)
            .ok_or_else(|| RendererError::ResourceNotFound(format!("level {}", level)))
    }
}

impl UniformSink for RecordingGpu {
    fn write_mat4(&self, location: UniformLocation, value: &Mat4) {
        self.state.lock().calls.push(Call::WriteMat4 {
            location,
            value: *value,
        });
    }
}

impl MemoryQuery for RecordingGpu {
    fn vendor(&self) -> String {
        self.state.lock().vendor.clone()
    }

    fn integer(&self, pname: u32) -> i32 {
        self.state
            .lock()
            .integers
            .get(&pname)
            .and_then(|v| v.first().copied())
            .unwrap_or(0)
    }

    fn integers(&self, pname: u32, out: &mut [i32]) {
        let state = self.state.lock();
        let values = state.integers.get(&pname).map(Vec::as_slice).unwrap_or(&[]);
        for (slot, value) in out.iter_mut().zip(values.iter().chain(std::iter::repeat(&0))) {
            *slot = *value;
        }
    }
}
