//! Marker Mips
//!
//! Solid-color stand-ins for a real mip chain. Each level is one flat color so
//! an operator can read off which level the sampler picked.

use mipwall_core::config::DEFAULT_MARKER_DIMENSION;

use crate::gpu::Extent;

/// Number of distinct marker images
pub const MARKER_LEVELS: usize = 6;

/// Marker colors, indexed by `level % MARKER_LEVELS`
pub const MARKER_COLORS: [[u8; 4]; MARKER_LEVELS] = [
    [255, 0, 0, 255],
    [255, 127, 0, 255],
    [255, 255, 0, 255],
    [0, 255, 0, 255],
    [0, 0, 255, 255],
    [127, 0, 255, 255],
];

/// Marker color used for a given mip level
pub fn marker_color(level: u32) -> [u8; 4] {
    MARKER_COLORS[marker_index(level)]
}

/// Index of the marker image backing a given mip level
pub fn marker_index(level: u32) -> usize {
    level as usize % MARKER_LEVELS
}

/// Generated marker images
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerChain {
    dimension: u32,
    levels: Vec<Vec<u8>>,
}

impl MarkerChain {
    /// Side length of every marker image
    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    /// All marker images in palette order
    pub fn levels(&self) -> &[Vec<u8>] {
        &self.levels
    }

    /// Marker image backing a mip level, reused cyclically
    pub fn for_level(&self, level: u32) -> &[u8] {
        &self.levels[marker_index(level)]
    }

    /// Whether a level of this extent fits inside a marker image
    pub fn covers(&self, extent: Extent) -> bool {
        extent.byte_len() <= self.for_level(0).len()
    }
}

/// Builds [`MarkerChain`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipSynthesizer {
    dimension: u32,
}

impl MipSynthesizer {
    /// Synthesizer producing `dimension` x `dimension` markers
    pub fn new(dimension: u32) -> Self {
        Self { dimension }
    }

    /// Side length of generated markers
    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    /// Bytes per marker image
    pub fn level_len(&self) -> usize {
        self.dimension as usize * self.dimension as usize * 4
    }

    /// Fill all six markers with their palette color
    pub fn generate(&self) -> MarkerChain {
        let pixel_count = self.dimension as usize * self.dimension as usize;
        let levels = MARKER_COLORS
            .iter()
            .map(|color| color.repeat(pixel_count))
            .collect();

        MarkerChain {
            dimension: self.dimension,
            levels,
        }
    }
}

impl Default for MipSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER_DIMENSION)
    }
}
