//! Math utilities
//!
//! Re-exports from glam and the placement math for aspect-correct quads.

pub use glam::{Mat4, Vec2, Vec3};

/// Ratio of width to height, as a real value.
///
/// A zero height yields `f32::INFINITY`; callers only ask for the aspect of
/// images that decoded with nonzero extents.
pub fn image_aspect(width: u32, height: u32) -> f32 {
    width as f32 / height as f32
}

/// Scale after aspect correction.
///
/// In arrange mode the base scale is used verbatim. Otherwise the viewport
/// orientation picks the axis: a landscape viewport widens x by the image
/// aspect, a portrait or square one shrinks y by it.
pub fn aspect_corrected_scale(
    base: Vec2,
    window_aspect: f32,
    image_aspect: f32,
    arrange_mode: bool,
) -> Vec2 {
    if arrange_mode {
        return base;
    }

    if window_aspect > 1.0 {
        Vec2::new(base.x * image_aspect, base.y)
    } else {
        Vec2::new(base.x, base.y / image_aspect)
    }
}

/// Model matrix: scale first, then translate in the scaled frame.
///
/// Matches `translate(scale(identity, s), p)`, so the position is itself
/// scaled by `s` when the matrix is applied.
pub fn model_matrix(scale: Vec2, position: Vec3) -> Mat4 {
    Mat4::from_scale(Vec3::new(scale.x, scale.y, 1.0)) * Mat4::from_translation(position)
}

/// World placement of a quad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Aspect ratio of the containing viewport
    pub window_aspect: f32,
    /// World-space position
    pub position: Vec3,
    /// Base scale before aspect correction
    pub scale: Vec2,
}

impl Placement {
    /// Create a new placement
    pub fn new(window_aspect: f32, position: Vec3, scale: Vec2) -> Self {
        Self {
            window_aspect,
            position,
            scale,
        }
    }

    /// Scale for an image of the given extent
    pub fn corrected_scale(&self, width: u32, height: u32, arrange_mode: bool) -> Vec2 {
        aspect_corrected_scale(
            self.scale,
            self.window_aspect,
            image_aspect(width, height),
            arrange_mode,
        )
    }

    /// Model matrix for an image of the given extent
    pub fn model(&self, width: u32, height: u32, arrange_mode: bool) -> Mat4 {
        model_matrix(self.corrected_scale(width, height, arrange_mode), self.position)
    }

    /// Model-view matrix for the current frame's view
    pub fn model_view(&self, view: Mat4, width: u32, height: u32, arrange_mode: bool) -> Mat4 {
        view * self.model(width, height, arrange_mode)
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            window_aspect: 1.0,
            position: Vec3::ZERO,
            scale: Vec2::ONE,
        }
    }
}
