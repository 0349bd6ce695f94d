//! # Mipwall Assets
//!
//! Image sources for the texture pipeline.
//!
//! The renderer only depends on the [`ImageSource`] trait; [`ImageFileSource`]
//! is the stock implementation backed by the `image` crate.

use std::path::Path;

use thiserror::Error;

/// Asset errors
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Decode failed for {path}: {reason}")]
    DecodeFailed { path: String, reason: String },

    #[error("Image {path} has no pixels ({width}x{height})")]
    Empty {
        path: String,
        width: u32,
        height: u32,
    },
}

/// Result type for asset operations
pub type AssetResult<T> = Result<T, AssetError>;

/// Tightly packed, row-major, four bytes per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Interleaved pixel bytes
    pub pixels: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl DecodedImage {
    /// Wrap already decoded bytes
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }

    /// A single-color image, handy for placeholders
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba.repeat(width as usize * height as usize);
        Self::new(pixels, width, height)
    }

    /// Byte length a tightly packed buffer of this extent needs
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// True when there is nothing to upload
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty() || self.width == 0 || self.height == 0
    }
}

/// Decodes an encoded image into raw pixels
pub trait ImageSource {
    /// Decode the image at `path`
    fn decode(&self, path: &Path) -> AssetResult<DecodedImage>;
}

/// File decoder backed by the `image` crate; always yields RGBA8
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFileSource;

impl ImageFileSource {
    /// Create a new file source
    pub fn new() -> Self {
        Self
    }
}

impl ImageSource for ImageFileSource {
    fn decode(&self, path: &Path) -> AssetResult<DecodedImage> {
        if !path.exists() {
            return Err(AssetError::NotFound(path.display().to_string()));
        }

        let img = image::open(path).map_err(|e| AssetError::DecodeFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(AssetError::Empty {
                path: path.display().to_string(),
                width,
                height,
            });
        }

        log::debug!("Decoded {} ({}x{})", path.display(), width, height);
        Ok(DecodedImage::new(rgba.into_raw(), width, height))
    }
}

impl<T: ImageSource + ?Sized> ImageSource for &T {
    fn decode(&self, path: &Path) -> AssetResult<DecodedImage> {
        (**self).decode(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = image::RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([x as u8, y as u8, 7, 255])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_decode_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wall.png");
        write_png(&path, 16, 8);

        let decoded = ImageFileSource::new().decode(&path).unwrap();
        assert_eq!(decoded.width, 16);
        assert_eq!(decoded.height, 8);
        assert_eq!(decoded.pixels.len(), decoded.expected_len());
        // pixel (3, 2)
        let offset = (2 * 16 + 3) * 4;
        assert_eq!(&decoded.pixels[offset..offset + 4], &[3, 2, 7, 255]);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageFileSource::new().decode(&dir.path().join("nope.png"));
        assert!(matches!(result, Err(AssetError::NotFound(_))));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let result = ImageFileSource::new().decode(&path);
        assert!(matches!(result, Err(AssetError::DecodeFailed { .. })));
    }

    #[test]
    fn test_solid_image() {
        let img = DecodedImage::solid(3, 2, [1, 2, 3, 4]);
        assert_eq!(img.pixels.len(), 24);
        assert!(img.pixels.chunks_exact(4).all(|px| px == [1, 2, 3, 4]));
        assert!(!img.is_empty());
        assert!(DecodedImage::new(Vec::new(), 0, 0).is_empty());
    }
}
