// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use thiserror::Error;

pub const VERTEX_SHADER: &str = "simple.vert";
pub const FRAGMENT_SHADER: &str = "simple.frag";

/// Supplies precompiled SPIR-V by logical name (`simple.vert`, `simple.frag`).
pub trait ShaderSource {
    fn load(&self, name: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("image {width}x{height} needs {expected} RGBA8 bytes, got {actual}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("image has a zero dimension")]
    Empty,
}

/// Tightly packed RGBA8 pixels, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::Empty);
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(ImageError::SizeMismatch {
                width,
                height,
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// Two-tone checkerboard used when no texture file is configured.
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let size = size.max(1);
        let cell = cell.max(1);
        let mut rgba = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let light = ((x / cell) + (y / cell)) % 2 == 0;
                let v = if light { 0xE0 } else { 0x30 };
                rgba.extend_from_slice(&[v, v, v, 0xFF]);
            }
        }
        Self {
            width: size,
            height: size,
            rgba,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.rgba
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_pixel_buffer() {
        let err = DecodedImage::new(2, 2, vec![0; 15]).unwrap_err();
        assert_eq!(
            err,
            ImageError::SizeMismatch {
                width: 2,
                height: 2,
                expected: 16,
                actual: 15
            }
        );
        assert_eq!(DecodedImage::new(0, 4, vec![]), Err(ImageError::Empty));
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let img = DecodedImage::checkerboard(4, 2);
        assert_eq!(img.pixels().len(), 64);
        let texel = |x: usize, y: usize| img.pixels()[(y * 4 + x) * 4];
        assert_eq!(texel(0, 0), texel(1, 1));
        assert_ne!(texel(0, 0), texel(2, 0));
        assert_ne!(texel(0, 0), texel(0, 2));
        assert_eq!(texel(0, 0), texel(2, 2));
    }
}
