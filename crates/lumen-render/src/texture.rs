// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Capabilities requested for a texture. Image usage and view aspects are
    /// derived from these.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureFlags: u32 {
        const SAMPLED = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const DEPTH = 1 << 2;
        const STENCIL = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ImageAspects: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextureError {
    #[error("render target cannot be combined with depth/stencil ({0:?})")]
    ConflictingFlags(TextureFlags),
    #[error("flags {0:?} give the image view no aspect")]
    NoViewAspect(TextureFlags),
    #[error("texture extent {width}x{height}x{depth} has a zero dimension")]
    ZeroExtent { width: u32, height: u32, depth: u32 },
    #[error("format {format:?} cannot carry flags {flags:?}")]
    FormatMismatch {
        format: TextureFormat,
        flags: TextureFlags,
    },
    #[error("sample count {0} is not supported")]
    UnsupportedSampleCount(u32),
}

/// A validated flag set. Construction rejects `RENDER_TARGET` together with
/// `DEPTH` or `STENCIL`, and sets with no view aspect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureUsage(TextureFlags);

impl TextureUsage {
    pub fn new(flags: TextureFlags) -> Result<Self, TextureError> {
        if flags.contains(TextureFlags::RENDER_TARGET)
            && flags.intersects(TextureFlags::DEPTH | TextureFlags::STENCIL)
        {
            return Err(TextureError::ConflictingFlags(flags));
        }
        let usage = Self(flags);
        if usage.aspects().is_empty() {
            return Err(TextureError::NoViewAspect(flags));
        }
        Ok(usage)
    }

    /// Add capabilities, re-running validation on the combined set.
    pub fn with(self, extra: TextureFlags) -> Result<Self, TextureError> {
        Self::new(self.0 | extra)
    }

    pub fn flags(self) -> TextureFlags {
        self.0
    }

    pub fn is_depth_stencil(self) -> bool {
        self.0.intersects(TextureFlags::DEPTH | TextureFlags::STENCIL)
    }

    pub fn aspects(self) -> ImageAspects {
        let mut aspects = ImageAspects::empty();
        if self.0.contains(TextureFlags::RENDER_TARGET) {
            aspects |= ImageAspects::COLOR;
        }
        if self.0.contains(TextureFlags::SAMPLED) && !self.is_depth_stencil() {
            aspects |= ImageAspects::COLOR;
        }
        if self.0.contains(TextureFlags::DEPTH) {
            aspects |= ImageAspects::DEPTH;
        }
        if self.0.contains(TextureFlags::STENCIL) {
            aspects |= ImageAspects::STENCIL;
        }
        aspects
    }
}

impl TryFrom<TextureFlags> for TextureUsage {
    type Error = TextureError;

    fn try_from(flags: TextureFlags) -> Result<Self, TextureError> {
        Self::new(flags)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    R8G8B8A8Srgb,
    D32Sfloat,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> u32 {
        4
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::D32Sfloat)
    }

    /// Color formats take no depth/stencil flags; `D32Sfloat` needs `DEPTH`
    /// and has no stencil bits.
    fn accepts(self, usage: TextureUsage) -> bool {
        let flags = usage.flags();
        match self {
            TextureFormat::R8G8B8A8Srgb => !usage.is_depth_stencil(),
            TextureFormat::D32Sfloat => {
                flags.contains(TextureFlags::DEPTH) && !flags.contains(TextureFlags::STENCIL)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleCount {
    #[default]
    X1,
    X2,
    X4,
}

impl SampleCount {
    pub fn count(self) -> u32 {
        match self {
            SampleCount::X1 => 1,
            SampleCount::X2 => 2,
            SampleCount::X4 => 4,
        }
    }
}

/// Where an allocation should live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryUsage {
    /// Device-local, never mapped.
    #[default]
    GpuOnly,
    /// Host-visible and coherent, written by the CPU every frame.
    CpuToGpu,
    /// Host-visible and coherent, used as a transfer source.
    CpuOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub samples: SampleCount,
    pub memory: MemoryUsage,
}

impl TextureDesc {
    /// Validated 2D (`depth == 1`) texture description.
    pub fn new(
        width: u32,
        height: u32,
        format: TextureFormat,
        flags: TextureFlags,
    ) -> Result<Self, TextureError> {
        let desc = Self {
            width,
            height,
            depth: 1,
            format,
            usage: TextureUsage::new(flags)?,
            samples: SampleCount::X1,
            memory: MemoryUsage::GpuOnly,
        };
        desc.validate()?;
        Ok(desc)
    }

    /// An sRGB color texture filled through a staging copy and then sampled.
    pub fn sampled_rgba(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
            format: TextureFormat::R8G8B8A8Srgb,
            usage: TextureUsage(TextureFlags::SAMPLED | TextureFlags::TRANSFER_DST),
            samples: SampleCount::X1,
            memory: MemoryUsage::GpuOnly,
        }
    }

    pub fn validate(&self) -> Result<(), TextureError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(TextureError::ZeroExtent {
                width: self.width,
                height: self.height,
                depth: self.depth,
            });
        }
        // re-check: the fields are public
        let usage = TextureUsage::new(self.usage.flags())?;
        if !self.format.accepts(usage) {
            return Err(TextureError::FormatMismatch {
                format: self.format,
                flags: usage.flags(),
            });
        }
        Ok(())
    }

    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
            * self.format.bytes_per_texel() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampled_transfer_dst_rejects_depth() {
        let color = TextureFlags::SAMPLED | TextureFlags::TRANSFER_DST;
        assert!(TextureDesc::new(64, 64, TextureFormat::R8G8B8A8Srgb, color).is_ok());

        let err = TextureDesc::new(
            64,
            64,
            TextureFormat::R8G8B8A8Srgb,
            color | TextureFlags::DEPTH,
        )
        .unwrap_err();
        assert!(matches!(err, TextureError::FormatMismatch { .. }));

        let usage = TextureUsage::new(color).unwrap();
        let with_rt = usage.with(TextureFlags::RENDER_TARGET | TextureFlags::DEPTH);
        assert!(matches!(with_rt, Err(TextureError::ConflictingFlags(_))));
    }

    #[test]
    fn depth_format_needs_depth_flag() {
        let ok = TextureDesc::new(
            32,
            32,
            TextureFormat::D32Sfloat,
            TextureFlags::DEPTH | TextureFlags::SAMPLED,
        )
        .unwrap();
        assert_eq!(ok.usage.aspects(), ImageAspects::DEPTH);

        let err = TextureDesc::new(32, 32, TextureFormat::D32Sfloat, TextureFlags::SAMPLED);
        assert!(matches!(err, Err(TextureError::FormatMismatch { .. })));
        let err = TextureDesc::new(
            32,
            32,
            TextureFormat::D32Sfloat,
            TextureFlags::DEPTH | TextureFlags::STENCIL,
        );
        assert!(matches!(err, Err(TextureError::FormatMismatch { .. })));
    }

    #[test]
    fn render_target_with_stencil_is_rejected() {
        let err = TextureUsage::new(TextureFlags::RENDER_TARGET | TextureFlags::STENCIL).unwrap_err();
        assert_eq!(
            err,
            TextureError::ConflictingFlags(TextureFlags::RENDER_TARGET | TextureFlags::STENCIL)
        );
    }

    #[test]
    fn sampled_color_texture_has_only_color_aspect() {
        let usage = TextureUsage::try_from(TextureFlags::SAMPLED | TextureFlags::TRANSFER_DST).unwrap();
        assert_eq!(usage.aspects(), ImageAspects::COLOR);
        assert!(!usage.aspects().intersects(ImageAspects::DEPTH | ImageAspects::STENCIL));
    }

    #[test]
    fn sampled_depth_stencil_drops_color() {
        let usage = TextureUsage::new(
            TextureFlags::SAMPLED | TextureFlags::DEPTH | TextureFlags::STENCIL,
        )
        .unwrap();
        assert_eq!(usage.aspects(), ImageAspects::DEPTH | ImageAspects::STENCIL);
    }

    #[test]
    fn transfer_only_has_no_view() {
        let err = TextureUsage::new(TextureFlags::TRANSFER_SRC).unwrap_err();
        assert!(matches!(err, TextureError::NoViewAspect(_)));
    }

    #[test]
    fn zero_extent_fails_validation() {
        let mut desc = TextureDesc::sampled_rgba(256, 256);
        assert!(desc.validate().is_ok());
        assert_eq!(desc.byte_size(), 256 * 256 * 4);
        desc.height = 0;
        assert!(matches!(desc.validate(), Err(TextureError::ZeroExtent { .. })));
    }
}
