// SPDX-License-Identifier: CEPL-1.0
//! Textures and the sampler: flag translation, staged uploads, layout
//! transitions.
use anyhow::{anyhow, Context, Result};
use ash::{vk, Device};
use lumen_render::{
    DecodedImage, ImageAspects, SampleCount, TextureDesc, TextureError, TextureFlags,
    TextureFormat,
};
use tracing::debug;

use crate::{
    memory::{GpuImage, ImageView},
    upload::{one_shot, staging_buffer, Uploader},
    GpuError,
};

pub fn vk_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::D32Sfloat => vk::Format::D32_SFLOAT,
    }
}

pub fn image_usage(flags: TextureFlags) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::empty();
    if flags.contains(TextureFlags::SAMPLED) {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if flags.contains(TextureFlags::RENDER_TARGET) {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if flags.intersects(TextureFlags::DEPTH | TextureFlags::STENCIL) {
        usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if flags.contains(TextureFlags::TRANSFER_SRC) {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if flags.contains(TextureFlags::TRANSFER_DST) {
        usage |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    usage
}

pub fn view_aspect(aspects: ImageAspects) -> vk::ImageAspectFlags {
    let mut out = vk::ImageAspectFlags::empty();
    if aspects.contains(ImageAspects::COLOR) {
        out |= vk::ImageAspectFlags::COLOR;
    }
    if aspects.contains(ImageAspects::DEPTH) {
        out |= vk::ImageAspectFlags::DEPTH;
    }
    if aspects.contains(ImageAspects::STENCIL) {
        out |= vk::ImageAspectFlags::STENCIL;
    }
    out
}

/// Single-mip color transition for the upload path. Returns the barrier and
/// its source/destination stages.
pub fn color_transition(
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<(vk::ImageMemoryBarrier<'static>, vk::PipelineStageFlags, vk::PipelineStageFlags)> {
    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        _ => return Err(anyhow!("unsupported layout transition {old:?} -> {new:?}")),
    };
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: src_access,
        dst_access_mask: dst_access,
        old_layout: old,
        new_layout: new,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    Ok((barrier, src_stage, dst_stage))
}

pub struct Texture {
    pub view: ImageView,
    pub image: GpuImage,
}

/// Create the image and view for `desc`; with `pixels`, stage them in and
/// leave the image shader-readable.
pub unsafe fn create_texture(
    up: &Uploader<'_>,
    desc: &TextureDesc,
    pixels: Option<&[u8]>,
) -> Result<Texture> {
    desc.validate()?;
    if desc.samples != SampleCount::X1 {
        return Err(TextureError::UnsupportedSampleCount(desc.samples.count()).into());
    }
    if desc.depth != 1 {
        return Err(anyhow!("only 2D textures are supported (depth {})", desc.depth));
    }

    let format = vk_format(desc.format);
    let extent = vk::Extent2D {
        width: desc.width,
        height: desc.height,
    };
    let image = unsafe {
        up.allocator
            .create_image_2d("texture", extent, format, image_usage(desc.usage.flags()), desc.memory)?
    };

    if let Some(pixels) = pixels {
        // staged fills only handle color images
        if desc.format.is_depth() {
            return Err(GpuError::UnsupportedFormat(format).into());
        }
        if !desc.usage.flags().contains(TextureFlags::TRANSFER_DST) {
            return Err(anyhow!("texture without TRANSFER_DST cannot receive pixels"));
        }
        if pixels.len() as u64 != desc.byte_size() {
            return Err(anyhow!(
                "{} pixel bytes for a {}x{} texture ({} expected)",
                pixels.len(),
                desc.width,
                desc.height,
                desc.byte_size()
            ));
        }
        unsafe { fill_image(up, &image, pixels)? };
    }

    let view = unsafe {
        ImageView::new(up.device, image.image, format, view_aspect(desc.usage.aspects()))?
    };
    Ok(Texture { view, image })
}

unsafe fn fill_image(up: &Uploader<'_>, image: &GpuImage, pixels: &[u8]) -> Result<()> {
    let staging = unsafe { staging_buffer(up.allocator, up.families.graphics, pixels)? };
    let (to_dst, src0, dst0) = color_transition(
        image.image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;
    let (to_read, src1, dst1) = color_transition(
        image.image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )?;
    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D {
            width: image.extent.width,
            height: image.extent.height,
            depth: 1,
        },
    };

    let device: &Device = up.device;
    unsafe {
        one_shot(device, up.graphics_pool, up.graphics_queue, |cmd| {
            device.cmd_pipeline_barrier(
                cmd,
                src0,
                dst0,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_dst),
            );
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
            device.cmd_pipeline_barrier(
                cmd,
                src1,
                dst1,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_read),
            );
        })
        .context("texture upload")?;
    }
    debug!(
        "texture {}x{} uploaded ({} bytes)",
        image.extent.width,
        image.extent.height,
        pixels.len()
    );
    Ok(())
}

/// The scene texture: decoded RGBA8 pixels in an sRGB sampled image.
pub unsafe fn scene_texture(up: &Uploader<'_>, decoded: &DecodedImage) -> Result<Texture> {
    let desc = TextureDesc::sampled_rgba(decoded.width(), decoded.height());
    unsafe { create_texture(up, &desc, Some(decoded.pixels())) }
}

pub fn sampler_info(max_anisotropy: Option<f32>) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        mip_lod_bias: 0.0,
        anisotropy_enable: if max_anisotropy.is_some() { vk::TRUE } else { vk::FALSE },
        max_anisotropy: max_anisotropy.unwrap_or(1.0),
        compare_enable: vk::FALSE,
        compare_op: vk::CompareOp::ALWAYS,
        min_lod: 0.0,
        max_lod: 0.0,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        unnormalized_coordinates: vk::FALSE,
        ..Default::default()
    }
}

pub struct Sampler {
    device: Device,
    pub sampler: vk::Sampler,
}

impl Sampler {
    pub unsafe fn new(device: &Device, max_anisotropy: Option<f32>) -> Result<Self> {
        let sampler = unsafe { device.create_sampler(&sampler_info(max_anisotropy), None) }
            .context("create_sampler")?;
        Ok(Self {
            device: device.clone(),
            sampler,
        })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.sampler, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_render::TextureUsage;

    #[test]
    fn sampled_upload_texture_gets_color_only() {
        let usage = TextureUsage::new(TextureFlags::SAMPLED | TextureFlags::TRANSFER_DST).unwrap();
        assert_eq!(
            image_usage(usage.flags()),
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST
        );
        assert_eq!(view_aspect(usage.aspects()), vk::ImageAspectFlags::COLOR);
        let with_depth = TextureDesc::new(
            4,
            4,
            TextureFormat::R8G8B8A8Srgb,
            TextureFlags::SAMPLED | TextureFlags::TRANSFER_DST | TextureFlags::DEPTH,
        );
        assert!(matches!(with_depth, Err(TextureError::FormatMismatch { .. })));
    }

    #[test]
    fn depth_flags_map_to_depth_attachment() {
        let usage = TextureUsage::new(TextureFlags::DEPTH).unwrap();
        assert_eq!(
            image_usage(usage.flags()),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        );
        assert_eq!(view_aspect(usage.aspects()), vk::ImageAspectFlags::DEPTH);
        assert_eq!(vk_format(TextureFormat::D32Sfloat), vk::Format::D32_SFLOAT);
        assert_eq!(vk_format(TextureFormat::R8G8B8A8Srgb), vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn upload_transitions_use_transfer_then_fragment_stages() {
        let img = vk::Image::null();
        let (b, src, dst) = color_transition(
            img,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!((src, dst), (vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::TRANSFER));
        assert_eq!(b.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);

        let (b, src, dst) = color_transition(
            img,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!((src, dst), (vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert_eq!(b.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(b.dst_access_mask, vk::AccessFlags::SHADER_READ);

        assert!(color_transition(
            img,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PRESENT_SRC_KHR
        )
        .is_err());
    }

    #[test]
    fn sampler_enables_anisotropy_only_when_supported() {
        let on = sampler_info(Some(16.0));
        assert_eq!(on.anisotropy_enable, vk::TRUE);
        assert_eq!(on.max_anisotropy, 16.0);
        let off = sampler_info(None);
        assert_eq!(off.anisotropy_enable, vk::FALSE);
        assert_eq!(off.max_anisotropy, 1.0);
        assert_eq!(off.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(off.border_color, vk::BorderColor::INT_OPAQUE_BLACK);
        assert_eq!(off.max_lod, 0.0);
    }
}
