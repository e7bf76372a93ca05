// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::{
    khr::{surface, swapchain},
    vk, Device,
};
use lumen_render::RenderSize;
use tracing::info;

use crate::{
    device::QueueFamilies,
    memory::{sharing_mode, ImageView},
};

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Mailbox when offered, otherwise FIFO, which every surface supports.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: framebuffer
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped when the surface declares a maximum.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

pub struct SurfaceSupport {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub modes: Vec<vk::PresentModeKHR>,
}

pub unsafe fn query_support(
    surface_loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<SurfaceSupport> {
    unsafe {
        Ok(SurfaceSupport {
            caps: surface_loader
                .get_physical_device_surface_capabilities(phys, surface)
                .context("get_physical_device_surface_capabilities")?,
            formats: surface_loader
                .get_physical_device_surface_formats(phys, surface)
                .context("get_physical_device_surface_formats")?,
            modes: surface_loader
                .get_physical_device_surface_present_modes(phys, surface)
                .context("get_physical_device_surface_present_modes")?,
        })
    }
}

/// Swapchain handle, its images and one color view per image.
pub struct SwapchainState {
    loader: swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl SwapchainState {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn loader(&self) -> &swapchain::Device {
        &self.loader
    }
}

impl Drop for SwapchainState {
    fn drop(&mut self) {
        // views reference swapchain images
        self.views.clear();
        unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
    }
}

pub unsafe fn create_swapchain(
    device: &Device,
    surface_loader: &surface::Instance,
    loader: &swapchain::Device,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    families: QueueFamilies,
    framebuffer: RenderSize,
) -> Result<SwapchainState> {
    let support = unsafe { query_support(surface_loader, phys, surface)? };
    let format = choose_surface_format(&support.formats)
        .ok_or_else(|| anyhow!("surface offers no formats"))?;
    let present_mode = choose_present_mode(&support.modes);
    let extent = choose_extent(&support.caps, framebuffer);
    let image_count = choose_image_count(&support.caps);

    let (sharing, indices) = sharing_mode(&[families.graphics, families.present]);
    let info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface,
        min_image_count: image_count,
        image_format: format.format,
        image_color_space: format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: sharing,
        queue_family_index_count: indices.len() as u32,
        p_queue_family_indices: indices.as_ptr(),
        pre_transform: support.caps.current_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode,
        clipped: vk::TRUE,
        old_swapchain: vk::SwapchainKHR::null(),
        ..Default::default()
    };

    let swapchain = unsafe { loader.create_swapchain(&info, None) }.context("create_swapchain")?;
    let mut state = SwapchainState {
        loader: loader.clone(),
        swapchain,
        images: Vec::new(),
        views: Vec::new(),
        format,
        present_mode,
        extent,
    };
    state.images =
        unsafe { loader.get_swapchain_images(swapchain) }.context("get_swapchain_images")?;
    for &image in &state.images {
        state.views.push(unsafe {
            ImageView::new(device, image, format.format, vk::ImageAspectFlags::COLOR)?
        });
    }

    info!(
        "swapchain {}x{}, {:?}/{:?}, {:?}, {} images",
        extent.width,
        extent.height,
        format.format,
        format.color_space,
        present_mode,
        state.images.len()
    );
    Ok(state)
}
