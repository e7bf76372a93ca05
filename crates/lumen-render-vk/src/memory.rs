// SPDX-License-Identifier: CEPL-1.0
//! Buffers and images, each paired with a dedicated memory allocation.
use anyhow::{anyhow, Context, Result};
use ash::{vk, Device, Instance};
use lumen_render::MemoryUsage;

use crate::GpuError;

pub fn required_properties(usage: MemoryUsage) -> vk::MemoryPropertyFlags {
    match usage {
        MemoryUsage::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        MemoryUsage::CpuToGpu | MemoryUsage::CpuOnly => {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        }
    }
}

pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0 && props.memory_types[i as usize].property_flags.contains(req)
    })
}

/// Concurrent sharing across the distinct families given, exclusive when
/// there is at most one.
pub fn sharing_mode(families: &[u32]) -> (vk::SharingMode, Vec<u32>) {
    let mut unique: Vec<u32> = Vec::with_capacity(families.len());
    for &f in families {
        if !unique.contains(&f) {
            unique.push(f);
        }
    }
    if unique.len() > 1 {
        (vk::SharingMode::CONCURRENT, unique)
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

pub struct Allocator {
    device: Device,
    props: vk::PhysicalDeviceMemoryProperties,
}

impl Allocator {
    pub unsafe fn new(instance: &Instance, device: &Device, phys: vk::PhysicalDevice) -> Self {
        Self {
            device: device.clone(),
            props: unsafe { instance.get_physical_device_memory_properties(phys) },
        }
    }

    unsafe fn allocate(
        &self,
        what: &'static str,
        reqs: vk::MemoryRequirements,
        usage: MemoryUsage,
    ) -> Result<vk::DeviceMemory, GpuError> {
        let type_index = find_memory_type(&self.props, reqs.memory_type_bits, required_properties(usage))
            .ok_or(GpuError::AllocationFailed {
                what,
                size: reqs.size,
                source: None,
            })?;
        let info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: reqs.size,
            memory_type_index: type_index,
            ..Default::default()
        };
        unsafe { self.device.allocate_memory(&info, None) }
            .map_err(|e| GpuError::allocation(what, reqs.size, e))
    }

    pub unsafe fn create_buffer(
        &self,
        what: &'static str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        families: &[u32],
        memory: MemoryUsage,
    ) -> Result<GpuBuffer> {
        let (mode, indices) = sharing_mode(families);
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: mode,
            queue_family_index_count: indices.len() as u32,
            p_queue_family_indices: indices.as_ptr(),
            ..Default::default()
        };
        let buffer = unsafe { self.device.create_buffer(&info, None) }
            .map_err(|e| GpuError::allocation(what, size, e))?;
        let mut out = GpuBuffer {
            device: self.device.clone(),
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
        };

        let reqs = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        out.memory = unsafe { self.allocate(what, reqs, memory)? };
        unsafe { self.device.bind_buffer_memory(buffer, out.memory, 0) }
            .with_context(|| format!("bind_buffer_memory ({what})"))?;
        Ok(out)
    }

    /// Optimal-tiling 2D image owned by a single queue family at a time.
    pub unsafe fn create_image_2d(
        &self,
        what: &'static str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        memory: MemoryUsage,
    ) -> Result<GpuImage> {
        let info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let bytes = extent.width as vk::DeviceSize * extent.height as vk::DeviceSize * 4;
        let image = unsafe { self.device.create_image(&info, None) }
            .map_err(|e| GpuError::allocation(what, bytes, e))?;
        let mut out = GpuImage {
            device: self.device.clone(),
            image,
            memory: vk::DeviceMemory::null(),
            extent,
            format,
        };

        let reqs = unsafe { self.device.get_image_memory_requirements(image) };
        out.memory = unsafe { self.allocate(what, reqs, memory)? };
        unsafe { self.device.bind_image_memory(image, out.memory, 0) }
            .with_context(|| format!("bind_image_memory ({what})"))?;
        Ok(out)
    }
}

pub struct GpuBuffer {
    device: Device,
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    /// Copy `bytes` to the start of a host-visible buffer.
    pub unsafe fn write(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(anyhow!(
                "write of {} bytes into a {} byte buffer",
                bytes.len(),
                self.size
            ));
        }
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .context("map_memory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

pub struct GpuImage {
    device: Device,
    pub image: vk::Image,
    memory: vk::DeviceMemory,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Owned image view; dropped before the image it looks at.
pub struct ImageView {
    device: Device,
    pub view: vk::ImageView,
}

impl ImageView {
    pub unsafe fn new(
        device: &Device,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = unsafe { device.create_image_view(&info, None) }.context("create_image_view")?;
        Ok(Self {
            device: device.clone(),
            view,
        })
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.device.destroy_image_view(self.view, None) };
    }
}
