// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::{vk, Device};

/// Synchronization for one frame-in-flight slot. The fence starts signaled so
/// the first wait on a fresh slot returns immediately.
pub struct FrameSync {
    device: Device,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    pub unsafe fn new(device: &Device) -> Result<Self> {
        let sem_info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let mut sync = Self {
            device: device.clone(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };
        unsafe {
            sync.image_available = device
                .create_semaphore(&sem_info, None)
                .context("create_semaphore (image available)")?;
            sync.render_finished = device
                .create_semaphore(&sem_info, None)
                .context("create_semaphore (render finished)")?;
            sync.in_flight = device
                .create_fence(&fence_info, None)
                .context("create_fence (in flight)")?;
        }
        Ok(sync)
    }

    pub unsafe fn create_ring(device: &Device, slots: usize) -> Result<Vec<Self>> {
        (0..slots).map(|_| unsafe { Self::new(device) }).collect()
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.in_flight, None);
            self.device
                .destroy_semaphore(self.render_finished, None);
            self.device
                .destroy_semaphore(self.image_available, None);
        }
    }
}
