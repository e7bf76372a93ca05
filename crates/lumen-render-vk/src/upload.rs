// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::{vk, Device};
use lumen_render::MemoryUsage;
use tracing::debug;

use crate::{
    device::QueueFamilies,
    memory::{Allocator, GpuBuffer},
};

pub struct CommandPool {
    device: Device,
    pub pool: vk::CommandPool,
}

impl CommandPool {
    pub unsafe fn new(device: &Device, family: u32, flags: vk::CommandPoolCreateFlags) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags,
            queue_family_index: family,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&info, None) }.context("create_command_pool")?;
        Ok(Self {
            device: device.clone(),
            pool,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

/// Record into a throwaway primary buffer, submit it and block until `queue`
/// is idle. The buffer is freed on every path.
pub unsafe fn one_shot(
    device: &Device,
    pool: &CommandPool,
    queue: vk::Queue,
    record: impl FnOnce(vk::CommandBuffer),
) -> Result<()> {
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool.pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = unsafe { device.allocate_command_buffers(&ai) }
        .context("allocate one-shot command buffer")?
        .first()
        .copied()
        .ok_or_else(|| anyhow!("driver returned no command buffer"))?;

    let result = (|| -> Result<()> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe {
            device.begin_command_buffer(cmd, &bi).context("begin_command_buffer")?;
            record(cmd);
            device.end_command_buffer(cmd).context("end_command_buffer")?;

            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            device
                .queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())
                .context("queue_submit (one-shot)")?;
            device.queue_wait_idle(queue).context("queue_wait_idle")?;
        }
        Ok(())
    })();

    unsafe { device.free_command_buffers(pool.pool, std::slice::from_ref(&cmd)) };
    result
}

/// Host-visible staging buffer owned by `family` holding `bytes`.
pub unsafe fn staging_buffer(allocator: &Allocator, family: u32, bytes: &[u8]) -> Result<GpuBuffer> {
    if bytes.is_empty() {
        return Err(anyhow!("refusing to stage an empty upload"));
    }
    unsafe {
        let staging = allocator.create_buffer(
            "staging",
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            &[family],
            MemoryUsage::CpuOnly,
        )?;
        staging.write(bytes)?;
        Ok(staging)
    }
}

/// Borrowed handles needed to push data into device-local memory.
pub struct Uploader<'a> {
    pub allocator: &'a Allocator,
    pub device: &'a Device,
    pub families: QueueFamilies,
    pub transfer_pool: &'a CommandPool,
    pub transfer_queue: vk::Queue,
    pub graphics_pool: &'a CommandPool,
    pub graphics_queue: vk::Queue,
}

impl Uploader<'_> {
    /// Device-local buffer of `usage` filled from `bytes` through a staging
    /// copy on the transfer queue. Shared between graphics and transfer
    /// families.
    pub unsafe fn upload_buffer(
        &self,
        what: &'static str,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<GpuBuffer> {
        unsafe {
            let staging = staging_buffer(self.allocator, self.families.transfer, bytes)?;
            let dst = self.allocator.create_buffer(
                what,
                staging.size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                &[self.families.graphics, self.families.transfer],
                MemoryUsage::GpuOnly,
            )?;

            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: staging.size,
            };
            let device = self.device;
            one_shot(device, self.transfer_pool, self.transfer_queue, |cmd| {
                device.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
            })
            .with_context(|| format!("staging copy for {what}"))?;

            debug!("{what}: staged {} bytes", staging.size);
            Ok(dst)
        }
    }
}
