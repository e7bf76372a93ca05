// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::{
    khr::{surface, swapchain},
    vk, Device, Entry, Instance,
};
use lumen_math::UniformBufferObject;
use lumen_render::{
    BackendKind, FrameStatus, GfxContext, GfxInit, IndexBufferId, RenderSize, TextureDesc,
    TextureId, Vertex, VertexBufferId, WindowHost, FRAGMENT_SHADER, VERTEX_SHADER,
};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use slotmap::SlotMap;
use tracing::{info, warn};

use crate::{
    chain::{Chain, Recreate, SceneBindings, SwapchainManager, VulkanChainFactory},
    device::{create_logical_device, select_device, QueueFamilies, Queues, SelectedDevice},
    frame::{
        AcquireOutcome, FrameBackend, FrameOutcome, FrameScheduler, PresentOutcome,
        MAX_FRAMES_IN_FLIGHT,
    },
    instance::{create_instance, DebugMessenger},
    memory::{Allocator, GpuBuffer},
    pipeline::{find_depth_format, GraphicsPipeline, Layouts},
    shaders::ShaderCache,
    sync::FrameSync,
    texture::{create_texture, scene_texture, Sampler, Texture},
    upload::{CommandPool, Uploader},
};

/// The fixed scene drawn every frame.
struct Scene {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
    texture: Texture,
}

/// Device-level state. Fields drop top to bottom, which is the reverse of
/// the order they depend on each other.
struct Resources {
    chain: SwapchainManager<Chain>,
    pipeline: Option<GraphicsPipeline>,
    layouts: Layouts,
    vertex_buffers: SlotMap<VertexBufferId, GpuBuffer>,
    index_buffers: SlotMap<IndexBufferId, GpuBuffer>,
    textures: SlotMap<TextureId, Texture>,
    scene: Scene,
    sampler: Sampler,
    frames: FrameScheduler<FrameSync>,
    transfer_pool: CommandPool,
    graphics_pool: CommandPool,
    allocator: Allocator,
    shaders: ShaderCache,
    swapchain_loader: swapchain::Device,
    device: Device,
    physical: vk::PhysicalDevice,
    families: QueueFamilies,
    queues: Queues,
    depth_format: vk::Format,
}

impl Resources {
    fn uploader(&self) -> Uploader<'_> {
        Uploader {
            allocator: &self.allocator,
            device: &self.device,
            families: self.families,
            transfer_pool: &self.transfer_pool,
            transfer_queue: self.queues.transfer,
            graphics_pool: &self.graphics_pool,
            graphics_queue: self.queues.graphics,
        }
    }

    fn recreate(
        &mut self,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
        reason: &str,
    ) -> Result<Recreate> {
        let Resources {
            chain,
            pipeline,
            layouts,
            scene,
            sampler,
            frames,
            graphics_pool,
            allocator,
            shaders,
            swapchain_loader,
            device,
            physical,
            families,
            depth_format,
            ..
        } = self;
        let mut factory = VulkanChainFactory {
            device,
            allocator,
            surface_loader,
            swapchain_loader,
            physical: *physical,
            surface,
            families: *families,
            depth_format: *depth_format,
            graphics_pool,
            layouts,
            shaders,
            pipeline,
            scene: scene_bindings(scene, sampler),
        };
        let outcome = chain.recreate(&mut factory, reason)?;
        if let Recreate::Rebuilt { image_count } = outcome {
            frames.on_swapchain_recreated(image_count);
        }
        Ok(outcome)
    }
}

fn scene_bindings(scene: &Scene, sampler: &Sampler) -> SceneBindings {
    SceneBindings {
        vertex_buffer: scene.vertex_buffer.buffer,
        index_buffer: scene.index_buffer.buffer,
        index_count: scene.index_count,
        texture_view: scene.texture.view.view,
        sampler: sampler.sampler,
    }
}

/// Frame operations against the live chain.
struct VulkanFrames<'a> {
    device: &'a Device,
    queues: Queues,
    chain: &'a Chain,
}

impl FrameBackend for VulkanFrames<'_> {
    type Slot = FrameSync;

    fn wait_fence(&mut self, slot: &FrameSync) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[slot.in_flight], true, u64::MAX)
        }
        .context("wait_for_fences")
    }

    fn reset_fence(&mut self, slot: &FrameSync) -> Result<()> {
        unsafe { self.device.reset_fences(&[slot.in_flight]) }.context("reset_fences")
    }

    fn acquire(&mut self, slot: &FrameSync) -> Result<AcquireOutcome> {
        let sc = &self.chain.swapchain;
        let result = unsafe {
            sc.loader().acquire_next_image(
                sc.swapchain,
                u64::MAX,
                slot.image_available,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image, suboptimal)) => Ok(AcquireOutcome::Acquired { image, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(anyhow!("acquire_next_image: {e:?}")),
        }
    }

    fn update_uniforms(&mut self, image: u32, elapsed: f32) -> Result<()> {
        let extent = self.chain.swapchain.extent;
        let ubo = UniformBufferObject::orbiting(elapsed, extent.width, extent.height);
        let buffer = self
            .chain
            .uniforms
            .get(image as usize)
            .ok_or_else(|| anyhow!("no uniform buffer for image {image}"))?;
        unsafe { buffer.write(ubo.as_bytes()) }
    }

    fn submit(&mut self, slot: &FrameSync, image: u32) -> Result<()> {
        let cmd = *self
            .chain
            .command_buffers
            .buffers
            .get(image as usize)
            .ok_or_else(|| anyhow!("no command buffer for image {image}"))?;
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.image_available,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &slot.render_finished,
            ..Default::default()
        };
        unsafe {
            self.device.queue_submit(
                self.queues.graphics,
                std::slice::from_ref(&submit),
                slot.in_flight,
            )
        }
        .context("queue_submit")
    }

    fn present(&mut self, slot: &FrameSync, image: u32) -> Result<PresentOutcome> {
        let sc = &self.chain.swapchain;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.render_finished,
            swapchain_count: 1,
            p_swapchains: &sc.swapchain,
            p_image_indices: &image,
            ..Default::default()
        };
        match unsafe { sc.loader().queue_present(self.queues.present, &present) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(anyhow!("queue_present: {e:?}")),
        }
    }
}

/// Vulkan implementation of [`GfxContext`].
pub struct VulkanContext {
    res: Option<Resources>,
    device: Option<Device>,
    surface: vk::SurfaceKHR,
    surface_loader: surface::Instance,
    debug: Option<DebugMessenger>,
    instance: Option<Instance>,
    _entry: Entry,
}

impl VulkanContext {
    fn res(&mut self) -> Result<&mut Resources> {
        self.res
            .as_mut()
            .ok_or_else(|| anyhow!("Vulkan context used after cleanup"))
    }

    fn recreate(&mut self, reason: &str) -> Result<Recreate> {
        let surface = self.surface;
        let res = self
            .res
            .as_mut()
            .ok_or_else(|| anyhow!("Vulkan context used after cleanup"))?;
        res.recreate(&self.surface_loader, surface, reason)
    }
}

unsafe fn build_resources(
    instance: &Instance,
    device: &Device,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    selected: &SelectedDevice,
    queues: Queues,
    framebuffer: RenderSize,
    init: &GfxInit<'_>,
) -> Result<Resources> {
    unsafe {
        let families = selected.families;
        let physical = selected.physical;
        let allocator = Allocator::new(instance, device, physical);
        let graphics_pool =
            CommandPool::new(device, families.graphics, vk::CommandPoolCreateFlags::empty())?;
        let transfer_pool =
            CommandPool::new(device, families.transfer, vk::CommandPoolCreateFlags::TRANSIENT)?;

        let shaders = ShaderCache::preload(init.shaders, &[VERTEX_SHADER, FRAGMENT_SHADER])?;
        let layouts = Layouts::new(device)?;
        let depth_format = find_depth_format(instance, physical)?;
        let sampler = Sampler::new(device, selected.max_anisotropy)?;

        if !init.mesh.indices_in_range() {
            return Err(anyhow!("scene mesh has indices past its vertex count"));
        }
        let uploader = Uploader {
            allocator: &allocator,
            device,
            families,
            transfer_pool: &transfer_pool,
            transfer_queue: queues.transfer,
            graphics_pool: &graphics_pool,
            graphics_queue: queues.graphics,
        };
        let scene = Scene {
            vertex_buffer: uploader.upload_buffer(
                "vertex buffer",
                vk::BufferUsageFlags::VERTEX_BUFFER,
                init.mesh.vertex_bytes(),
            )?,
            index_buffer: uploader.upload_buffer(
                "index buffer",
                vk::BufferUsageFlags::INDEX_BUFFER,
                init.mesh.index_bytes(),
            )?,
            index_count: init.mesh.index_count(),
            texture: scene_texture(&uploader, init.texture)?,
        };

        let swapchain_loader = swapchain::Device::new(instance, device);
        let mut pipeline = None;
        let chain = {
            let mut factory = VulkanChainFactory {
                device,
                allocator: &allocator,
                surface_loader,
                swapchain_loader: &swapchain_loader,
                physical,
                surface,
                families,
                depth_format,
                graphics_pool: &graphics_pool,
                layouts: &layouts,
                shaders: &shaders,
                pipeline: &mut pipeline,
                scene: scene_bindings(&scene, &sampler),
            };
            SwapchainManager::create(&mut factory, framebuffer)?
        };
        let image_count = chain.current().map_or(0, |c| c.swapchain.image_count());
        let frames = FrameScheduler::new(
            FrameSync::create_ring(device, MAX_FRAMES_IN_FLIGHT)?,
            image_count,
        );

        Ok(Resources {
            chain,
            pipeline,
            layouts,
            vertex_buffers: SlotMap::with_key(),
            index_buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            scene,
            sampler,
            frames,
            transfer_pool,
            graphics_pool,
            allocator,
            shaders,
            swapchain_loader,
            device: device.clone(),
            physical,
            families,
            queues,
            depth_format,
        })
    }
}

impl GfxContext for VulkanContext {
    fn init(host: &dyn WindowHost, init: &GfxInit<'_>) -> Result<Self> {
        let display: RawDisplayHandle = host.display_handle()?.as_raw();
        let window: RawWindowHandle = host.window_handle()?.as_raw();
        let framebuffer = host.framebuffer_size();

        unsafe {
            let entry = Entry::load().context("load Vulkan loader")?;
            let instance = create_instance(&entry, display, init.app_name, init.validation)?;
            let surface_loader = surface::Instance::new(&entry, &instance);
            let mut ctx = VulkanContext {
                res: None,
                device: None,
                surface: vk::SurfaceKHR::null(),
                surface_loader,
                debug: None,
                instance: Some(instance),
                _entry: entry,
            };
            let instance = ctx
                .instance
                .as_ref()
                .ok_or_else(|| anyhow!("instance missing"))?;

            if init.validation {
                ctx.debug = Some(DebugMessenger::new(&ctx._entry, instance)?);
            }
            ctx.surface = ash_window::create_surface(&ctx._entry, instance, display, window, None)
                .context("create_surface")?;

            let selected = select_device(instance, &ctx.surface_loader, ctx.surface)?;
            let (device, queues) = create_logical_device(instance, &selected)?;
            ctx.device = Some(device.clone());

            ctx.res = Some(build_resources(
                instance,
                &device,
                &ctx.surface_loader,
                ctx.surface,
                &selected,
                queues,
                framebuffer,
                init,
            )?);
            info!(
                "Vulkan context ready on '{}' ({}x{})",
                selected.name, framebuffer.width, framebuffer.height
            );
            Ok(ctx)
        }
    }

    fn update(&mut self) -> Result<FrameStatus> {
        let res = self.res()?;
        if res.chain.is_pending() || res.chain.current().is_none() {
            return Ok(match self.recreate("resize")? {
                Recreate::Rebuilt { .. } => FrameStatus::Recreated,
                Recreate::Deferred => FrameStatus::Minimized,
            });
        }

        let outcome = {
            let Resources {
                chain,
                frames,
                device,
                queues,
                ..
            } = res;
            let live = chain
                .current()
                .ok_or_else(|| anyhow!("no swapchain to draw into"))?;
            let mut backend = VulkanFrames {
                device,
                queues: *queues,
                chain: live,
            };
            frames.draw_frame(&mut backend)?
        };

        match outcome {
            FrameOutcome::Presented => Ok(FrameStatus::Presented),
            FrameOutcome::PresentedStale => {
                self.res()?.chain.mark_stale();
                self.recreate("suboptimal or out of date at present")?;
                Ok(FrameStatus::Presented)
            }
            FrameOutcome::SkippedOutOfDate => {
                self.res()?.chain.mark_stale();
                Ok(match self.recreate("out of date at acquire")? {
                    Recreate::Rebuilt { .. } => FrameStatus::Recreated,
                    Recreate::Deferred => FrameStatus::Minimized,
                })
            }
        }
    }

    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> Result<VertexBufferId> {
        let res = self.res()?;
        let buffer = unsafe {
            res.uploader().upload_buffer(
                "vertex buffer",
                vk::BufferUsageFlags::VERTEX_BUFFER,
                bytemuck::cast_slice(vertices),
            )?
        };
        Ok(res.vertex_buffers.insert(buffer))
    }

    fn destroy_vertex_buffer(&mut self, id: VertexBufferId) {
        if let Some(res) = self.res.as_mut() {
            if res.vertex_buffers.remove(id).is_none() {
                warn!("destroy of unknown vertex buffer {id:?}");
            }
        }
    }

    fn create_index_buffer(&mut self, indices: &[u16]) -> Result<IndexBufferId> {
        let res = self.res()?;
        let buffer = unsafe {
            res.uploader().upload_buffer(
                "index buffer",
                vk::BufferUsageFlags::INDEX_BUFFER,
                bytemuck::cast_slice(indices),
            )?
        };
        Ok(res.index_buffers.insert(buffer))
    }

    fn destroy_index_buffer(&mut self, id: IndexBufferId) {
        if let Some(res) = self.res.as_mut() {
            if res.index_buffers.remove(id).is_none() {
                warn!("destroy of unknown index buffer {id:?}");
            }
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        let res = self.res()?;
        let texture = unsafe { create_texture(&res.uploader(), desc, None)? };
        Ok(res.textures.insert(texture))
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if let Some(res) = self.res.as_mut() {
            if res.textures.remove(id).is_none() {
                warn!("destroy of unknown texture {id:?}");
            }
        }
    }

    fn resize_framebuffer(&mut self, size: RenderSize) -> Result<()> {
        self.res()?.chain.request_resize(size);
        match self.recreate("resize")? {
            Recreate::Rebuilt { image_count } => {
                info!("resized to {}x{} ({image_count} images)", size.width, size.height)
            }
            Recreate::Deferred => info!("minimized; swapchain rebuild deferred"),
        }
        Ok(())
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn cleanup(&mut self) {
        if let Some(device) = &self.device {
            unsafe { device.device_wait_idle().ok() };
        }
        if self.res.take().is_some() {
            info!("Vulkan resources released");
        }
        unsafe {
            if let Some(device) = self.device.take() {
                device.destroy_device(None);
            }
            self.debug = None;
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
                self.surface = vk::SurfaceKHR::null();
            }
            if let Some(instance) = self.instance.take() {
                instance.destroy_instance(None);
            }
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}
