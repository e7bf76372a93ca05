// SPDX-License-Identifier: CEPL-1.0
//! Everything that depends on the swapchain, and the protocol for replacing
//! it wholesale.
use anyhow::{anyhow, Context, Result};
use ash::{
    khr::{surface, swapchain},
    vk, Device,
};
use lumen_math::UniformBufferObject;
use lumen_render::{MemoryUsage, RenderSize, ShaderSource};
use tracing::{debug, info};

use crate::{
    commands::{record_draw, DrawPlan, DrawTargets, VkCommandSink},
    device::QueueFamilies,
    memory::{Allocator, GpuBuffer},
    pipeline::{DepthBuffer, Framebuffer, GraphicsPipeline, Layouts, RenderPass},
    swapchain::{choose_extent, create_swapchain, SwapchainState},
    upload::CommandPool,
};

pub trait SwapchainGeneration {
    fn image_count(&self) -> usize;
}

/// Builds one complete generation of swapchain-dependent state.
pub trait ChainFactory {
    type Chain: SwapchainGeneration;

    fn wait_idle(&mut self) -> Result<()>;
    /// Extent the surface would give a swapchain right now. Zero while the
    /// window is minimized, even if the last reported size was not.
    fn surface_extent(&mut self, framebuffer: RenderSize) -> Result<RenderSize>;
    fn build(&mut self, framebuffer: RenderSize) -> Result<Self::Chain>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recreate {
    Rebuilt { image_count: usize },
    /// The framebuffer or the surface is zero-sized; the old generation is
    /// kept until a usable size arrives.
    Deferred,
}

/// Holds at most one live generation. A rebuild drains the GPU, drops the old
/// generation completely and only then builds the next one.
pub struct SwapchainManager<C> {
    current: Option<C>,
    framebuffer: RenderSize,
    pending: bool,
    rebuilds: u64,
}

impl<C: SwapchainGeneration> SwapchainManager<C> {
    pub fn create<F>(factory: &mut F, framebuffer: RenderSize) -> Result<Self>
    where
        F: ChainFactory<Chain = C>,
    {
        let mut manager = Self {
            current: None,
            framebuffer,
            pending: true,
            rebuilds: 0,
        };
        if !manager.usable_extent(factory)?.is_zero() {
            manager.current = Some(factory.build(framebuffer)?);
            manager.pending = false;
        }
        Ok(manager)
    }

    fn usable_extent<F>(&self, factory: &mut F) -> Result<RenderSize>
    where
        F: ChainFactory<Chain = C>,
    {
        if self.framebuffer.is_zero() {
            return Ok(self.framebuffer);
        }
        factory.surface_extent(self.framebuffer)
    }

    pub fn current(&self) -> Option<&C> {
        self.current.as_ref()
    }

    pub fn framebuffer(&self) -> RenderSize {
        self.framebuffer
    }

    /// True while a rebuild is owed, either from a resize or a stale chain.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn request_resize(&mut self, size: RenderSize) {
        self.framebuffer = size;
        self.pending = true;
    }

    pub fn mark_stale(&mut self) {
        self.pending = true;
    }

    pub fn recreate<F>(&mut self, factory: &mut F, reason: &str) -> Result<Recreate>
    where
        F: ChainFactory<Chain = C>,
    {
        if self.usable_extent(factory)?.is_zero() {
            self.pending = true;
            debug!("swapchain rebuild ({reason}) deferred: surface is zero-sized");
            return Ok(Recreate::Deferred);
        }

        factory.wait_idle()?;
        self.current = None;
        let chain = factory.build(self.framebuffer)?;
        let image_count = chain.image_count();
        self.current = Some(chain);
        self.pending = false;
        self.rebuilds += 1;
        info!(
            "swapchain rebuilt ({reason}) at {}x{}, generation {}",
            self.framebuffer.width, self.framebuffer.height, self.rebuilds
        );
        Ok(Recreate::Rebuilt { image_count })
    }

    pub fn destroy(&mut self) {
        self.current = None;
    }
}

pub struct CommandBuffers {
    device: Device,
    pool: vk::CommandPool,
    pub buffers: Vec<vk::CommandBuffer>,
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.pool, &self.buffers) };
        }
    }
}

/// Descriptor pool sized for one set per swapchain image. Sets are freed with
/// the pool.
pub struct Descriptors {
    device: Device,
    pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
}

impl Drop for Descriptors {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// One generation. Fields drop top to bottom: command buffers first, the
/// swapchain last.
pub struct Chain {
    pub command_buffers: CommandBuffers,
    pub descriptors: Descriptors,
    pub uniforms: Vec<GpuBuffer>,
    pub framebuffers: Vec<Framebuffer>,
    pub depth: DepthBuffer,
    pub render_pass: RenderPass,
    pub swapchain: SwapchainState,
    pub plan: DrawPlan,
}

impl SwapchainGeneration for Chain {
    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }
}

/// Swapchain-independent handles the command buffers bind.
#[derive(Clone, Copy, Debug)]
pub struct SceneBindings {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub texture_view: vk::ImageView,
    pub sampler: vk::Sampler,
}

pub struct VulkanChainFactory<'a> {
    pub device: &'a Device,
    pub allocator: &'a Allocator,
    pub surface_loader: &'a surface::Instance,
    pub swapchain_loader: &'a swapchain::Device,
    pub physical: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub families: QueueFamilies,
    pub depth_format: vk::Format,
    pub graphics_pool: &'a CommandPool,
    pub layouts: &'a Layouts,
    pub shaders: &'a dyn ShaderSource,
    pub pipeline: &'a mut Option<GraphicsPipeline>,
    pub scene: SceneBindings,
}

impl VulkanChainFactory<'_> {
    unsafe fn ensure_pipeline(&mut self, render_pass: &RenderPass, format: vk::Format) -> Result<vk::Pipeline> {
        let stale = self
            .pipeline
            .as_ref()
            .map_or(true, |p| p.color_format != format);
        if stale {
            *self.pipeline = None;
            *self.pipeline = Some(unsafe {
                GraphicsPipeline::new(self.device, self.shaders, self.layouts, render_pass, format)?
            });
        }
        self.pipeline
            .as_ref()
            .map(|p| p.pipeline)
            .ok_or_else(|| anyhow!("graphics pipeline missing after build"))
    }

    unsafe fn create_uniforms(&self, count: usize) -> Result<Vec<GpuBuffer>> {
        let size = std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize;
        (0..count)
            .map(|_| unsafe {
                self.allocator.create_buffer(
                    "uniform buffer",
                    size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    &[self.families.graphics],
                    MemoryUsage::CpuToGpu,
                )
            })
            .collect()
    }

    unsafe fn create_descriptors(&self, uniforms: &[GpuBuffer]) -> Result<Descriptors> {
        let count = uniforms.len() as u32;
        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: count,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None) }
            .context("create_descriptor_pool")?;
        let mut out = Descriptors {
            device: self.device.clone(),
            pool,
            sets: Vec::new(),
        };

        let layouts = vec![self.layouts.set_layout; uniforms.len()];
        let alloc_info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool,
            descriptor_set_count: count,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        out.sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .context("allocate_descriptor_sets")?;

        for (set, ubo) in out.sets.iter().zip(uniforms) {
            let buffer_info = vk::DescriptorBufferInfo {
                buffer: ubo.buffer,
                offset: 0,
                range: ubo.size,
            };
            let image_info = vk::DescriptorImageInfo {
                sampler: self.scene.sampler,
                image_view: self.scene.texture_view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            };
            let writes = [
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: *set,
                    dst_binding: 0,
                    dst_array_element: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: &buffer_info,
                    ..Default::default()
                },
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: *set,
                    dst_binding: 1,
                    dst_array_element: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: &image_info,
                    ..Default::default()
                },
            ];
            unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        }
        Ok(out)
    }

    unsafe fn record(
        &self,
        plan: &DrawPlan,
        targets: DrawTargets,
        framebuffers: &[Framebuffer],
        descriptors: &Descriptors,
    ) -> Result<CommandBuffers> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.graphics_pool.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: framebuffers.len() as u32,
            ..Default::default()
        };
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .context("allocate_command_buffers")?;
        let out = CommandBuffers {
            device: self.device.clone(),
            pool: self.graphics_pool.pool,
            buffers,
        };

        for (i, &cmd) in out.buffers.iter().enumerate() {
            let mut sink = VkCommandSink {
                device: self.device,
                cmd,
                targets,
                framebuffer: framebuffers[i].framebuffer,
                descriptor_set: descriptors.sets[i],
            };
            record_draw(&mut sink, plan).with_context(|| format!("record command buffer {i}"))?;
        }
        Ok(out)
    }
}

impl ChainFactory for VulkanChainFactory<'_> {
    type Chain = Chain;

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("device_wait_idle")
    }

    fn surface_extent(&mut self, framebuffer: RenderSize) -> Result<RenderSize> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical, self.surface)
        }
        .context("get_physical_device_surface_capabilities")?;
        let extent = choose_extent(&caps, framebuffer);
        Ok(RenderSize::new(extent.width, extent.height))
    }

    fn build(&mut self, framebuffer: RenderSize) -> Result<Chain> {
        unsafe {
            let swapchain = create_swapchain(
                self.device,
                self.surface_loader,
                self.swapchain_loader,
                self.physical,
                self.surface,
                self.families,
                framebuffer,
            )?;
            let format = swapchain.format.format;
            let extent = swapchain.extent;

            let render_pass = RenderPass::new(self.device, format, self.depth_format)?;
            let pipeline = self.ensure_pipeline(&render_pass, format)?;
            let depth = DepthBuffer::new(self.allocator, self.device, self.depth_format, extent)?;

            let framebuffers = swapchain
                .views
                .iter()
                .map(|view| Framebuffer::new(self.device, &render_pass, view, &depth.view, extent))
                .collect::<Result<Vec<_>>>()?;

            let uniforms = self.create_uniforms(swapchain.image_count())?;
            let descriptors = self.create_descriptors(&uniforms)?;

            let plan = DrawPlan::new(extent, self.scene.index_count);
            let targets = DrawTargets {
                render_pass: render_pass.render_pass,
                pipeline,
                pipeline_layout: self.layouts.pipeline_layout,
                vertex_buffer: self.scene.vertex_buffer,
                index_buffer: self.scene.index_buffer,
            };
            let command_buffers = self.record(&plan, targets, &framebuffers, &descriptors)?;

            Ok(Chain {
                command_buffers,
                descriptors,
                uniforms,
                framebuffers,
                depth,
                render_pass,
                swapchain,
                plan,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, collections::BTreeSet, rc::Rc};

    /// Shared ledger of live fake handles.
    #[derive(Clone, Default)]
    struct Ledger {
        live: Rc<RefCell<BTreeSet<u64>>>,
        events: Rc<RefCell<Vec<String>>>,
    }

    struct FakeHandle {
        id: u64,
        ledger: Ledger,
    }

    impl Drop for FakeHandle {
        fn drop(&mut self) {
            assert!(self.ledger.live.borrow_mut().remove(&self.id), "double free");
        }
    }

    struct FakeChain {
        generation: u64,
        framebuffers: Vec<FakeHandle>,
        command_buffers: Vec<FakeHandle>,
        ledger: Ledger,
    }

    impl SwapchainGeneration for FakeChain {
        fn image_count(&self) -> usize {
            self.framebuffers.len()
        }
    }

    impl Drop for FakeChain {
        fn drop(&mut self) {
            self.ledger
                .events
                .borrow_mut()
                .push(format!("drop {}", self.generation));
        }
    }

    struct FakeFactory {
        ledger: Ledger,
        next_id: u64,
        generation: u64,
        image_count: usize,
        surface: Option<RenderSize>,
    }

    impl FakeFactory {
        fn handle(&mut self) -> FakeHandle {
            self.next_id += 1;
            self.ledger.live.borrow_mut().insert(self.next_id);
            FakeHandle {
                id: self.next_id,
                ledger: self.ledger.clone(),
            }
        }
    }

    impl ChainFactory for FakeFactory {
        type Chain = FakeChain;

        fn wait_idle(&mut self) -> Result<()> {
            self.ledger.events.borrow_mut().push("wait idle".into());
            Ok(())
        }

        fn surface_extent(&mut self, framebuffer: RenderSize) -> Result<RenderSize> {
            Ok(self.surface.unwrap_or(framebuffer))
        }

        fn build(&mut self, _framebuffer: RenderSize) -> Result<FakeChain> {
            let generation = self.generation;
            self.generation += 1;
            self.ledger
                .events
                .borrow_mut()
                .push(format!("build {generation}"));
            let framebuffers = (0..self.image_count).map(|_| self.handle()).collect();
            let command_buffers = (0..self.image_count).map(|_| self.handle()).collect();
            Ok(FakeChain {
                generation,
                framebuffers,
                command_buffers,
                ledger: self.ledger.clone(),
            })
        }
    }

    fn factory(image_count: usize) -> FakeFactory {
        FakeFactory {
            ledger: Ledger::default(),
            next_id: 0,
            generation: 0,
            image_count,
            surface: None,
        }
    }

    #[test]
    fn repeated_recreation_keeps_one_generation_alive() {
        let mut f = factory(3);
        let mut mgr = SwapchainManager::create(&mut f, RenderSize::new(800, 600)).unwrap();
        for i in 0..10u32 {
            mgr.request_resize(RenderSize::new(800 + i, 600));
            f.image_count = 2 + (i as usize % 2);
            let r = mgr.recreate(&mut f, "resize").unwrap();
            assert_eq!(r, Recreate::Rebuilt { image_count: f.image_count });
            let chain = mgr.current().unwrap();
            assert_eq!(chain.command_buffers.len(), chain.image_count());
            assert_eq!(f.ledger.live.borrow().len(), 2 * f.image_count);
        }
        assert_eq!(mgr.rebuilds(), 10);
        mgr.destroy();
        assert!(f.ledger.live.borrow().is_empty());
    }

    #[test]
    fn old_generation_is_dropped_after_idle_and_before_build() {
        let mut f = factory(2);
        let mut mgr = SwapchainManager::create(&mut f, RenderSize::new(640, 480)).unwrap();
        mgr.mark_stale();
        mgr.recreate(&mut f, "out of date").unwrap();
        assert_eq!(
            *f.ledger.events.borrow(),
            vec!["build 0", "wait idle", "drop 0", "build 1"]
        );
        assert!(!mgr.is_pending());
    }

    #[test]
    fn zero_size_defers_until_resized() {
        let mut f = factory(3);
        let mut mgr = SwapchainManager::create(&mut f, RenderSize::new(800, 600)).unwrap();
        mgr.request_resize(RenderSize::new(0, 0));
        assert_eq!(mgr.recreate(&mut f, "resize").unwrap(), Recreate::Deferred);
        assert!(mgr.is_pending());
        // nothing was torn down while minimized
        assert_eq!(f.ledger.live.borrow().len(), 6);
        assert_eq!(mgr.current().unwrap().generation, 0);

        mgr.request_resize(RenderSize::new(1024, 768));
        assert_eq!(
            mgr.recreate(&mut f, "resize").unwrap(),
            Recreate::Rebuilt { image_count: 3 }
        );
        assert_eq!(mgr.current().unwrap().generation, 1);
        assert_eq!(mgr.framebuffer(), RenderSize::new(1024, 768));
    }

    #[test]
    fn zero_size_at_creation_builds_nothing() {
        let mut f = factory(3);
        let mgr = SwapchainManager::create(&mut f, RenderSize::new(0, 600)).unwrap();
        assert!(mgr.current().is_none());
        assert!(mgr.is_pending());
        assert!(f.ledger.events.borrow().is_empty());
    }

    #[test]
    fn minimized_surface_defers_despite_cached_size() {
        let mut f = factory(2);
        let mut mgr = SwapchainManager::create(&mut f, RenderSize::new(800, 600)).unwrap();
        f.surface = Some(RenderSize::new(0, 0));
        mgr.mark_stale();
        assert_eq!(mgr.recreate(&mut f, "out of date").unwrap(), Recreate::Deferred);
        assert!(mgr.is_pending());
        assert_eq!(mgr.current().unwrap().generation, 0);
        assert_eq!(*f.ledger.events.borrow(), vec!["build 0"]);

        f.surface = None;
        assert_eq!(
            mgr.recreate(&mut f, "out of date").unwrap(),
            Recreate::Rebuilt { image_count: 2 }
        );
    }

    #[test]
    fn minimized_surface_at_creation_builds_nothing() {
        let mut f = factory(2);
        f.surface = Some(RenderSize::new(800, 0));
        let mgr = SwapchainManager::create(&mut f, RenderSize::new(800, 600)).unwrap();
        assert!(mgr.current().is_none());
        assert!(mgr.is_pending());
    }
}
