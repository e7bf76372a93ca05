// SPDX-License-Identifier: CEPL-1.0
//! Render pass, depth buffer, descriptor layouts and the graphics pipeline.
use anyhow::{anyhow, Context, Result};
use ash::{vk, Device, Instance};
use lumen_render::{MemoryUsage, ShaderSource, Vertex, FRAGMENT_SHADER, VERTEX_SHADER};
use tracing::info;

use crate::{
    memory::{Allocator, GpuImage, ImageView},
    shaders::ShaderModule,
    GpuError,
};

/// Depth formats in order of preference.
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn pick_depth_format(
    candidates: &[vk::Format],
    supports: impl Fn(vk::Format) -> bool,
) -> Result<vk::Format, GpuError> {
    candidates
        .iter()
        .copied()
        .find(|&f| supports(f))
        .ok_or_else(|| GpuError::NoDepthFormat(candidates.to_vec()))
}

/// First candidate usable as an optimal-tiling depth attachment.
pub unsafe fn find_depth_format(instance: &Instance, phys: vk::PhysicalDevice) -> Result<vk::Format> {
    let format = pick_depth_format(&DEPTH_CANDIDATES, |f| {
        unsafe { instance.get_physical_device_format_properties(phys, f) }
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })?;
    info!("depth format {format:?}");
    Ok(format)
}

/// Color (cleared, stored, handed to present) then depth (cleared, discarded).
pub fn attachment_descriptions(color: vk::Format, depth: vk::Format) -> [vk::AttachmentDescription; 2] {
    [
        vk::AttachmentDescription {
            format: color,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ]
}

/// External-to-subpass dependency. The source side includes late fragment
/// tests so the previous frame's depth writes finish before this frame's
/// clear of the shared depth image.
pub fn subpass_dependency() -> vk::SubpassDependency {
    let fragment_tests =
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | fragment_tests,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    }
}

pub struct RenderPass {
    device: Device,
    pub render_pass: vk::RenderPass,
}

impl RenderPass {
    pub unsafe fn new(device: &Device, color: vk::Format, depth: vk::Format) -> Result<Self> {
        let attachments = attachment_descriptions(color, depth);
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: &depth_ref,
            ..Default::default()
        };
        let dependency = subpass_dependency();
        let info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let render_pass =
            unsafe { device.create_render_pass(&info, None) }.context("create_render_pass")?;
        Ok(Self {
            device: device.clone(),
            render_pass,
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.render_pass, None) };
    }
}

pub struct DepthBuffer {
    pub view: ImageView,
    pub image: GpuImage,
}

impl DepthBuffer {
    pub unsafe fn new(
        allocator: &Allocator,
        device: &Device,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        unsafe {
            let image = allocator.create_image_2d(
                "depth buffer",
                extent,
                format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                MemoryUsage::GpuOnly,
            )?;
            let view = ImageView::new(device, image.image, format, vk::ImageAspectFlags::DEPTH)?;
            Ok(Self { view, image })
        }
    }
}

pub struct Framebuffer {
    device: Device,
    pub framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    pub unsafe fn new(
        device: &Device,
        render_pass: &RenderPass,
        color: &ImageView,
        depth: &ImageView,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let attachments = [color.view, depth.view];
        let info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: render_pass.render_pass,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        let framebuffer =
            unsafe { device.create_framebuffer(&info, None) }.context("create_framebuffer")?;
        Ok(Self {
            device: device.clone(),
            framebuffer,
        })
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_framebuffer(self.framebuffer, None) };
    }
}

/// Set 0: binding 0 uniform buffer (vertex), binding 1 combined image sampler
/// (fragment).
pub fn descriptor_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ]
}

/// Descriptor set layout and the pipeline layout built on it. Both outlive
/// swapchain recreation.
pub struct Layouts {
    device: Device,
    pub set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
}

impl Layouts {
    pub unsafe fn new(device: &Device) -> Result<Self> {
        let bindings = descriptor_bindings();
        let set_info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        let set_layout = unsafe { device.create_descriptor_set_layout(&set_info, None) }
            .context("create_descriptor_set_layout")?;
        let mut out = Self {
            device: device.clone(),
            set_layout,
            pipeline_layout: vk::PipelineLayout::null(),
        };

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &out.set_layout,
            ..Default::default()
        };
        out.pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .context("create_pipeline_layout")?;
        Ok(out)
    }
}

impl Drop for Layouts {
    fn drop(&mut self) {
        unsafe {
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, pos) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, color) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, tex_coord) as u32,
        },
    ]
}

/// Depth test and write with `LESS`; paired with the inverted viewport depth
/// range and the reversed projection.
pub fn depth_stencil_state() -> vk::PipelineDepthStencilStateCreateInfo<'static> {
    vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS,
        depth_bounds_test_enable: vk::FALSE,
        stencil_test_enable: vk::FALSE,
        min_depth_bounds: 0.0,
        max_depth_bounds: 1.0,
        ..Default::default()
    }
}

/// The single graphics pipeline. Remembers the color format it was built for
/// so recreation can tell whether it is still compatible.
pub struct GraphicsPipeline {
    device: Device,
    pub pipeline: vk::Pipeline,
    pub color_format: vk::Format,
}

impl GraphicsPipeline {
    pub unsafe fn new(
        device: &Device,
        shaders: &dyn ShaderSource,
        layouts: &Layouts,
        render_pass: &RenderPass,
        color_format: vk::Format,
    ) -> Result<Self> {
        let vs_bytes = shaders
            .load(VERTEX_SHADER)
            .with_context(|| format!("load {VERTEX_SHADER}"))?;
        let fs_bytes = shaders
            .load(FRAGMENT_SHADER)
            .with_context(|| format!("load {FRAGMENT_SHADER}"))?;
        let vs = unsafe { ShaderModule::new(device, &vs_bytes)? };
        let fs = unsafe { ShaderModule::new(device, &fs_bytes)? };
        let entry = c"main";

        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs.module,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs.module,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        let binding = vertex_binding();
        let attributes = vertex_attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &binding,
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart_enable: vk::FALSE,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            depth_clamp_enable: vk::FALSE,
            rasterizer_discard_enable: vk::FALSE,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias_enable: vk::FALSE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            sample_shading_enable: vk::FALSE,
            ..Default::default()
        };
        let depth_stencil = depth_stencil_state();
        let blend_attachment = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            logic_op_enable: vk::FALSE,
            attachment_count: 1,
            p_attachments: &blend_attachment,
            ..Default::default()
        };

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: layouts.pipeline_layout,
            render_pass: render_pass.render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipelines = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&info),
                None,
            )
        }
        .map_err(|(_, err)| anyhow!("create_graphics_pipelines failed: {err:?}"))?;
        let pipeline = pipelines
            .first()
            .copied()
            .ok_or_else(|| anyhow!("create_graphics_pipelines returned nothing"))?;

        info!("graphics pipeline built for {color_format:?}");
        Ok(Self {
            device: device.clone(),
            pipeline,
            color_format,
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline(self.pipeline, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_format_follows_candidate_order() {
        let all = pick_depth_format(&DEPTH_CANDIDATES, |_| true).unwrap();
        assert_eq!(all, vk::Format::D32_SFLOAT);
        let no_d32 = pick_depth_format(&DEPTH_CANDIDATES, |f| f != vk::Format::D32_SFLOAT).unwrap();
        assert_eq!(no_d32, vk::Format::D32_SFLOAT_S8_UINT);
        assert!(matches!(
            pick_depth_format(&DEPTH_CANDIDATES, |_| false),
            Err(GpuError::NoDepthFormat(list)) if list.len() == 3
        ));
    }

    #[test]
    fn attachments_clear_and_hand_off() {
        let [color, depth] =
            attachment_descriptions(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT);
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(color.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn dependency_gates_color_and_depth_writes() {
        let dep = subpass_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert!(dep.src_stage_mask.contains(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        ));
        assert_eq!(
            dep.src_access_mask,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert!(dep
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(dep.dst_access_mask.contains(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        ));
    }

    #[test]
    fn vertex_layout_matches_vertex_struct() {
        assert_eq!(vertex_binding().stride, 32);
        let offsets: Vec<(u32, u32)> = vertex_attributes()
            .iter()
            .map(|a| (a.location, a.offset))
            .collect();
        assert_eq!(offsets, vec![(0, 0), (1, 12), (2, 24)]);
        assert_eq!(vertex_attributes()[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn descriptor_bindings_split_by_stage() {
        let [ubo, sampler] = descriptor_bindings();
        assert_eq!(ubo.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(ubo.stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(sampler.binding, 1);
        assert_eq!(sampler.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn depth_compare_is_less() {
        let ds = depth_stencil_state();
        assert_eq!(ds.depth_compare_op, vk::CompareOp::LESS);
        assert_eq!(ds.stencil_test_enable, vk::FALSE);
    }
}
