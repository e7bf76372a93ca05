// SPDX-License-Identifier: CEPL-1.0
//! Per-image command buffer recording.
use anyhow::{Context, Result};
use ash::{vk, Device};

/// What one prebuilt command buffer draws.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawPlan {
    pub extent: vk::Extent2D,
    pub index_count: u32,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub clear_stencil: u32,
}

impl DrawPlan {
    pub fn new(extent: vk::Extent2D, index_count: u32) -> Self {
        Self {
            extent,
            index_count,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }

    /// Full-extent viewport with the depth range inverted (1 → 0).
    pub fn viewport(&self) -> vk::Viewport {
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 1.0,
            max_depth: 0.0,
        }
    }

    pub fn scissor(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    pub fn clear_values(&self) -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.clear_depth,
                    stencil: self.clear_stencil,
                },
            },
        ]
    }
}

/// Receives the commands of one frame. Implemented over a real command buffer
/// and by test recorders.
pub trait CommandSink {
    fn begin(&mut self) -> Result<()>;
    fn begin_render_pass(&mut self, plan: &DrawPlan);
    fn set_viewport(&mut self, viewport: vk::Viewport);
    fn set_scissor(&mut self, scissor: vk::Rect2D);
    fn bind_pipeline(&mut self);
    fn bind_geometry(&mut self);
    fn bind_descriptor_set(&mut self);
    fn draw_indexed(&mut self, index_count: u32);
    fn end_render_pass(&mut self);
    fn end(&mut self) -> Result<()>;
}

pub fn record_draw<S: CommandSink + ?Sized>(sink: &mut S, plan: &DrawPlan) -> Result<()> {
    sink.begin()?;
    sink.begin_render_pass(plan);
    sink.set_viewport(plan.viewport());
    sink.set_scissor(plan.scissor());
    sink.bind_pipeline();
    sink.bind_geometry();
    sink.bind_descriptor_set();
    sink.draw_indexed(plan.index_count);
    sink.end_render_pass();
    sink.end()
}

/// Handles shared by every image's command buffer.
#[derive(Clone, Copy, Debug)]
pub struct DrawTargets {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
}

/// Records into `cmd` for the image whose framebuffer and descriptor set are
/// given.
pub struct VkCommandSink<'a> {
    pub device: &'a Device,
    pub cmd: vk::CommandBuffer,
    pub targets: DrawTargets,
    pub framebuffer: vk::Framebuffer,
    pub descriptor_set: vk::DescriptorSet,
}

impl CommandSink for VkCommandSink<'_> {
    fn begin(&mut self) -> Result<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(self.cmd, &begin) }
            .context("begin_command_buffer")
    }

    fn begin_render_pass(&mut self, plan: &DrawPlan) {
        let clears = plan.clear_values();
        let info = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.targets.render_pass,
            framebuffer: self.framebuffer,
            render_area: plan.scissor(),
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(self.cmd, &info, vk::SubpassContents::INLINE)
        };
    }

    fn set_viewport(&mut self, viewport: vk::Viewport) {
        unsafe {
            self.device
                .cmd_set_viewport(self.cmd, 0, std::slice::from_ref(&viewport))
        };
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe {
            self.device
                .cmd_set_scissor(self.cmd, 0, std::slice::from_ref(&scissor))
        };
    }

    fn bind_pipeline(&mut self) {
        unsafe {
            self.device.cmd_bind_pipeline(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.targets.pipeline,
            )
        };
    }

    fn bind_geometry(&mut self) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.cmd, 0, &[self.targets.vertex_buffer], &[0]);
            self.device.cmd_bind_index_buffer(
                self.cmd,
                self.targets.index_buffer,
                0,
                vk::IndexType::UINT16,
            );
        }
    }

    fn bind_descriptor_set(&mut self) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.targets.pipeline_layout,
                0,
                &[self.descriptor_set],
                &[],
            )
        };
    }

    fn draw_indexed(&mut self, index_count: u32) {
        unsafe { self.device.cmd_draw_indexed(self.cmd, index_count, 1, 0, 0, 0) };
    }

    fn end_render_pass(&mut self) {
        unsafe { self.device.cmd_end_render_pass(self.cmd) };
    }

    fn end(&mut self) -> Result<()> {
        unsafe { self.device.end_command_buffer(self.cmd) }.context("end_command_buffer")
    }
}

/// Recorder that keeps every call in order, for checking recordings without
/// a device.
#[cfg(any(test, feature = "test-util"))]
pub mod recording {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    pub enum Recorded {
        Begin,
        BeginRenderPass { extent: (u32, u32), clear_depth: f32 },
        Viewport { min_depth: f32, max_depth: f32, width: f32, height: f32 },
        Scissor(u32, u32),
        BindPipeline,
        BindGeometry,
        BindDescriptorSet,
        DrawIndexed(u32),
        EndRenderPass,
        End,
    }

    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub calls: Vec<Recorded>,
    }

    impl RecordingSink {
        pub fn draw_counts(&self) -> Vec<u32> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Recorded::DrawIndexed(n) => Some(*n),
                    _ => None,
                })
                .collect()
        }
    }

    impl CommandSink for RecordingSink {
        fn begin(&mut self) -> Result<()> {
            self.calls.push(Recorded::Begin);
            Ok(())
        }
        fn begin_render_pass(&mut self, plan: &DrawPlan) {
            self.calls.push(Recorded::BeginRenderPass {
                extent: (plan.extent.width, plan.extent.height),
                clear_depth: plan.clear_depth,
            });
        }
        fn set_viewport(&mut self, v: vk::Viewport) {
            self.calls.push(Recorded::Viewport {
                min_depth: v.min_depth,
                max_depth: v.max_depth,
                width: v.width,
                height: v.height,
            });
        }
        fn set_scissor(&mut self, s: vk::Rect2D) {
            self.calls
                .push(Recorded::Scissor(s.extent.width, s.extent.height));
        }
        fn bind_pipeline(&mut self) {
            self.calls.push(Recorded::BindPipeline);
        }
        fn bind_geometry(&mut self) {
            self.calls.push(Recorded::BindGeometry);
        }
        fn bind_descriptor_set(&mut self) {
            self.calls.push(Recorded::BindDescriptorSet);
        }
        fn draw_indexed(&mut self, index_count: u32) {
            self.calls.push(Recorded::DrawIndexed(index_count));
        }
        fn end_render_pass(&mut self) {
            self.calls.push(Recorded::EndRenderPass);
        }
        fn end(&mut self) -> Result<()> {
            self.calls.push(Recorded::End);
            Ok(())
        }
    }
}
