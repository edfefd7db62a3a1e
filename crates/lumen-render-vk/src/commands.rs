// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

/// Values the render pass clears its color and depth attachments to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

impl ClearValues {
    pub const DEFAULT: Self = Self {
        color: [0.12, 0.12, 0.16, 1.0],
        depth: 1.0,
        stencil: 0,
    };

    /// Color first, then depth, matching the attachment order.
    pub fn to_vk(&self) -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.depth,
                    stencil: self.stencil,
                },
            },
        ]
    }
}

impl Default for ClearValues {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear: ClearValues,
}

/// The handful of commands a frame records.
pub trait CommandRecorder {
    fn begin_render_pass(&mut self, begin: &RenderPassBegin);
    fn end_render_pass(&mut self);
    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    );
    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
}

/// Brackets `body` with begin/end of the render pass described by `begin`.
pub fn record_render_pass(
    recorder: &mut dyn CommandRecorder,
    begin: &RenderPassBegin,
    body: impl FnOnce(&mut dyn CommandRecorder),
) {
    recorder.begin_render_pass(begin);
    body(&mut *recorder);
    recorder.end_render_pass();
}

/// Records into a real primary command buffer.
pub struct CommandBufferRecorder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> CommandBufferRecorder<'a> {
    /// Resets `cmd` and opens it for recording. The pool must allow resets.
    pub fn begin(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Result<Self, vk::Result> {
        let info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &info)?;
        }
        Ok(Self { device, cmd })
    }

    pub fn finish(self) -> Result<vk::CommandBuffer, vk::Result> {
        unsafe { self.device.end_command_buffer(self.cmd)? };
        Ok(self.cmd)
    }
}

impl CommandRecorder for CommandBufferRecorder<'_> {
    fn begin_render_pass(&mut self, begin: &RenderPassBegin) {
        let clear = begin.clear.to_vk();
        let info = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: begin.extent,
            },
            clear_value_count: clear.len() as u32,
            p_clear_values: clear.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(self.cmd, &info, vk::SubpassContents::INLINE)
        };
    }

    fn end_render_pass(&mut self) {
        unsafe { self.device.cmd_end_render_pass(self.cmd) };
    }

    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(self.cmd, bind_point, pipeline) };
    }

    fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.cmd, first_binding, buffers, offsets)
        };
    }

    fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) {
        unsafe {
            self.device
                .cmd_push_constants(self.cmd, layout, stages, offset, bytes)
        };
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw(
                self.cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        };
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    pub enum Op {
        Begin(RenderPassBegin),
        End,
        BindPipeline(vk::Pipeline),
        BindVertexBuffers(Vec<vk::Buffer>),
        PushConstants(usize),
        Draw(u32),
    }

    /// Records calls instead of issuing them.
    #[derive(Default)]
    pub struct OpLog(pub Vec<Op>);

    impl CommandRecorder for OpLog {
        fn begin_render_pass(&mut self, begin: &RenderPassBegin) {
            self.0.push(Op::Begin(*begin));
        }
        fn end_render_pass(&mut self) {
            self.0.push(Op::End);
        }
        fn bind_pipeline(&mut self, _: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
            self.0.push(Op::BindPipeline(pipeline));
        }
        fn bind_vertex_buffers(&mut self, _: u32, buffers: &[vk::Buffer], _: &[vk::DeviceSize]) {
            self.0.push(Op::BindVertexBuffers(buffers.to_vec()));
        }
        fn push_constants(
            &mut self,
            _: vk::PipelineLayout,
            _: vk::ShaderStageFlags,
            _: u32,
            bytes: &[u8],
        ) {
            self.0.push(Op::PushConstants(bytes.len()));
        }
        fn draw(&mut self, vertex_count: u32, _: u32, _: u32, _: u32) {
            self.0.push(Op::Draw(vertex_count));
        }
    }
}
