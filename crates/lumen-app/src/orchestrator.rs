// SPDX-License-Identifier: CEPL-1.0
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use lumen_math::{PushTransform, Spin};
use lumen_platform::WindowSurface;
use lumen_render::RenderSize;
use lumen_render_vk::{
    record_render_pass, vk, Acquired, ClearValues, CommandBufferRecorder, CommandRecorder,
    FrameError, GpuDevice, Pipeline, PipelineConfig, PipelineLayout, RenderPassBegin,
    SetupError, StaticMesh, SwapChain, Vertex,
};
use tracing::{debug, info, warn};

/// Sleep between polls while the window is minimised.
const IDLE_POLL: Duration = Duration::from_millis(16);

/// Per-run settings that do not come from the device.
#[derive(Clone, Debug)]
pub struct FrameSettings {
    pub shader_base: PathBuf,
    pub clear: ClearValues,
    pub spin_speed: f32,
}

pub fn push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: PushTransform::SIZE,
    }
}

/// Records one frame: pipeline, transform push, mesh, all inside the pass.
pub fn record_frame(
    recorder: &mut dyn CommandRecorder,
    begin: &RenderPassBegin,
    layout: vk::PipelineLayout,
    push: &PushTransform,
    bind_pipeline: impl FnOnce(&mut dyn CommandRecorder),
    draw_mesh: impl FnOnce(&mut dyn CommandRecorder),
) {
    record_render_pass(recorder, begin, |rec| {
        bind_pipeline(&mut *rec);
        rec.push_constants(layout, vk::ShaderStageFlags::VERTEX, 0, push.as_bytes());
        draw_mesh(rec);
    });
}

pub fn construct_command_buffers(
    device: &dyn GpuDevice,
    count: usize,
) -> Result<Vec<vk::CommandBuffer>, SetupError> {
    let info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: device.command_pool(),
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count as u32,
        ..Default::default()
    };
    unsafe { device.raw().allocate_command_buffers(&info) }
        .map_err(|result| SetupError::Device {
            what: "frame command buffer allocation",
            result,
        })
}

fn build_pipeline<'d>(
    device: &'d dyn GpuDevice,
    swap_chain: &SwapChain<'d>,
    layout: &PipelineLayout<'d>,
    shader_base: &Path,
) -> Result<Pipeline<'d>, SetupError> {
    let config = PipelineConfig::from_extent(swap_chain.extent()).with_targets(
        layout.raw(),
        swap_chain.render_pass(),
        0,
    );
    Pipeline::new(device, shader_base, &config, &Vertex::vertex_input())
}

/// Swap-chain, pipeline and mesh for one window, plus the run loop.
///
/// Fields drop top to bottom, which is the reverse of construction.
pub struct FrameOrchestrator<'d> {
    command_buffers: Vec<vk::CommandBuffer>,
    mesh: StaticMesh<'d>,
    pipeline: Pipeline<'d>,
    layout: PipelineLayout<'d>,
    swap_chain: SwapChain<'d>,
    device: &'d dyn GpuDevice,
    settings: FrameSettings,
    spin: Spin,
}

impl<'d> FrameOrchestrator<'d> {
    pub fn new(
        device: &'d dyn GpuDevice,
        extent: RenderSize,
        settings: FrameSettings,
        vertices: &[Vertex],
    ) -> Result<Self, SetupError> {
        let swap_chain = SwapChain::new(device, extent)?;
        let layout = PipelineLayout::new(device, &[], &[push_constant_range()])?;
        let pipeline = build_pipeline(device, &swap_chain, &layout, &settings.shader_base)?;
        let mesh = StaticMesh::new(device, vertices)?;
        let command_buffers = construct_command_buffers(device, swap_chain.image_count())?;
        info!(
            "scene: {} vertices, {} command buffers",
            mesh.vertex_count(),
            command_buffers.len()
        );
        Ok(Self {
            command_buffers,
            mesh,
            pipeline,
            layout,
            swap_chain,
            device,
            spin: Spin::new(settings.spin_speed),
            settings,
        })
    }

    pub fn swap_chain(&self) -> &SwapChain<'d> {
        &self.swap_chain
    }

    /// Runs until the window asks to close, then waits for the device to
    /// drain.
    pub fn run(&mut self, window: &mut WindowSurface) -> Result<(), FrameError> {
        let mut last = Instant::now();
        let mut frames: u64 = 0;
        let outcome = loop {
            window.pull_events();
            if window.is_closing() {
                break Ok(());
            }
            let now = Instant::now();
            self.spin.advance(now.duration_since(last).as_secs_f32());
            last = now;

            let extent = window.extent();
            if extent.is_empty() {
                std::thread::sleep(IDLE_POLL);
                continue;
            }
            if let Err(e) = self.render_frame(extent) {
                break Err(e);
            }
            frames += 1;
        };
        if let Err(e) = self.device.wait_idle() {
            warn!("wait for idle on exit: {e}");
        }
        info!("run loop finished after {frames} frames");
        outcome
    }

    /// Acquire, record, submit. An out-of-date or suboptimal surface
    /// triggers a rebuild instead of an error.
    pub fn render_frame(&mut self, extent: RenderSize) -> Result<(), FrameError> {
        let (index, suboptimal) = match self.swap_chain.acquire_next_image()? {
            Acquired::Image { index, suboptimal } => (index, suboptimal),
            Acquired::OutOfDate => {
                debug!("acquire: surface out of date");
                return self.rebuild(extent);
            }
        };

        self.swap_chain.wait_image_idle(index)?;
        let cmd = self.record(index)?;
        let presented = self.swap_chain.submit(index, &[cmd])?;
        if suboptimal || presented.needs_rebuild() {
            debug!("present: {presented:?}, suboptimal acquire: {suboptimal}");
            self.rebuild(extent)?;
        }
        Ok(())
    }

    fn record(&self, image_index: u32) -> Result<vk::CommandBuffer, FrameError> {
        let i = image_index as usize;
        let mut rec = CommandBufferRecorder::begin(self.device.raw(), self.command_buffers[i])
            .map_err(FrameError::Recording)?;
        let begin = RenderPassBegin {
            render_pass: self.swap_chain.render_pass(),
            framebuffer: self.swap_chain.framebuffer(i),
            extent: self.swap_chain.extent(),
            clear: self.settings.clear,
        };
        let push = PushTransform {
            transform: self.spin.transform(self.swap_chain.aspect_ratio()),
        };
        record_frame(
            &mut rec,
            &begin,
            self.layout.raw(),
            &push,
            |r| self.pipeline.bind(r, vk::PipelineBindPoint::GRAPHICS),
            |r| {
                self.mesh.bind(r);
                self.mesh.draw(r);
            },
        );
        rec.finish().map_err(FrameError::Recording)
    }

    fn rebuild(&mut self, extent: RenderSize) -> Result<(), FrameError> {
        self.device.wait_idle()?;
        let swap_chain = SwapChain::rebuild(&self.swap_chain, extent)?;
        self.swap_chain = swap_chain;
        // Viewport and render pass are baked into the pipeline.
        self.pipeline = build_pipeline(
            self.device,
            &self.swap_chain,
            &self.layout,
            &self.settings.shader_base,
        )?;
        if self.swap_chain.image_count() != self.command_buffers.len() {
            self.free_command_buffers();
            self.command_buffers =
                construct_command_buffers(self.device, self.swap_chain.image_count())?;
        }
        info!("swap-chain rebuilt");
        Ok(())
    }

    fn free_command_buffers(&mut self) {
        if self.command_buffers.is_empty() {
            return;
        }
        unsafe {
            self.device
                .raw()
                .free_command_buffers(self.device.command_pool(), &self.command_buffers)
        };
        self.command_buffers.clear();
    }
}

impl Drop for FrameOrchestrator<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("wait for idle before teardown: {e}");
        }
        self.free_command_buffers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_render_vk::vk::Handle;
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq)]
    enum Cmd {
        Begin(vk::Framebuffer, ClearValues),
        End,
        Pipeline(vk::Pipeline),
        Push(usize),
        Vertices,
        Draw(u32),
    }

    #[derive(Default)]
    struct Trace(Vec<Cmd>);

    impl CommandRecorder for Trace {
        fn begin_render_pass(&mut self, begin: &RenderPassBegin) {
            self.0.push(Cmd::Begin(begin.framebuffer, begin.clear));
        }
        fn end_render_pass(&mut self) {
            self.0.push(Cmd::End);
        }
        fn bind_pipeline(&mut self, _: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
            self.0.push(Cmd::Pipeline(pipeline));
        }
        fn bind_vertex_buffers(&mut self, _: u32, _: &[vk::Buffer], _: &[vk::DeviceSize]) {
            self.0.push(Cmd::Vertices);
        }
        fn push_constants(
            &mut self,
            _: vk::PipelineLayout,
            stages: vk::ShaderStageFlags,
            _: u32,
            bytes: &[u8],
        ) {
            assert_eq!(stages, vk::ShaderStageFlags::VERTEX);
            self.0.push(Cmd::Push(bytes.len()));
        }
        fn draw(&mut self, vertex_count: u32, _: u32, _: u32, _: u32) {
            self.0.push(Cmd::Draw(vertex_count));
        }
    }

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 1024,
            height: 720,
        }
    }

    #[test]
    fn each_image_buffer_is_bracketed_by_its_pass() {
        let framebuffers: Vec<_> = (10..13).map(vk::Framebuffer::from_raw).collect();
        let begins: Vec<_> = framebuffers
            .iter()
            .map(|&framebuffer| RenderPassBegin {
                render_pass: vk::RenderPass::from_raw(1),
                framebuffer,
                extent: extent(),
                clear: ClearValues::DEFAULT,
            })
            .collect();

        let pipeline = vk::Pipeline::from_raw(2);
        let push = PushTransform {
            transform: Spin::new(1.0).transform(1024.0 / 720.0),
        };
        for (i, begin) in begins.iter().enumerate() {
            let mut trace = Trace::default();
            record_frame(
                &mut trace,
                begin,
                vk::PipelineLayout::from_raw(3),
                &push,
                |r| r.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline),
                |r| {
                    r.bind_vertex_buffers(0, &[vk::Buffer::null()], &[0]);
                    r.draw(243, 1, 0, 0);
                },
            );
            assert_eq!(
                trace.0,
                vec![
                    Cmd::Begin(framebuffers[i], ClearValues::DEFAULT),
                    Cmd::Pipeline(pipeline),
                    Cmd::Push(64),
                    Cmd::Vertices,
                    Cmd::Draw(243),
                    Cmd::End,
                ]
            );
        }
    }

    #[test]
    fn default_clear_matches_reference_colors() {
        let clear = ClearValues::DEFAULT;
        assert_eq!(clear.color, [0.12, 0.12, 0.16, 1.0]);
        assert_eq!((clear.depth, clear.stencil), (1.0, 0));
    }

    #[test]
    fn push_range_covers_one_matrix() {
        let range = push_constant_range();
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 64);
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
    }
}
