// SPDX-License-Identifier: CEPL-1.0
//! Presentation engine: swap-chain images with their views, depth buffers
//! and framebuffers, one render pass, and the in-flight frame ring.
//!
//! Construction runs through [`BuildStage`] in order. Every object created
//! along the way lands in a [`ResourceTable`]; a failed build releases what
//! it made so far and a finished chain releases the table on drop, newest
//! first in both cases.

use ash::vk;
use lumen_render::RenderSize;
use tracing::{debug, info, warn};

use crate::adapter::{QueueFamilyIndices, SwapChainSupport};
use crate::error::BuildStage;
use crate::frame_ring::{FrameRing, MAX_FRAMES_IN_FLIGHT};
use crate::resources::{OwnedResource, ResourceTable};
use crate::{FrameError, GpuDevice, SetupError};

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Result of asking for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    /// The surface changed; rebuild before drawing again.
    OutOfDate,
}

/// What presentation reported for a submitted frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Ok,
    Suboptimal,
    OutOfDate,
}

impl Presented {
    pub fn needs_rebuild(self) -> bool {
        self != Self::Ok
    }
}

/// Surface-derived parameters for one swap-chain build.
#[derive(Clone, Copy, Debug)]
pub struct SwapChainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapChainPlan {
    pub fn new(support: &SwapChainSupport, window: RenderSize) -> Self {
        let caps = &support.capabilities;
        Self {
            surface_format: select_surface_format(&support.formats),
            present_mode: select_present_mode(&support.present_modes),
            extent: select_extent(caps, window),
            image_count: select_image_count(caps),
            transform: caps.current_transform,
        }
    }
}

pub fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    const PREFERRED: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    formats
        .iter()
        .copied()
        .find(|f| f.format == PREFERRED.format && f.color_space == PREFERRED.color_space)
        .or_else(|| formats.first().copied())
        .unwrap_or(PREFERRED)
}

/// Mailbox wherever it appears in the list, FIFO otherwise.
pub fn select_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn select_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means no cap).
pub fn select_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

/// Images are shared between both families when they differ.
pub fn sharing_for(families: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    match families.pair() {
        Some((g, p)) if g != p => (vk::SharingMode::CONCURRENT, vec![g, p]),
        _ => (vk::SharingMode::EXCLUSIVE, Vec::new()),
    }
}

pub fn find_depth_format(device: &dyn GpuDevice) -> Result<vk::Format, SetupError> {
    device.find_supported_format(
        &DEPTH_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

/// Color then depth attachment for the single sub-pass.
pub fn attachment_descriptions(
    color: vk::Format,
    depth: vk::Format,
) -> [vk::AttachmentDescription; 2] {
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

fn external_dependency() -> vk::SubpassDependency {
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: stages,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

fn single_level(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Creates and destroys the objects a swap-chain is assembled from.
pub(crate) trait ChainFactory {
    fn surface(&self) -> vk::SurfaceKHR;
    fn queue_families(&self) -> QueueFamilyIndices;
    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR,
    ) -> Result<vk::SwapchainKHR, vk::Result>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>, vk::Result>;
    fn create_image_view(
        &self,
        info: &vk::ImageViewCreateInfo,
    ) -> Result<vk::ImageView, vk::Result>;
    fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo,
    ) -> Result<vk::RenderPass, vk::Result>;
    /// Device-local image with its own bound allocation.
    fn create_image(
        &self,
        info: &vk::ImageCreateInfo,
    ) -> Result<(vk::Image, vk::DeviceMemory), SetupError>;
    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo,
    ) -> Result<vk::Framebuffer, vk::Result>;
    fn create_semaphore(&self) -> Result<vk::Semaphore, vk::Result>;
    fn create_fence(&self, flags: vk::FenceCreateFlags) -> Result<vk::Fence, vk::Result>;
    /// `resource` came from this factory and is idle.
    fn destroy(&self, resource: OwnedResource);
}

struct DeviceFactory<'d>(&'d dyn GpuDevice);

impl ChainFactory for DeviceFactory<'_> {
    fn surface(&self) -> vk::SurfaceKHR {
        self.0.surface()
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        self.0.queue_families()
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR,
    ) -> Result<vk::SwapchainKHR, vk::Result> {
        unsafe { self.0.swapchain_fn().create_swapchain(info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>, vk::Result> {
        unsafe { self.0.swapchain_fn().get_swapchain_images(swapchain) }
    }

    fn create_image_view(
        &self,
        info: &vk::ImageViewCreateInfo,
    ) -> Result<vk::ImageView, vk::Result> {
        unsafe { self.0.raw().create_image_view(info, None) }
    }

    fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo,
    ) -> Result<vk::RenderPass, vk::Result> {
        unsafe { self.0.raw().create_render_pass(info, None) }
    }

    fn create_image(
        &self,
        info: &vk::ImageCreateInfo,
    ) -> Result<(vk::Image, vk::DeviceMemory), SetupError> {
        self.0.make_image(info, vk::MemoryPropertyFlags::DEVICE_LOCAL)
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo,
    ) -> Result<vk::Framebuffer, vk::Result> {
        unsafe { self.0.raw().create_framebuffer(info, None) }
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, vk::Result> {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe { self.0.raw().create_semaphore(&info, None) }
    }

    fn create_fence(&self, flags: vk::FenceCreateFlags) -> Result<vk::Fence, vk::Result> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags,
            ..Default::default()
        };
        unsafe { self.0.raw().create_fence(&info, None) }
    }

    fn destroy(&self, resource: OwnedResource) {
        unsafe { resource.destroy(self.0) }
    }
}

/// Partially built swap-chain. Dropping it releases whatever was created.
struct Builder<'f> {
    factory: &'f dyn ChainFactory,
    table: ResourceTable<OwnedResource>,
    stage: Option<BuildStage>,
}

impl<'f> Builder<'f> {
    fn new(factory: &'f dyn ChainFactory) -> Self {
        Self {
            factory,
            table: ResourceTable::new(),
            stage: None,
        }
    }

    fn enter(&mut self, stage: BuildStage) -> BuildStage {
        debug_assert!(self.stage < Some(stage), "stages only move forward");
        debug!("swap-chain: building {stage}");
        self.stage = Some(stage);
        stage
    }

    fn keep(&mut self, resource: OwnedResource) {
        self.table.insert(resource);
    }

    fn images(
        &mut self,
        plan: &SwapChainPlan,
        previous: vk::SwapchainKHR,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>), SetupError> {
        let stage = self.enter(BuildStage::Images);
        let factory = self.factory;
        let (sharing, family_indices) = sharing_for(factory.queue_families());
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: factory.surface(),
            min_image_count: plan.image_count,
            image_format: plan.surface_format.format,
            image_color_space: plan.surface_format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: plan.transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: previous,
            ..Default::default()
        };
        let swapchain = factory
            .create_swapchain(&info)
            .map_err(SetupError::stage(stage))?;
        self.keep(OwnedResource::Swapchain(swapchain));
        let images = factory
            .swapchain_images(swapchain)
            .map_err(SetupError::stage(stage))?;
        Ok((swapchain, images))
    }

    fn views(
        &mut self,
        images: &[vk::Image],
        format: vk::Format,
    ) -> Result<Vec<vk::ImageView>, SetupError> {
        let stage = self.enter(BuildStage::Views);
        let mut views = Vec::with_capacity(images.len());
        for &image in images {
            let view = self.view(image, format, vk::ImageAspectFlags::COLOR, stage)?;
            views.push(view);
        }
        Ok(views)
    }

    fn view(
        &mut self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        stage: BuildStage,
    ) -> Result<vk::ImageView, SetupError> {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: single_level(aspect),
            ..Default::default()
        };
        let view = self
            .factory
            .create_image_view(&info)
            .map_err(SetupError::stage(stage))?;
        self.keep(OwnedResource::ImageView(view));
        Ok(view)
    }

    fn render_pass(
        &mut self,
        color: vk::Format,
        depth: vk::Format,
    ) -> Result<vk::RenderPass, SetupError> {
        let stage = self.enter(BuildStage::RenderPass);
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
        let dependency = external_dependency();
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
        let pass = self
            .factory
            .create_render_pass(&info)
            .map_err(SetupError::stage(stage))?;
        self.keep(OwnedResource::RenderPass(pass));
        Ok(pass)
    }

    fn depth(
        &mut self,
        extent: vk::Extent2D,
        format: vk::Format,
        count: usize,
    ) -> Result<Vec<vk::ImageView>, SetupError> {
        let stage = self.enter(BuildStage::Depth);
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
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let mut views = Vec::with_capacity(count);
        for _ in 0..count {
            let (image, memory) = self.factory.create_image(&info)?;
            self.keep(OwnedResource::Image(image, memory));
            views.push(self.view(image, format, vk::ImageAspectFlags::DEPTH, stage)?);
        }
        Ok(views)
    }

    fn framebuffers(
        &mut self,
        render_pass: vk::RenderPass,
        color_views: &[vk::ImageView],
        depth_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Vec<vk::Framebuffer>, SetupError> {
        let stage = self.enter(BuildStage::Framebuffers);
        let mut framebuffers = Vec::with_capacity(color_views.len());
        for (&color, &depth) in color_views.iter().zip(depth_views) {
            let attachments = [color, depth];
            let info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = self
                .factory
                .create_framebuffer(&info)
                .map_err(SetupError::stage(stage))?;
            self.keep(OwnedResource::Framebuffer(fb));
            framebuffers.push(fb);
        }
        Ok(framebuffers)
    }

    fn sync(&mut self) -> Result<Vec<FrameSync>, SetupError> {
        let stage = self.enter(BuildStage::Sync);
        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let image_available = self.semaphore(stage)?;
            let render_finished = self.semaphore(stage)?;
            let in_flight = self
                .factory
                .create_fence(vk::FenceCreateFlags::SIGNALED)
                .map_err(SetupError::stage(stage))?;
            self.keep(OwnedResource::Fence(in_flight));
            frames.push(FrameSync {
                image_available,
                render_finished,
                in_flight,
            });
        }
        Ok(frames)
    }

    fn semaphore(&mut self, stage: BuildStage) -> Result<vk::Semaphore, SetupError> {
        let semaphore = self
            .factory
            .create_semaphore()
            .map_err(SetupError::stage(stage))?;
        self.keep(OwnedResource::Semaphore(semaphore));
        Ok(semaphore)
    }

    fn finish(mut self) -> ResourceTable<OwnedResource> {
        std::mem::take(&mut self.table)
    }
}

impl Drop for Builder<'_> {
    fn drop(&mut self) {
        if let Some(stage) = self.stage.filter(|_| !self.table.is_empty()) {
            debug!("swap-chain: unwinding partial build at {stage}");
        }
        let factory = self.factory;
        self.table.release(|r| factory.destroy(r));
    }
}

/// Everything one successful build produced. Per-image vectors share a
/// length.
pub(crate) struct ChainParts {
    resources: ResourceTable<OwnedResource>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    frames: Vec<FrameSync>,
}

/// Runs every [`BuildStage`] in order. On failure everything created so far
/// is handed back to `factory`, newest first.
pub(crate) fn assemble(
    factory: &dyn ChainFactory,
    plan: &SwapChainPlan,
    depth_format: vk::Format,
    previous: vk::SwapchainKHR,
) -> Result<ChainParts, SetupError> {
    let color_format = plan.surface_format.format;
    let mut b = Builder::new(factory);
    let (swapchain, images) = b.images(plan, previous)?;
    let image_views = b.views(&images, color_format)?;
    let render_pass = b.render_pass(color_format, depth_format)?;
    let depth_views = b.depth(plan.extent, depth_format, images.len())?;
    let framebuffers = b.framebuffers(render_pass, &image_views, &depth_views, plan.extent)?;
    let frames = b.sync()?;
    let resources = b.finish();

    debug_assert!(
        [image_views.len(), depth_views.len(), framebuffers.len()]
            .iter()
            .all(|&n| n == images.len())
    );
    Ok(ChainParts {
        resources,
        swapchain,
        images,
        image_views,
        render_pass,
        framebuffers,
        frames,
    })
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct FrameSync {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

/// Queue-side half of the frame protocol.
pub(crate) trait PresentQueue {
    fn wait(&self, fence: vk::Fence) -> Result<(), vk::Result>;
    fn reset(&self, fence: vk::Fence) -> Result<(), vk::Result>;
    fn submit(
        &self,
        frame: &FrameSync,
        command_buffers: &[vk::CommandBuffer],
    ) -> Result<(), vk::Result>;
    /// `Ok(true)` when the surface no longer matches exactly.
    fn present(&self, frame: &FrameSync, image_index: u32) -> Result<bool, vk::Result>;
}

struct DeviceQueue<'d> {
    device: &'d dyn GpuDevice,
    swapchain: vk::SwapchainKHR,
}

impl PresentQueue for DeviceQueue<'_> {
    fn wait(&self, fence: vk::Fence) -> Result<(), vk::Result> {
        unsafe { self.device.raw().wait_for_fences(&[fence], true, u64::MAX) }
    }

    fn reset(&self, fence: vk::Fence) -> Result<(), vk::Result> {
        unsafe { self.device.raw().reset_fences(&[fence]) }
    }

    fn submit(
        &self,
        frame: &FrameSync,
        command_buffers: &[vk::CommandBuffer],
    ) -> Result<(), vk::Result> {
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &frame.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: command_buffers.len() as u32,
            p_command_buffers: command_buffers.as_ptr(),
            signal_semaphore_count: 1,
            p_signal_semaphores: &frame.render_finished,
            ..Default::default()
        };
        unsafe {
            self.device.raw().queue_submit(
                self.device.graphics_queue(),
                std::slice::from_ref(&submit),
                frame.in_flight,
            )
        }
    }

    fn present(&self, frame: &FrameSync, image_index: u32) -> Result<bool, vk::Result> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &frame.render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        unsafe {
            self.device
                .swapchain_fn()
                .queue_present(self.device.present_queue(), &present)
        }
    }
}

/// Claims `image_index` for the current slot, submits and presents. The
/// ring advances once per call whatever the outcome.
pub(crate) fn submit_frame(
    queue: &dyn PresentQueue,
    ring: &mut FrameRing<vk::Fence>,
    frames: &[FrameSync],
    image_index: u32,
    command_buffers: &[vk::CommandBuffer],
) -> Result<Presented, FrameError> {
    let frame = frames[ring.current()];
    let outcome = present_frame(queue, ring, frame, image_index, command_buffers);
    ring.advance();
    outcome
}

fn present_frame(
    queue: &dyn PresentQueue,
    ring: &mut FrameRing<vk::Fence>,
    frame: FrameSync,
    image_index: u32,
    command_buffers: &[vk::CommandBuffer],
) -> Result<Presented, FrameError> {
    let failed = move |result: vk::Result| FrameError::SubmitFailed {
        image_index,
        result,
    };
    if let Some(previous) = ring.claim_image(image_index as usize, frame.in_flight) {
        queue.wait(previous).map_err(failed)?;
    }
    queue.reset(frame.in_flight).map_err(failed)?;
    queue.submit(&frame, command_buffers).map_err(failed)?;
    match queue.present(&frame, image_index) {
        Ok(false) => Ok(Presented::Ok),
        Ok(true) => Ok(Presented::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::OutOfDate),
        Err(e) => Err(failed(e)),
    }
}

/// The chain of presentable images and the frame protocol driving it.
pub struct SwapChain<'d> {
    device: &'d dyn GpuDevice,
    resources: ResourceTable<OwnedResource>,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    depth_format: vk::Format,
    extent: vk::Extent2D,
    render_pass: vk::RenderPass,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    frames: Vec<FrameSync>,
    ring: FrameRing<vk::Fence>,
}

impl<'d> SwapChain<'d> {
    pub fn new(device: &'d dyn GpuDevice, window: RenderSize) -> Result<Self, SetupError> {
        Self::build(device, window, vk::SwapchainKHR::null())
    }

    /// Builds a replacement for `previous`, which the caller drops afterwards.
    /// The device must be idle.
    pub fn rebuild(previous: &SwapChain<'d>, window: RenderSize) -> Result<Self, SetupError> {
        Self::build(previous.device, window, previous.swapchain)
    }

    fn build(
        device: &'d dyn GpuDevice,
        window: RenderSize,
        previous: vk::SwapchainKHR,
    ) -> Result<Self, SetupError> {
        let support = device.query_swap_chain_support()?;
        let plan = SwapChainPlan::new(&support, window);
        let depth_format = find_depth_format(device)?;
        let parts = assemble(&DeviceFactory(device), &plan, depth_format, previous)?;

        info!(
            "swap-chain: {:?}/{:?} {:?} {}x{} images={}",
            plan.surface_format.format,
            plan.surface_format.color_space,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height,
            parts.images.len()
        );

        Ok(Self {
            device,
            resources: parts.resources,
            swapchain: parts.swapchain,
            surface_format: plan.surface_format,
            depth_format,
            extent: plan.extent,
            render_pass: parts.render_pass,
            ring: FrameRing::new(parts.images.len()),
            images: parts.images,
            image_views: parts.image_views,
            framebuffers: parts.framebuffers,
            frames: parts.frames,
        })
    }

    /// Waits for the current slot's fence, then asks for the next image.
    pub fn acquire_next_image(&mut self) -> Result<Acquired, FrameError> {
        let frame = self.frames[self.ring.current()];
        unsafe {
            self.device
                .raw()
                .wait_for_fences(&[frame.in_flight], true, u64::MAX)
        }
        .map_err(FrameError::AcquireFailed)?;

        let acquired = unsafe {
            self.device.swapchain_fn().acquire_next_image(
                self.swapchain,
                u64::MAX,
                frame.image_available,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(FrameError::AcquireFailed(e)),
        }
    }

    /// Blocks until the last submission that used `image_index` retires, so
    /// its command buffer can be re-recorded.
    pub fn wait_image_idle(&self, image_index: u32) -> Result<(), FrameError> {
        if let Some(fence) = self.ring.owner(image_index as usize) {
            unsafe { self.device.raw().wait_for_fences(&[fence], true, u64::MAX) }
                .map_err(FrameError::Recording)?;
        }
        Ok(())
    }

    /// Submits `command_buffers` for `image_index` and presents it. The slot
    /// ring advances once per call whatever the outcome.
    pub fn submit(
        &mut self,
        image_index: u32,
        command_buffers: &[vk::CommandBuffer],
    ) -> Result<Presented, FrameError> {
        let queue = DeviceQueue {
            device: self.device,
            swapchain: self.swapchain,
        };
        submit_frame(
            &queue,
            &mut self.ring,
            &self.frames,
            image_index,
            command_buffers,
        )
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn aspect_ratio(&self) -> f32 {
        RenderSize::new(self.extent.width, self.extent.height).aspect_ratio()
    }

    pub fn current_frame(&self) -> usize {
        self.ring.current()
    }
}

impl Drop for SwapChain<'_> {
    fn drop(&mut self) {
        // Fences may still be pending if the last frame failed mid-submit.
        if let Err(e) = self.device.wait_idle() {
            warn!("wait for idle before swap-chain teardown: {e}");
        }
        let device = self.device;
        self.resources.release(|r| unsafe { r.destroy(device) });
    }
}
