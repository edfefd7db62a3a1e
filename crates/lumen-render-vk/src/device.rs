// SPDX-License-Identifier: CEPL-1.0
use std::ffi::c_char;

use ash::{khr::swapchain, vk};
use lumen_render::RenderTarget;
use tracing::{debug, info, warn};

use crate::adapter::{
    cstr_lossy, find_queue_families, memory_type_index, select_adapter,
    select_supported_format, AdapterCapabilities, QueueFamilyIndices, SwapChainSupport,
    REQUIRED_DEVICE_EXTENSIONS,
};
use crate::{ApiContext, SetupError};

/// The operations downstream components need from a logical device.
///
/// Swap-chains, pipelines and meshes borrow a `&dyn GpuDevice`; the device
/// has to outlive every one of them.
pub trait GpuDevice {
    fn raw(&self) -> &ash::Device;
    fn swapchain_fn(&self) -> &swapchain::Device;
    fn surface(&self) -> vk::SurfaceKHR;
    fn queue_families(&self) -> QueueFamilyIndices;
    fn graphics_queue(&self) -> vk::Queue;
    fn present_queue(&self) -> vk::Queue;
    fn command_pool(&self) -> vk::CommandPool;

    fn query_swap_chain_support(&self) -> Result<SwapChainSupport, SetupError>;
    fn find_memory_type(
        &self,
        filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32, SetupError>;
    fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format, SetupError>;

    /// Creates, allocates and binds. Nothing is left behind on failure.
    fn make_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory), SetupError>;
    fn make_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Image, vk::DeviceMemory), SetupError>;

    fn begin_single_time_commands(&self) -> Result<vk::CommandBuffer, SetupError>;
    /// Ends, submits and blocks until the graphics queue drains.
    fn end_single_time_commands(&self, cmd: vk::CommandBuffer) -> Result<(), SetupError>;

    fn wait_idle(&self) -> Result<(), SetupError>;

    fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<(), SetupError> {
        let cmd = self.begin_single_time_commands()?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.raw()
                .cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region))
        };
        self.end_single_time_commands(cmd)
    }

    /// Expects `image` in `TRANSFER_DST_OPTIMAL`.
    fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
        layer_count: u32,
    ) -> Result<(), SetupError> {
        let cmd = self.begin_single_time_commands()?;
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        };
        unsafe {
            self.raw().cmd_copy_buffer_to_image(
                cmd,
                src,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            )
        };
        self.end_single_time_commands(cmd)
    }
}

/// Chosen adapter, its logical device and the surface it presents to.
pub struct Device<'c> {
    context: &'c ApiContext,
    physical: vk::PhysicalDevice,
    adapter: AdapterCapabilities,
    properties: vk::PhysicalDeviceProperties,
    memory: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    swapchain_fn: swapchain::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
    surface: vk::SurfaceKHR,
}

impl<'c> Device<'c> {
    pub fn new(context: &'c ApiContext, target: &dyn RenderTarget) -> Result<Self, SetupError> {
        let surface = context.make_surface(target)?;
        Self::with_surface(context, surface).inspect_err(|_| unsafe {
            context.surface_fn().destroy_surface(surface, None)
        })
    }

    fn with_surface(context: &'c ApiContext, surface: vk::SurfaceKHR) -> Result<Self, SetupError> {
        let instance = context.instance();
        let (physical, adapter) = select_physical_device(context, surface)?;
        let properties = unsafe { instance.get_physical_device_properties(physical) };
        let memory = unsafe { instance.get_physical_device_memory_properties(physical) };
        info!("adapter: {}", adapter.name);

        let device = construct_logical_device(instance, physical, &adapter)?;
        let command_pool = match construct_command_pool(&device, adapter.queue_families) {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        let (graphics, present) = family_pair(adapter.queue_families);
        let graphics_queue = unsafe { device.get_device_queue(graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(present, 0) };
        let swapchain_fn = swapchain::Device::new(instance, &device);
        debug!("queues: graphics family {graphics}, present family {present}");

        Ok(Self {
            context,
            physical,
            adapter,
            properties,
            memory,
            device,
            swapchain_fn,
            graphics_queue,
            present_queue,
            command_pool,
            surface,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter.name
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }
}

impl GpuDevice for Device<'_> {
    fn raw(&self) -> &ash::Device {
        &self.device
    }

    fn swapchain_fn(&self) -> &swapchain::Device {
        &self.swapchain_fn
    }

    fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        self.adapter.queue_families
    }

    fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    fn query_swap_chain_support(&self) -> Result<SwapChainSupport, SetupError> {
        query_support(self.context, self.physical, self.surface)
            .map_err(SetupError::device("surface support query"))
    }

    fn find_memory_type(
        &self,
        filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32, SetupError> {
        memory_type_index(&self.memory, filter, properties)
    }

    fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format, SetupError> {
        let instance = self.context.instance();
        select_supported_format(candidates, tiling, features, |format| unsafe {
            instance.get_physical_device_format_properties(self.physical, format)
        })
    }

    fn make_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory), SetupError> {
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = unsafe { self.device.create_buffer(&info, None) }
            .map_err(SetupError::device("buffer creation"))?;
        let req = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory = match self.allocate(req, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(SetupError::device("buffer memory bind")(e));
        }
        Ok((buffer, memory))
    }

    fn make_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Image, vk::DeviceMemory), SetupError> {
        let image = unsafe { self.device.create_image(info, None) }
            .map_err(SetupError::device("image creation"))?;
        let req = unsafe { self.device.get_image_memory_requirements(image) };
        let memory = match self.allocate(req, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { self.device.bind_image_memory(image, memory, 0) } {
            unsafe {
                self.device.destroy_image(image, None);
                self.device.free_memory(memory, None);
            }
            return Err(SetupError::device("image memory bind")(e));
        }
        Ok((image, memory))
    }

    fn begin_single_time_commands(&self) -> Result<vk::CommandBuffer, SetupError> {
        let alloc = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc) }
            .map_err(SetupError::device("one-shot command buffer allocation"))?[0];
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        if let Err(e) = unsafe { self.device.begin_command_buffer(cmd, &begin) } {
            unsafe {
                self.device
                    .free_command_buffers(self.command_pool, std::slice::from_ref(&cmd))
            };
            return Err(SetupError::device("one-shot command buffer begin")(e));
        }
        Ok(cmd)
    }

    fn end_single_time_commands(&self, cmd: vk::CommandBuffer) -> Result<(), SetupError> {
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        let result = unsafe {
            self.device
                .end_command_buffer(cmd)
                .and_then(|_| {
                    self.device.queue_submit(
                        self.graphics_queue,
                        std::slice::from_ref(&submit),
                        vk::Fence::null(),
                    )
                })
                .and_then(|_| self.device.queue_wait_idle(self.graphics_queue))
        };
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, std::slice::from_ref(&cmd))
        };
        result.map_err(SetupError::device("one-shot submit"))
    }

    fn wait_idle(&self) -> Result<(), SetupError> {
        unsafe { self.device.device_wait_idle() }.map_err(SetupError::device("device wait idle"))
    }
}

impl Device<'_> {
    fn allocate(
        &self,
        req: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory, SetupError> {
        let info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: self.find_memory_type(req.memory_type_bits, properties)?,
            ..Default::default()
        };
        unsafe { self.device.allocate_memory(&info, None) }
            .map_err(SetupError::device("memory allocation"))
    }
}

// Teardown: pool → device → surface. Swap-chains and everything else built on
// this device are already gone because they borrow it.
impl Drop for Device<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.context.surface_fn().destroy_surface(self.surface, None);
        }
    }
}

fn family_pair(families: QueueFamilyIndices) -> (u32, u32) {
    // Only reachable with a suitable adapter, whose families are complete.
    families.pair().unwrap_or((0, 0))
}

fn select_physical_device(
    context: &ApiContext,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, AdapterCapabilities), SetupError> {
    let physicals = unsafe { context.instance().enumerate_physical_devices() }
        .map_err(SetupError::device("adapter enumeration"))?;
    if physicals.is_empty() {
        return Err(SetupError::NoSuitableAdapter);
    }

    let mut candidates = Vec::with_capacity(physicals.len());
    for &physical in &physicals {
        let caps = describe_adapter(context, physical, surface);
        debug!(
            "adapter candidate {}: families={:?} adequate={} anisotropy={}",
            caps.name,
            caps.queue_families,
            caps.swap_chain.is_adequate(),
            caps.sampler_anisotropy
        );
        candidates.push(caps);
    }

    let index = select_adapter(&candidates, &REQUIRED_DEVICE_EXTENSIONS)
        .ok_or(SetupError::NoSuitableAdapter)?;
    Ok((physicals[index], candidates.swap_remove(index)))
}

fn describe_adapter(
    context: &ApiContext,
    physical: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> AdapterCapabilities {
    let instance = context.instance();
    let surface_fn = context.surface_fn();
    let properties = unsafe { instance.get_physical_device_properties(physical) };
    let name = cstr_lossy(properties.device_name_as_c_str());

    let extensions = unsafe { instance.enumerate_device_extension_properties(physical) }
        .unwrap_or_default()
        .iter()
        .map(|e| cstr_lossy(e.extension_name_as_c_str()))
        .collect();

    let families = unsafe { instance.get_physical_device_queue_family_properties(physical) };
    let queue_families = find_queue_families(&families, |index| unsafe {
        surface_fn
            .get_physical_device_surface_support(physical, index, surface)
            .unwrap_or(false)
    });

    let swap_chain = query_support(context, physical, surface).unwrap_or_else(|e| {
        warn!("{name}: surface support query failed: {e}");
        SwapChainSupport::default()
    });

    let features = unsafe { instance.get_physical_device_features(physical) };
    AdapterCapabilities {
        name,
        extensions,
        queue_families,
        swap_chain,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
    }
}

fn query_support(
    context: &ApiContext,
    physical: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<SwapChainSupport, vk::Result> {
    let surface_fn = context.surface_fn();
    unsafe {
        Ok(SwapChainSupport {
            capabilities: surface_fn.get_physical_device_surface_capabilities(physical, surface)?,
            formats: surface_fn.get_physical_device_surface_formats(physical, surface)?,
            present_modes: surface_fn
                .get_physical_device_surface_present_modes(physical, surface)?,
        })
    }
}

fn construct_logical_device(
    instance: &ash::Instance,
    physical: vk::PhysicalDevice,
    adapter: &AdapterCapabilities,
) -> Result<ash::Device, SetupError> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = adapter
        .queue_families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: vk::TRUE,
        ..Default::default()
    };
    let extensions: Vec<*const c_char> =
        REQUIRED_DEVICE_EXTENSIONS.iter().map(|n| n.as_ptr()).collect();

    let info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    unsafe { instance.create_device(physical, &info, None) }.map_err(|result| {
        SetupError::DeviceCreationFailed {
            adapter: adapter.name.clone(),
            result,
        }
    })
}

fn construct_command_pool(
    device: &ash::Device,
    families: QueueFamilyIndices,
) -> Result<vk::CommandPool, SetupError> {
    let (graphics, _) = family_pair(families);
    let info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: graphics,
        flags: vk::CommandPoolCreateFlags::TRANSIENT
            | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    unsafe { device.create_command_pool(&info, None) }
        .map_err(SetupError::CommandPoolCreationFailed)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Stand-in for tests that must fail before any device call.
    pub struct UntouchedDevice;

    const TOUCHED: &str = "device was used";

    impl GpuDevice for UntouchedDevice {
        fn raw(&self) -> &ash::Device {
            panic!("{TOUCHED}")
        }
        fn swapchain_fn(&self) -> &swapchain::Device {
            panic!("{TOUCHED}")
        }
        fn surface(&self) -> vk::SurfaceKHR {
            panic!("{TOUCHED}")
        }
        fn queue_families(&self) -> QueueFamilyIndices {
            panic!("{TOUCHED}")
        }
        fn graphics_queue(&self) -> vk::Queue {
            panic!("{TOUCHED}")
        }
        fn present_queue(&self) -> vk::Queue {
            panic!("{TOUCHED}")
        }
        fn command_pool(&self) -> vk::CommandPool {
            panic!("{TOUCHED}")
        }
        fn query_swap_chain_support(&self) -> Result<SwapChainSupport, SetupError> {
            panic!("{TOUCHED}")
        }
        fn find_memory_type(&self, _: u32, _: vk::MemoryPropertyFlags) -> Result<u32, SetupError> {
            panic!("{TOUCHED}")
        }
        fn find_supported_format(
            &self,
            _: &[vk::Format],
            _: vk::ImageTiling,
            _: vk::FormatFeatureFlags,
        ) -> Result<vk::Format, SetupError> {
            panic!("{TOUCHED}")
        }
        fn make_buffer(
            &self,
            _: vk::DeviceSize,
            _: vk::BufferUsageFlags,
            _: vk::MemoryPropertyFlags,
        ) -> Result<(vk::Buffer, vk::DeviceMemory), SetupError> {
            panic!("{TOUCHED}")
        }
        fn make_image(
            &self,
            _: &vk::ImageCreateInfo<'_>,
            _: vk::MemoryPropertyFlags,
        ) -> Result<(vk::Image, vk::DeviceMemory), SetupError> {
            panic!("{TOUCHED}")
        }
        fn begin_single_time_commands(&self) -> Result<vk::CommandBuffer, SetupError> {
            panic!("{TOUCHED}")
        }
        fn end_single_time_commands(&self, _: vk::CommandBuffer) -> Result<(), SetupError> {
            panic!("{TOUCHED}")
        }
        fn wait_idle(&self) -> Result<(), SetupError> {
            panic!("{TOUCHED}")
        }
    }
}
