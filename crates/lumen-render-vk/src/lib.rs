// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan backend: instance, device, swap-chain presentation, a fixed
//! graphics pipeline and static meshes.
//!
//! Ownership is strictly nested. [`ApiContext`] outlives [`Device`], which
//! is borrowed as `&dyn GpuDevice` by every [`SwapChain`], [`Pipeline`],
//! [`PipelineLayout`] and [`StaticMesh`]; the borrow checker enforces the
//! teardown order.

pub mod adapter;
pub mod commands;
pub mod context;
pub mod device;
mod error;
pub mod frame_ring;
pub mod mesh;
pub mod pipeline;
pub mod resources;
pub mod swapchain;

pub use adapter::{QueueFamilyIndices, SwapChainSupport};
pub use commands::{
    record_render_pass, ClearValues, CommandBufferRecorder, CommandRecorder, RenderPassBegin,
};
pub use context::{ApiContext, ContextOptions};
pub use device::{Device, GpuDevice};
pub use error::{BuildStage, FrameError, SetupError};
pub use frame_ring::MAX_FRAMES_IN_FLIGHT;
pub use mesh::{StaticMesh, Vertex};
pub use pipeline::{Pipeline, PipelineConfig, PipelineLayout, ShaderStageKind, VertexInput};
pub use swapchain::{Acquired, Presented, SwapChain};

pub use ash::vk;
