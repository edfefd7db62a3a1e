// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// Fatal failures while building the context, device, swap-chain, pipeline
/// or mesh. None of these are retried.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),
    #[error("window handle unavailable: {0}")]
    Handle(#[from] raw_window_handle::HandleError),
    #[error("missing instance extensions: {}", .0.join(", "))]
    MissingInstanceExtensions(Vec<String>),
    #[error("instance creation failed: {0}")]
    InstanceCreationFailed(vk::Result),
    #[error("debug messenger creation failed: {0}")]
    DebugMessengerFailed(vk::Result),
    #[error("surface creation failed: {0}")]
    SurfaceCreationFailed(vk::Result),
    #[error("no suitable graphics adapter found")]
    NoSuitableAdapter,
    #[error("failed to create logical device on \"{adapter}\": {result}")]
    DeviceCreationFailed { adapter: String, result: vk::Result },
    #[error("failed to create command pool: {0}")]
    CommandPoolCreationFailed(vk::Result),
    #[error("no memory type matches filter {filter:#b} with {properties:?}")]
    NoSuitableMemoryType {
        filter: u32,
        properties: vk::MemoryPropertyFlags,
    },
    #[error("{what} failed: {result}")]
    Device {
        what: &'static str,
        result: vk::Result,
    },
    #[error("no candidate format supports {features:?}")]
    UnsupportedFormat { features: vk::FormatFeatureFlags },
    #[error("unsupported image tiling {0:?}")]
    UnsupportedTiling(vk::ImageTiling),
    #[error("swap-chain {stage} stage failed: {result}")]
    SwapChainStage {
        stage: BuildStage,
        result: vk::Result,
    },
    #[error("no shader stage found for \"{}\"", .base.display())]
    NoShaderFound { base: PathBuf },
    #[error("invalid SPIR-V in {}: {source}", .path.display())]
    InvalidShader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create pipeline layout: {0}")]
    PipelineLayoutCreationFailed(vk::Result),
    #[error("failed to create graphics pipeline: {0}")]
    PipelineCreationFailed(vk::Result),
}

impl SetupError {
    pub(crate) fn device(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Device { what, result }
    }

    pub(crate) fn stage(stage: BuildStage) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::SwapChainStage { stage, result }
    }
}

/// Construction stages of a swap-chain, in the order they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildStage {
    Images,
    Views,
    RenderPass,
    Depth,
    Framebuffers,
    Sync,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Images => "images",
            Self::Views => "image views",
            Self::RenderPass => "render pass",
            Self::Depth => "depth resources",
            Self::Framebuffers => "framebuffers",
            Self::Sync => "synchronization",
        })
    }
}

/// Per-frame failures. Out-of-date and suboptimal surfaces are reported
/// through the `Acquired`/`Presented` tags instead.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to acquire swap-chain image: {0}")]
    AcquireFailed(vk::Result),
    #[error("failed to submit frame for image {image_index}: {result}")]
    SubmitFailed { image_index: u32, result: vk::Result },
    #[error("command recording failed: {0}")]
    Recording(vk::Result),
    #[error("swap-chain rebuild failed: {0}")]
    Rebuild(#[from] SetupError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_extensions_are_listed() {
        let err = SetupError::MissingInstanceExtensions(vec![
            "VK_KHR_surface".into(),
            "VK_KHR_xcb_surface".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "missing instance extensions: VK_KHR_surface, VK_KHR_xcb_surface"
        );
    }

    #[test]
    fn device_failure_names_adapter() {
        let err = SetupError::DeviceCreationFailed {
            adapter: "Test GPU".into(),
            result: vk::Result::ERROR_INITIALIZATION_FAILED,
        };
        assert!(err.to_string().contains("\"Test GPU\""));
    }

    #[test]
    fn submit_failure_names_image() {
        let err = FrameError::SubmitFailed {
            image_index: 2,
            result: vk::Result::ERROR_DEVICE_LOST,
        };
        assert!(err.to_string().contains("image 2"));
    }

    #[test]
    fn stage_failure_names_stage() {
        let err = SetupError::stage(BuildStage::Depth)(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(err.to_string().starts_with("swap-chain depth resources stage"));
    }
}
