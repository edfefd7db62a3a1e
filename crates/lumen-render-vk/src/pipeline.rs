// SPDX-License-Identifier: CEPL-1.0
//! Fixed graphics pipeline built from `<base><.stage>.spv` files.

use std::ffi::{CStr, OsString};
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ash::{util::read_spv, vk};
use tracing::{debug, info, warn};

use crate::{CommandRecorder, GpuDevice, SetupError};

const ENTRY_POINT: &CStr = c"main";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
    Geometry,
    TessControl,
    TessEval,
    Compute,
}

impl ShaderStageKind {
    pub const ALL: [Self; 6] = [
        Self::Vertex,
        Self::Fragment,
        Self::Geometry,
        Self::TessControl,
        Self::TessEval,
        Self::Compute,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Vertex => ".vert",
            Self::Fragment => ".frag",
            Self::Geometry => ".geom",
            Self::TessControl => ".tesc",
            Self::TessEval => ".tese",
            Self::Compute => ".comp",
        }
    }

    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            Self::TessEval => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// `<base><suffix>.spv`
    pub fn path_for(self, base: &Path) -> PathBuf {
        let mut name = OsString::from(base.as_os_str());
        name.push(self.suffix());
        name.push(".spv");
        PathBuf::from(name)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// One optional value per stage kind.
#[derive(Clone, Debug)]
pub struct ShaderStages<T> {
    slots: [Option<T>; 6],
}

impl<T> Default for ShaderStages<T> {
    fn default() -> Self {
        Self {
            slots: Default::default(),
        }
    }
}

impl<T> ShaderStages<T> {
    pub fn insert(&mut self, kind: ShaderStageKind, value: T) -> Option<T> {
        self.slots[kind.slot()].replace(value)
    }

    pub fn get(&self, kind: ShaderStageKind) -> Option<&T> {
        self.slots[kind.slot()].as_ref()
    }

    /// Present stages in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = (ShaderStageKind, &T)> {
        ShaderStageKind::ALL
            .into_iter()
            .zip(&self.slots)
            .filter_map(|(kind, slot)| slot.as_ref().map(|v| (kind, v)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads whichever stage files exist next to `base`. A missing file skips
/// that stage; a file that is not SPIR-V fails the whole load.
pub fn read_shader_stages(base: &Path) -> Result<ShaderStages<Vec<u32>>, SetupError> {
    let mut stages = ShaderStages::default();
    for kind in ShaderStageKind::ALL {
        let path = kind.path_for(base);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                continue;
            }
        };
        let code = read_spv(&mut file).map_err(|source| SetupError::InvalidShader {
            path: path.clone(),
            source,
        })?;
        debug!("loaded {} ({} words)", path.display(), code.len());
        stages.insert(kind, code);
    }
    Ok(stages)
}

/// Fixed-function state plus the layout and render pass a pipeline targets.
///
/// `layout` and `render_pass` start null and must be set before building.
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
    pub input_assembly: vk::PipelineInputAssemblyStateCreateInfo<'static>,
    pub rasterization: vk::PipelineRasterizationStateCreateInfo<'static>,
    pub multisample: vk::PipelineMultisampleStateCreateInfo<'static>,
    pub color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    pub depth_stencil: vk::PipelineDepthStencilStateCreateInfo<'static>,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

impl PipelineConfig {
    pub fn from_extent(extent: vk::Extent2D) -> Self {
        Self {
            viewport: vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
            scissor: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            input_assembly: vk::PipelineInputAssemblyStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                primitive_restart_enable: vk::FALSE,
                ..Default::default()
            },
            rasterization: vk::PipelineRasterizationStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
                depth_clamp_enable: vk::FALSE,
                rasterizer_discard_enable: vk::FALSE,
                polygon_mode: vk::PolygonMode::FILL,
                line_width: 1.0,
                cull_mode: vk::CullModeFlags::NONE,
                front_face: vk::FrontFace::CLOCKWISE,
                depth_bias_enable: vk::FALSE,
                ..Default::default()
            },
            multisample: vk::PipelineMultisampleStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
                sample_shading_enable: vk::FALSE,
                rasterization_samples: vk::SampleCountFlags::TYPE_1,
                min_sample_shading: 1.0,
                ..Default::default()
            },
            color_blend_attachment: vk::PipelineColorBlendAttachmentState {
                blend_enable: vk::FALSE,
                src_color_blend_factor: vk::BlendFactor::ONE,
                dst_color_blend_factor: vk::BlendFactor::ZERO,
                color_blend_op: vk::BlendOp::ADD,
                src_alpha_blend_factor: vk::BlendFactor::ONE,
                dst_alpha_blend_factor: vk::BlendFactor::ZERO,
                alpha_blend_op: vk::BlendOp::ADD,
                color_write_mask: vk::ColorComponentFlags::RGBA,
            },
            depth_stencil: vk::PipelineDepthStencilStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
                depth_test_enable: vk::TRUE,
                depth_write_enable: vk::TRUE,
                depth_compare_op: vk::CompareOp::LESS,
                depth_bounds_test_enable: vk::FALSE,
                min_depth_bounds: 0.0,
                max_depth_bounds: 1.0,
                stencil_test_enable: vk::FALSE,
                ..Default::default()
            },
            layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,
        }
    }

    pub fn with_targets(
        mut self,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
        subpass: u32,
    ) -> Self {
        self.layout = layout;
        self.render_pass = render_pass;
        self.subpass = subpass;
        self
    }
}

/// How vertices are fed to the pipeline.
#[derive(Clone, Debug, Default)]
pub struct VertexInput {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// Descriptor set layouts and push constant ranges shared by pipelines.
pub struct PipelineLayout<'d> {
    device: &'d dyn GpuDevice,
    layout: vk::PipelineLayout,
}

impl<'d> PipelineLayout<'d> {
    pub fn new(
        device: &'d dyn GpuDevice,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self, SetupError> {
        let info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: set_layouts.len() as u32,
            p_set_layouts: set_layouts.as_ptr(),
            push_constant_range_count: push_constant_ranges.len() as u32,
            p_push_constant_ranges: push_constant_ranges.as_ptr(),
            ..Default::default()
        };
        let layout = unsafe { device.raw().create_pipeline_layout(&info, None) }
            .map_err(SetupError::PipelineLayoutCreationFailed)?;
        Ok(Self { device, layout })
    }

    pub fn raw(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout<'_> {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_pipeline_layout(self.layout, None) };
    }
}

/// Shader modules plus the compiled graphics pipeline using them.
pub struct Pipeline<'d> {
    device: &'d dyn GpuDevice,
    modules: ShaderStages<vk::ShaderModule>,
    pipeline: vk::Pipeline,
}

impl<'d> Pipeline<'d> {
    pub fn new(
        device: &'d dyn GpuDevice,
        shader_base: &Path,
        config: &PipelineConfig,
        vertex_input: &VertexInput,
    ) -> Result<Self, SetupError> {
        assert!(
            config.layout != vk::PipelineLayout::null(),
            "pipeline config has no layout"
        );
        assert!(
            config.render_pass != vk::RenderPass::null(),
            "pipeline config has no render pass"
        );

        let code = read_shader_stages(shader_base)?;
        if code.is_empty() {
            return Err(SetupError::NoShaderFound {
                base: shader_base.to_path_buf(),
            });
        }

        // Built empty first so Drop cleans up modules if a later step fails.
        let mut this = Self {
            device,
            modules: ShaderStages::default(),
            pipeline: vk::Pipeline::null(),
        };
        for (kind, words) in code.iter() {
            let info = vk::ShaderModuleCreateInfo {
                s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
                code_size: words.len() * 4,
                p_code: words.as_ptr(),
                ..Default::default()
            };
            let module = unsafe { device.raw().create_shader_module(&info, None) }
                .map_err(SetupError::device("shader module creation"))?;
            this.modules.insert(kind, module);
        }
        this.pipeline = this.compile(config, vertex_input)?;
        info!(
            "pipeline from {} with {} stage(s)",
            shader_base.display(),
            this.modules.len()
        );
        Ok(this)
    }

    fn compile(
        &self,
        config: &PipelineConfig,
        vertex_input: &VertexInput,
    ) -> Result<vk::Pipeline, SetupError> {
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .modules
            .iter()
            .map(|(kind, &module)| vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: kind.flags(),
                module,
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            })
            .collect();

        let vertex_state = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: vertex_input.bindings.len() as u32,
            p_vertex_binding_descriptions: vertex_input.bindings.as_ptr(),
            vertex_attribute_description_count: vertex_input.attributes.len() as u32,
            p_vertex_attribute_descriptions: vertex_input.attributes.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: &config.viewport,
            scissor_count: 1,
            p_scissors: &config.scissor,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            logic_op_enable: vk::FALSE,
            logic_op: vk::LogicOp::COPY,
            attachment_count: 1,
            p_attachments: &config.color_blend_attachment,
            ..Default::default()
        };

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_state,
            p_input_assembly_state: &config.input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &config.rasterization,
            p_multisample_state: &config.multisample,
            p_depth_stencil_state: &config.depth_stencil,
            p_color_blend_state: &color_blend,
            layout: config.layout,
            render_pass: config.render_pass,
            subpass: config.subpass,
            base_pipeline_index: -1,
            ..Default::default()
        };

        let pipelines = unsafe {
            self.device.raw().create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&info),
                None,
            )
        }
        .map_err(|(_, result)| SetupError::PipelineCreationFailed(result))?;
        pipelines
            .into_iter()
            .next()
            .ok_or(SetupError::PipelineCreationFailed(vk::Result::ERROR_UNKNOWN))
    }

    pub fn bind(&self, recorder: &mut dyn CommandRecorder, bind_point: vk::PipelineBindPoint) {
        recorder.bind_pipeline(bind_point, self.pipeline);
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn stage_count(&self) -> usize {
        self.modules.len()
    }
}

impl Drop for Pipeline<'_> {
    fn drop(&mut self) {
        let raw = self.device.raw();
        unsafe {
            for (_, &module) in self.modules.iter() {
                raw.destroy_shader_module(module, None);
            }
            if self.pipeline != vk::Pipeline::null() {
                raw.destroy_pipeline(self.pipeline, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{Op, OpLog};
    use crate::device::testing::UntouchedDevice;
    use ash::vk::Handle;
    use pretty_assertions::assert_eq;
    use std::fs;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn write_spirv(dir: &Path, name: &str, words: &[u32]) {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        fs::write(dir.join(name), bytes).unwrap();
    }

    #[test]
    fn suffixes_and_stage_flags() {
        let suffixes: Vec<_> = ShaderStageKind::ALL.iter().map(|k| k.suffix()).collect();
        assert_eq!(
            suffixes,
            vec![".vert", ".frag", ".geom", ".tesc", ".tese", ".comp"]
        );
        assert_eq!(
            ShaderStageKind::TessEval.flags(),
            vk::ShaderStageFlags::TESSELLATION_EVALUATION
        );
        assert_eq!(
            ShaderStageKind::Fragment.path_for(Path::new("shaders/simple")),
            PathBuf::from("shaders/simple.frag.spv")
        );
    }

    #[test]
    fn stage_map_keeps_pipeline_order() {
        let mut stages = ShaderStages::default();
        assert!(stages.is_empty());
        stages.insert(ShaderStageKind::Fragment, "f");
        stages.insert(ShaderStageKind::Vertex, "v");
        assert_eq!(stages.insert(ShaderStageKind::Vertex, "v2"), Some("v"));
        let kinds: Vec<_> = stages.iter().map(|(k, v)| (k, *v)).collect();
        assert_eq!(
            kinds,
            vec![
                (ShaderStageKind::Vertex, "v2"),
                (ShaderStageKind::Fragment, "f")
            ]
        );
        assert_eq!(stages.len(), 2);
        assert_eq!(stages.get(ShaderStageKind::Compute), None);
    }

    #[test]
    fn loads_only_present_stages() {
        let dir = tempfile::tempdir().unwrap();
        write_spirv(dir.path(), "tri.vert.spv", &[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        write_spirv(dir.path(), "tri.frag.spv", &[SPIRV_MAGIC, 0x0001_0000, 0, 2, 0]);
        write_spirv(dir.path(), "other.geom.spv", &[SPIRV_MAGIC]);

        let stages = read_shader_stages(&dir.path().join("tri")).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages.get(ShaderStageKind::Vertex).unwrap()[3], 1);
        assert_eq!(stages.get(ShaderStageKind::Fragment).unwrap()[3], 2);
        assert!(stages.get(ShaderStageKind::Geometry).is_none());
    }

    #[test]
    fn nothing_on_disk_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let stages = read_shader_stages(&dir.path().join("missing")).unwrap();
        assert!(stages.is_empty());
    }

    #[test]
    fn truncated_spirv_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.vert.spv"), [0x03, 0x02, 0x23]).unwrap();
        let err = read_shader_stages(&dir.path().join("bad")).unwrap_err();
        match err {
            SetupError::InvalidShader { path, .. } => {
                assert!(path.ends_with("bad.vert.spv"));
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn config_viewport_and_scissor_follow_extent() {
        let extent = vk::Extent2D {
            width: 1024,
            height: 720,
        };
        let config = PipelineConfig::from_extent(extent);
        assert_eq!(config.viewport.width, 1024.0);
        assert_eq!(config.viewport.height, 720.0);
        assert_eq!(config.viewport.max_depth, 1.0);
        assert_eq!(config.scissor.extent, extent);
        assert_eq!((config.scissor.offset.x, config.scissor.offset.y), (0, 0));
    }

    #[test]
    fn config_fixed_function_defaults() {
        let config = PipelineConfig::from_extent(vk::Extent2D::default());
        assert_eq!(
            config.input_assembly.topology,
            vk::PrimitiveTopology::TRIANGLE_LIST
        );
        assert_eq!(config.rasterization.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(config.depth_stencil.depth_compare_op, vk::CompareOp::LESS);
        assert_eq!(
            config.multisample.rasterization_samples,
            vk::SampleCountFlags::TYPE_1
        );
        assert_eq!(config.layout, vk::PipelineLayout::null());
        assert_eq!(config.render_pass, vk::RenderPass::null());

        let targeted = config.with_targets(
            vk::PipelineLayout::from_raw(3),
            vk::RenderPass::from_raw(4),
            0,
        );
        assert_eq!(targeted.layout.as_raw(), 3);
        assert_eq!(targeted.render_pass.as_raw(), 4);
    }

    #[test]
    #[should_panic(expected = "no layout")]
    fn building_without_layout_panics() {
        let config = PipelineConfig::from_extent(vk::Extent2D::default());
        let _ = Pipeline::new(
            &UntouchedDevice,
            Path::new("unused"),
            &config,
            &VertexInput::default(),
        );
    }

    #[test]
    fn no_shader_found_names_base() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::from_extent(vk::Extent2D::default()).with_targets(
            vk::PipelineLayout::from_raw(1),
            vk::RenderPass::from_raw(1),
            0,
        );
        let base = dir.path().join("ghost");
        let err = Pipeline::new(&UntouchedDevice, &base, &config, &VertexInput::default());
        match err {
            Err(SetupError::NoShaderFound { base: b }) => assert_eq!(b, base),
            Err(other) => panic!("unexpected {other}"),
            Ok(_) => panic!("pipeline built without shaders"),
        }
    }

    #[test]
    fn bind_records_the_pipeline() {
        let mut log = OpLog::default();
        let pipeline = std::mem::ManuallyDrop::new(Pipeline {
            device: &UntouchedDevice,
            modules: ShaderStages::default(),
            pipeline: vk::Pipeline::from_raw(9),
        });
        pipeline.bind(&mut log, vk::PipelineBindPoint::GRAPHICS);
        assert_eq!(log.0, vec![Op::BindPipeline(vk::Pipeline::from_raw(9))]);
    }
}
