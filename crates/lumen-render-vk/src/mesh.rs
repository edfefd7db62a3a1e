// SPDX-License-Identifier: CEPL-1.0
use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::pipeline::VertexInput;
use crate::{CommandRecorder, GpuDevice, SetupError};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 4]) -> Self {
        Self { position, color }
    }

    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: offset_of!(Self, color) as u32,
            },
        ]
    }

    pub fn vertex_input() -> VertexInput {
        VertexInput {
            bindings: Self::binding_descriptions(),
            attributes: Self::attribute_descriptions(),
        }
    }
}

/// Immutable vertex buffer in host-visible, coherent memory.
pub struct StaticMesh<'d> {
    device: &'d dyn GpuDevice,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    vertex_count: u32,
}

impl<'d> StaticMesh<'d> {
    /// # Panics
    /// With fewer than three vertices.
    pub fn new(device: &'d dyn GpuDevice, vertices: &[Vertex]) -> Result<Self, SetupError> {
        assert!(
            vertices.len() >= 3,
            "a mesh needs at least 3 vertices, got {}",
            vertices.len()
        );
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let size = bytes.len() as vk::DeviceSize;
        let (buffer, memory) = device.make_buffer(
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let mesh = Self {
            device,
            buffer,
            memory,
            vertex_count: vertices.len() as u32,
        };

        let raw = device.raw();
        unsafe {
            let dst = raw
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
                .map_err(SetupError::device("vertex buffer map"))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.cast::<u8>(), bytes.len());
            raw.unmap_memory(memory);
        }
        debug!("mesh: {} vertices, {size} bytes", mesh.vertex_count);
        Ok(mesh)
    }

    pub fn bind(&self, recorder: &mut dyn CommandRecorder) {
        recorder.bind_vertex_buffers(0, &[self.buffer], &[0]);
    }

    pub fn draw(&self, recorder: &mut dyn CommandRecorder) {
        recorder.draw(self.vertex_count, 1, 0, 0);
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

impl Drop for StaticMesh<'_> {
    fn drop(&mut self) {
        let raw = self.device.raw();
        unsafe {
            raw.destroy_buffer(self.buffer, None);
            raw.free_memory(self.memory, None);
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

    const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

    #[test]
    #[should_panic(expected = "at least 3 vertices, got 2")]
    fn two_vertices_fail_before_allocation() {
        let verts = [
            Vertex::new([0.0, -0.5, 0.0], RED),
            Vertex::new([0.5, 0.5, 0.0], RED),
        ];
        let _ = StaticMesh::new(&UntouchedDevice, &verts);
    }

    #[test]
    fn layout_matches_shader_inputs() {
        assert_eq!(size_of::<Vertex>(), 28);
        let bindings = Vertex::binding_descriptions();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 28);
        assert_eq!(bindings[0].input_rate, vk::VertexInputRate::VERTEX);

        let attrs = Vertex::attribute_descriptions();
        let summary: Vec<_> = attrs
            .iter()
            .map(|a| (a.location, a.format, a.offset))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, vk::Format::R32G32B32_SFLOAT, 0),
                (1, vk::Format::R32G32B32A32_SFLOAT, 12),
            ]
        );
    }

    #[test]
    fn vertices_are_plain_bytes() {
        let v = [Vertex::new([1.0, 2.0, 3.0], RED)];
        let floats: &[f32] = bytemuck::cast_slice(&v);
        assert_eq!(floats, &[1.0, 2.0, 3.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn bind_then_draw_all_vertices() {
        let mesh = std::mem::ManuallyDrop::new(StaticMesh {
            device: &UntouchedDevice,
            buffer: vk::Buffer::from_raw(5),
            memory: vk::DeviceMemory::null(),
            vertex_count: 9,
        });
        let mut log = OpLog::default();
        mesh.bind(&mut log);
        mesh.draw(&mut log);
        assert_eq!(
            log.0,
            vec![
                Op::BindVertexBuffers(vec![vk::Buffer::from_raw(5)]),
                Op::Draw(9)
            ]
        );
    }
}
