//! Vertex and index buffers

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::device::GfxDevice;

/// GPU vertex data with an optional 32-bit index buffer
#[derive(Debug)]
pub struct VertexBuffer {
    layout: VertexBufferLayout,
    buffer: BufferHandle,
    vertex_count: u32,
    index_buffer: Option<(BufferHandle, u32)>,
}

impl VertexBuffer {
    /// Upload interleaved [`Vertex`] data
    pub fn new(device: &mut GfxDevice, label: &str, vertices: &[Vertex], indices: Option<&[u32]>) -> BackendResult<Self> {
        Self::from_bytes(device, label, Vertex::layout(), bytemuck::cast_slice(vertices), indices)
    }

    /// Upload raw vertex bytes described by `layout`
    pub fn from_bytes(
        device: &mut GfxDevice,
        label: &str,
        layout: VertexBufferLayout,
        vertex_bytes: &[u8],
        indices: Option<&[u32]>,
    ) -> BackendResult<Self> {
        let vertex_count = (vertex_bytes.len() as u64 / layout.array_stride.max(1)) as u32;
        let backend = device.backend_mut();
        let buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Vertices", label)),
                size: vertex_bytes.len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            vertex_bytes,
        )?;

        let index_buffer = match indices {
            Some(indices) if !indices.is_empty() => {
                let handle = backend.create_buffer_init(
                    &BufferDescriptor {
                        label: Some(format!("{} Indices", label)),
                        size: std::mem::size_of_val(indices) as u64,
                        usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
                        mapped_at_creation: false,
                    },
                    bytemuck::cast_slice(indices),
                )?;
                Some((handle, indices.len() as u32))
            }
            _ => None,
        };

        Ok(Self {
            layout,
            buffer,
            vertex_count,
            index_buffer,
        })
    }

    /// Two triangles covering clip space, uv (0,0) at the top left
    pub fn fullscreen_quad(device: &mut GfxDevice) -> BackendResult<Self> {
        let corner = |x: f32, y: f32| Vertex {
            position: glam::Vec3::new(x, y, 0.0),
            normal: glam::Vec3::Z,
            uv: glam::Vec2::new((x + 1.0) * 0.5, (1.0 - y) * 0.5),
            tangent: glam::Vec4::X,
        };
        let vertices = [corner(-1.0, -1.0), corner(1.0, -1.0), corner(1.0, 1.0), corner(-1.0, 1.0)];
        Self::new(device, "Fullscreen Quad", &vertices, Some(&[0, 1, 2, 0, 2, 3]))
    }

    pub fn layout(&self) -> &VertexBufferLayout {
        &self.layout
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> Option<u32> {
        self.index_buffer.map(|(_, count)| count)
    }

    pub fn index_buffer(&self) -> Option<(BufferHandle, IndexFormat)> {
        self.index_buffer.map(|(buffer, _)| (buffer, IndexFormat::Uint32))
    }

    pub fn destroy(&mut self, device: &mut GfxDevice) {
        let backend = device.backend_mut();
        backend.destroy_buffer(self.buffer);
        if let Some((buffer, _)) = self.index_buffer.take() {
            backend.destroy_buffer(buffer);
        }
    }
}
