use serde::{
    Deserialize,
    Serialize,
};

use super::gpu::{
    GeometryFlags,
    IndexFormat,
    VertexFormat,
};
use super::*;
use crate::Vec3;

/// Size of one AABB padding block in bytes.
pub const AABB_PADDING_BLOCK_SIZE: u64 = 8;
/// `min.xyz` and `max.xyz` as f32.
pub const AABB_SIZE: u64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    Triangles,
    Aabbs,
}

/// Geometry data ready to be uploaded.
pub(super) struct EncodedGeometry {
    pub(super) vertices: Vec<u8>,
    pub(super) stride: u64,
    pub(super) indices: Option<Vec<u8>>,
}

/// One triangle list or AABB list. For AABBs every consecutive pair of vertices holds the
/// minimum and the maximum corner.
#[derive(Debug, Clone)]
pub struct GeometryDescriptor {
    geometry_type: GeometryType,
    vertex_format: VertexFormat,
    index_format: Option<IndexFormat>,
    vertices: Vec<Vec3>,
    indices: Vec<u32>,
    padding_blocks: u32,
    flags: GeometryFlags,
}

impl GeometryDescriptor {
    pub fn triangles(vertex_format: VertexFormat, index_format: Option<IndexFormat>) -> Self {
        Self {
            geometry_type: GeometryType::Triangles,
            vertex_format,
            index_format,
            vertices: Vec::new(),
            indices: Vec::new(),
            padding_blocks: 0,
            flags: GeometryFlags::OPAQUE,
        }
    }

    pub fn aabbs() -> Self {
        Self {
            geometry_type: GeometryType::Aabbs,
            vertex_format: VertexFormat::R32G32B32Float,
            index_format: None,
            vertices: Vec::new(),
            indices: Vec::new(),
            padding_blocks: 0,
            flags: GeometryFlags::OPAQUE,
        }
    }

    pub fn add_vertex(&mut self, position: Vec3) {
        self.vertices.push(position);
    }

    pub fn add_index(&mut self, index: u32) {
        self.indices.push(index);
    }

    pub fn set_padding_blocks(&mut self, padding_blocks: u32) {
        self.padding_blocks = padding_blocks;
    }

    pub fn set_flags(&mut self, flags: GeometryFlags) {
        self.flags = flags;
    }

    #[inline(always)]
    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    #[inline(always)]
    pub fn vertex_format(&self) -> VertexFormat {
        self.vertex_format
    }

    #[inline(always)]
    pub fn index_format(&self) -> Option<IndexFormat> {
        self.index_format
    }

    #[inline(always)]
    pub fn flags(&self) -> GeometryFlags {
        self.flags
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn primitive_count(&self) -> u32 {
        match self.geometry_type {
            GeometryType::Triangles if self.index_format.is_some() => (self.indices.len() / 3) as u32,
            GeometryType::Triangles => (self.vertices.len() / 3) as u32,
            GeometryType::Aabbs => (self.vertices.len() / 2) as u32,
        }
    }

    /// Distance between two consecutive vertices or AABBs in the uploaded data.
    pub fn stride(&self) -> u64 {
        match self.geometry_type {
            GeometryType::Triangles => {
                self.vertex_format.element_size() as u64 * (1 + self.padding_blocks as u64)
            }
            GeometryType::Aabbs => AABB_SIZE + AABB_PADDING_BLOCK_SIZE * self.padding_blocks as u64,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.geometry_type {
            GeometryType::Triangles => match self.index_format {
                None => {
                    if !self.indices.is_empty() {
                        return Err(Error::InvalidGeometry(format!(
                            "{} indices were added to a geometry without an index format",
                            self.indices.len()
                        )));
                    }
                    if self.vertices.len() % 3 != 0 {
                        return Err(Error::InvalidGeometry(format!(
                            "{} vertices do not form a triangle list",
                            self.vertices.len()
                        )));
                    }
                }
                Some(index_format) => {
                    if self.indices.len() % 3 != 0 {
                        return Err(Error::InvalidGeometry(format!(
                            "{} indices do not form a triangle list",
                            self.indices.len()
                        )));
                    }
                    let vertex_count = self.vertices.len() as u64;
                    if let Some(index) = self
                        .indices
                        .iter()
                        .find(|&&index| index as u64 >= vertex_count || index > index_format.max_index())
                    {
                        return Err(Error::InvalidGeometry(format!(
                            "index {} is out of range for {} vertices stored as {:?}",
                            index, vertex_count, index_format
                        )));
                    }
                }
            },
            GeometryType::Aabbs => {
                if self.index_format.is_some() || !self.indices.is_empty() {
                    return Err(Error::InvalidGeometry("AABB geometry cannot be indexed".to_string()));
                }
                if self.vertices.len() % 2 != 0 {
                    return Err(Error::InvalidGeometry(format!(
                        "{} vertices do not form min/max pairs",
                        self.vertices.len()
                    )));
                }
            }
        }
        Ok(())
    }

    pub(super) fn encode(&self) -> EncodedGeometry {
        let stride = self.stride();
        match self.geometry_type {
            GeometryType::Triangles => {
                let padding = (stride - self.vertex_format.element_size() as u64) as usize;
                let mut vertices = Vec::with_capacity(self.vertices.len() * stride as usize);
                for &vertex in &self.vertices {
                    self.vertex_format.encode(vertex, &mut vertices);
                    vertices.resize(vertices.len() + padding, 0u8);
                }
                let indices = self.index_format.map(|index_format| {
                    let mut indices = Vec::with_capacity(self.indices.len() * index_format.size() as usize);
                    for &index in &self.indices {
                        index_format.encode(index, &mut indices);
                    }
                    indices
                });
                EncodedGeometry {
                    vertices,
                    stride,
                    indices,
                }
            }
            GeometryType::Aabbs => {
                let padding = (stride - AABB_SIZE) as usize;
                let mut vertices = Vec::with_capacity(self.vertices.len() / 2 * stride as usize);
                for pair in self.vertices.chunks_exact(2) {
                    for corner in pair {
                        vertices.extend_from_slice(bytemuck::cast_slice(&corner.to_array()));
                    }
                    vertices.resize(vertices.len() + padding, 0u8);
                }
                EncodedGeometry {
                    vertices,
                    stride,
                    indices: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn quad(index_format: Option<IndexFormat>) -> GeometryDescriptor {
        let mut geometry = GeometryDescriptor::triangles(VertexFormat::R32G32B32Float, index_format);
        for vertex in [[0f32, 1f32, 0f32], [0f32, 0f32, 0f32], [1f32, 1f32, 0f32], [1f32, 0f32, 0f32]] {
            geometry.add_vertex(Vec3::from_array(vertex));
        }
        for index in [0, 1, 2, 2, 1, 3] {
            geometry.add_index(index);
        }
        geometry
    }

    #[test]
    fn indexed_quads_count_triangles_by_index() {
        let geometry = quad(Some(IndexFormat::U16));
        geometry.validate().unwrap();
        assert_eq!(geometry.primitive_count(), 2);
        let encoded = geometry.encode();
        assert_eq!(encoded.vertices.len(), 48);
        assert_eq!(encoded.indices.map(|indices| indices.len()), Some(12));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let mut geometry = quad(Some(IndexFormat::U32));
        geometry.add_index(1);
        geometry.add_index(2);
        geometry.add_index(4);
        assert!(matches!(geometry.validate(), Err(Error::InvalidGeometry(_))));
    }

    #[test]
    fn vertex_counts_must_form_primitives() {
        let mut triangles = GeometryDescriptor::triangles(VertexFormat::R16G16Float, None);
        triangles.add_vertex(Vec3::ZERO);
        triangles.add_vertex(Vec3::X);
        assert!(matches!(triangles.validate(), Err(Error::InvalidGeometry(_))));

        let mut aabbs = GeometryDescriptor::aabbs();
        aabbs.add_vertex(Vec3::ZERO);
        aabbs.add_vertex(Vec3::ONE);
        aabbs.validate().unwrap();
        aabbs.add_index(0);
        assert!(matches!(aabbs.validate(), Err(Error::InvalidGeometry(_))));
    }

    #[test]
    fn padding_widens_the_stride() {
        let mut triangles = quad(None);
        triangles.indices.clear();
        triangles.set_padding_blocks(1);
        assert_eq!(triangles.stride(), 24);
        assert_eq!(triangles.encode().vertices.len(), 4 * 24);

        let mut aabbs = GeometryDescriptor::aabbs();
        aabbs.add_vertex(Vec3::ZERO);
        aabbs.add_vertex(Vec3::ONE);
        aabbs.set_padding_blocks(2);
        assert_eq!(aabbs.stride(), 40);
        let encoded = aabbs.encode();
        assert_eq!(encoded.vertices.len(), 40);
        assert_eq!(&encoded.vertices[12..16], &1f32.to_le_bytes());
    }
}
