use raycts_core::gpu::{
    AccelerationStructureBuildInfo,
    AccelerationStructureGeometryData,
    AccelerationStructureInputs,
    BackendError,
    BuildAccelerationStructureFlags,
    GeometryFlags,
    IndexFormat,
    InstanceRecord,
    VertexFormat,
};
use raycts_core::Vec3;

use crate::image::{
    ImageLevel,
    PrimitiveRecord,
};
use crate::{
    SoftAccelerationStructure,
    SoftBackend,
    SoftBuffer,
    SoftShared,
};

const AABB_POSITIONS_SIZE: u64 = 24;

#[derive(Clone)]
pub(crate) struct IndexJob {
    pub format: IndexFormat,
    pub buffer: SoftBuffer,
    pub offset: u64,
}

#[derive(Clone)]
pub(crate) enum GeometryJobData {
    Triangles {
        vertex_format: VertexFormat,
        vertex_buffer: SoftBuffer,
        vertex_offset: u64,
        vertex_stride: u64,
        max_vertex: u32,
        index: Option<IndexJob>,
    },
    Aabbs {
        buffer: SoftBuffer,
        offset: u64,
        stride: u64,
    },
}

#[derive(Clone)]
pub(crate) struct GeometryJob {
    pub data: GeometryJobData,
    pub flags: GeometryFlags,
    pub primitive_count: u32,
}

#[derive(Clone)]
pub(crate) struct InstancesJob {
    pub buffer: SoftBuffer,
    pub offset: u64,
    pub count: u32,
    pub array_of_pointers: bool,
}

#[derive(Clone)]
pub(crate) enum BuildInputsJob {
    Bottom(Vec<GeometryJob>),
    Top(InstancesJob),
}

/// Build parameters captured by value, so recorded and deferred builds do not borrow the caller.
#[derive(Clone)]
pub(crate) struct BuildJob {
    pub inputs: BuildInputsJob,
    pub flags: BuildAccelerationStructureFlags,
    pub dst: SoftAccelerationStructure,
    pub scratch: SoftBuffer,
    pub scratch_offset: u64,
}

/// Contiguous range of primitives or instances processed by one unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct WorkChunk {
    pub geometry_index: u32,
    pub first: u32,
    pub count: u32,
}

impl BuildJob {
    pub(crate) fn from_info(info: &AccelerationStructureBuildInfo<SoftBackend>) -> Result<Self, BackendError> {
        let inputs = match &info.inputs {
            AccelerationStructureInputs::BottomLevel(geometries) => {
                let mut jobs = Vec::with_capacity(geometries.len());
                for geometry in geometries.iter() {
                    let data = match &geometry.data {
                        AccelerationStructureGeometryData::Triangles(triangles) => {
                            let index = match (triangles.index_format, triangles.index_buffer) {
                                (Some(format), Some(buffer)) => Some(IndexJob {
                                    format,
                                    buffer: buffer.clone(),
                                    offset: triangles.index_buffer_offset,
                                }),
                                (None, _) => None,
                                (Some(_), None) => return Err(BackendError::invalid_usage("index format given without an index buffer")),
                            };
                            GeometryJobData::Triangles {
                                vertex_format: triangles.vertex_format,
                                vertex_buffer: triangles.vertex_buffer.clone(),
                                vertex_offset: triangles.vertex_buffer_offset,
                                vertex_stride: triangles.vertex_stride,
                                max_vertex: triangles.max_vertex,
                                index,
                            }
                        }
                        AccelerationStructureGeometryData::Aabbs(aabbs) => GeometryJobData::Aabbs {
                            buffer: aabbs.buffer.clone(),
                            offset: aabbs.offset,
                            stride: aabbs.stride,
                        },
                    };
                    jobs.push(GeometryJob {
                        data,
                        flags: geometry.flags,
                        primitive_count: geometry.primitive_count,
                    });
                }
                let triangles = jobs.iter().filter(|job| matches!(job.data, GeometryJobData::Triangles { .. })).count();
                if triangles != 0 && triangles != jobs.len() {
                    return Err(BackendError::invalid_usage("triangle and AABB geometries cannot share a bottom level structure"));
                }
                BuildInputsJob::Bottom(jobs)
            }
            AccelerationStructureInputs::TopLevel(instances) => BuildInputsJob::Top(InstancesJob {
                buffer: instances.buffer.clone(),
                offset: instances.offset,
                count: instances.count,
                array_of_pointers: instances.array_of_pointers,
            }),
        };

        Ok(Self {
            inputs,
            flags: info.flags,
            dst: info.dst.clone(),
            scratch: info.scratch.clone(),
            scratch_offset: info.scratch_offset,
        })
    }

    pub(crate) fn level(&self) -> ImageLevel {
        match self.inputs {
            BuildInputsJob::Bottom(_) => ImageLevel::Bottom,
            BuildInputsJob::Top(_) => ImageLevel::Top,
        }
    }

    pub(crate) fn item_count(&self) -> u64 {
        self.inputs.item_count()
    }
}

impl BuildInputsJob {
    pub(crate) fn item_count(&self) -> u64 {
        match self {
            BuildInputsJob::Bottom(geometries) => geometries.iter().map(|geometry| geometry.primitive_count as u64).sum(),
            BuildInputsJob::Top(instances) => instances.count as u64,
        }
    }

    pub(crate) fn chunks(&self, items_per_chunk: u32) -> Vec<WorkChunk> {
        let items_per_chunk = items_per_chunk.max(1);
        let mut chunks = Vec::new();
        let mut push_range = |geometry_index: u32, count: u32| {
            let mut first = 0u32;
            while first < count {
                let chunk_count = items_per_chunk.min(count - first);
                chunks.push(WorkChunk {
                    geometry_index,
                    first,
                    count: chunk_count,
                });
                first += chunk_count;
            }
        };
        match self {
            BuildInputsJob::Bottom(geometries) => {
                for (geometry_index, geometry) in geometries.iter().enumerate() {
                    push_range(geometry_index as u32, geometry.primitive_count);
                }
            }
            BuildInputsJob::Top(instances) => push_range(0, instances.count),
        }
        chunks
    }
}

impl GeometryJob {
    fn read_vertex(&self, vertex_format: VertexFormat, buffer: &SoftBuffer, offset: u64, stride: u64, index: u32) -> Result<Vec3, BackendError> {
        let bytes = buffer.read_bytes(offset + index as u64 * stride, vertex_format.element_size() as u64)?;
        Ok(vertex_format.decode(&bytes))
    }

    pub(crate) fn gather(&self, geometry_index: u32, first: u32, count: u32) -> Result<Vec<PrimitiveRecord>, BackendError> {
        let geometry_flags = self.flags.bits();
        let mut primitives = Vec::with_capacity(count as usize);
        match &self.data {
            GeometryJobData::Triangles {
                vertex_format,
                vertex_buffer,
                vertex_offset,
                vertex_stride,
                max_vertex,
                index,
            } => {
                for primitive_index in first..first + count {
                    let mut indices = [primitive_index * 3, primitive_index * 3 + 1, primitive_index * 3 + 2];
                    if let Some(index) = index {
                        let index_size = index.format.size() as u64;
                        let bytes = index.buffer.read_bytes(index.offset + primitive_index as u64 * 3 * index_size, 3 * index_size)?;
                        for (slot, value) in indices.iter_mut().enumerate() {
                            *value = index.format.decode(&bytes[slot * index_size as usize..]);
                        }
                    }
                    if let Some(out_of_range) = indices.iter().find(|vertex| **vertex > *max_vertex) {
                        return Err(BackendError::invalid_usage(format!(
                            "vertex {} of primitive {} exceeds max vertex {}",
                            out_of_range, primitive_index, max_vertex
                        )));
                    }
                    let mut vertices = [Vec3::ZERO; 3];
                    for (vertex, vertex_index) in vertices.iter_mut().zip(indices) {
                        *vertex = self.read_vertex(*vertex_format, vertex_buffer, *vertex_offset, *vertex_stride, vertex_index)?;
                    }
                    primitives.push(PrimitiveRecord::triangle(vertices, geometry_index, primitive_index, geometry_flags));
                }
            }
            GeometryJobData::Aabbs { buffer, offset, stride } => {
                for primitive_index in first..first + count {
                    let bytes = buffer.read_bytes(offset + primitive_index as u64 * stride, AABB_POSITIONS_SIZE)?;
                    let min = VertexFormat::R32G32B32Float.decode(&bytes[0..12]);
                    let max = VertexFormat::R32G32B32Float.decode(&bytes[12..24]);
                    primitives.push(PrimitiveRecord::aabb(min, max, geometry_index, primitive_index, geometry_flags));
                }
            }
        }
        Ok(primitives)
    }
}

impl InstancesJob {
    /// Inactive entries come back with a zero reference.
    pub(crate) fn gather(&self, shared: &SoftShared, first: u32, count: u32) -> Result<Vec<InstanceRecord>, BackendError> {
        let mut instances = Vec::with_capacity(count as usize);
        if !self.array_of_pointers {
            let bytes = self.buffer.read_bytes(self.offset + first as u64 * InstanceRecord::SIZE, count as u64 * InstanceRecord::SIZE)?;
            for chunk in bytes.chunks_exact(InstanceRecord::SIZE as usize) {
                instances.push(bytemuck::pod_read_unaligned(chunk));
            }
            return Ok(instances);
        }

        let pointers = self.buffer.read_bytes(self.offset + first as u64 * 8, count as u64 * 8)?;
        for chunk in pointers.chunks_exact(8) {
            let address = u64::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7]]);
            if address == 0 {
                instances.push(bytemuck::Zeroable::zeroed());
                continue;
            }
            let (buffer, offset) = shared.resolve_buffer(address).ok_or(BackendError::UnknownAddress(address))?;
            let bytes = buffer.read_bytes(offset, InstanceRecord::SIZE)?;
            instances.push(bytemuck::pod_read_unaligned(&bytes));
        }
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use raycts_core::gpu::{
        BufferInfo,
        BufferUsage,
        GeometryInstanceFlags,
        MemoryKind,
    };

    use super::*;
    use crate::SoftDeviceConfig;

    fn buffer_with(shared: &Arc<SoftShared>, bytes: &[u8]) -> SoftBuffer {
        let buffer = SoftBuffer::new(
            shared,
            &BufferInfo {
                size: bytes.len() as u64,
                usage: BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT,
                memory_kind: MemoryKind::RAM,
            },
            None,
        )
        .unwrap();
        buffer.write_bytes(0, bytes).unwrap();
        buffer
    }

    #[test]
    fn indexed_triangles_resolve_through_the_index_buffer() {
        let shared = Arc::new(SoftShared::new(SoftDeviceConfig::default()));
        let mut vertices = Vec::new();
        for vertex in [Vec3::new(0f32, 1f32, 0f32), Vec3::ZERO, Vec3::new(1f32, 1f32, 0f32), Vec3::new(1f32, 0f32, 0f32)] {
            VertexFormat::R32G32B32Float.encode(vertex, &mut vertices);
        }
        let mut indices = Vec::new();
        for index in [0u32, 1, 2, 2, 1, 3] {
            IndexFormat::U16.encode(index, &mut indices);
        }
        let job = GeometryJob {
            data: GeometryJobData::Triangles {
                vertex_format: VertexFormat::R32G32B32Float,
                vertex_buffer: buffer_with(&shared, &vertices),
                vertex_offset: 0,
                vertex_stride: 12,
                max_vertex: 3,
                index: Some(IndexJob {
                    format: IndexFormat::U16,
                    buffer: buffer_with(&shared, &indices),
                    offset: 0,
                }),
            },
            flags: GeometryFlags::OPAQUE,
            primitive_count: 2,
        };
        let primitives = job.gather(0, 1, 1).unwrap();
        assert_eq!(primitives.len(), 1);
        assert_eq!(primitives[0].a, [1f32, 1f32, 0f32]);
        assert_eq!(primitives[0].b, [0f32, 0f32, 0f32]);
        assert_eq!(primitives[0].c, [1f32, 0f32, 0f32]);
        assert_eq!(primitives[0].primitive_index, 1);
    }

    #[test]
    fn instance_pointers_are_followed() {
        let shared = Arc::new(SoftShared::new(SoftDeviceConfig::default()));
        let record = InstanceRecord::new(&raycts_core::Affine3A::IDENTITY, 7, 0xFF, 0, GeometryInstanceFlags::empty(), 0x4000);
        let records = buffer_with(&shared, bytemuck::bytes_of(&record));
        let mut pointers = Vec::new();
        pointers.extend_from_slice(&0u64.to_le_bytes());
        pointers.extend_from_slice(&raycts_core::gpu::Buffer::va(&records).to_le_bytes());
        let job = InstancesJob {
            buffer: buffer_with(&shared, &pointers),
            offset: 0,
            count: 2,
            array_of_pointers: true,
        };
        let instances = job.gather(&shared, 0, 2).unwrap();
        assert!(!instances[0].is_active());
        assert_eq!(instances[1], record);
    }

    #[test]
    fn work_is_chunked_per_geometry() {
        let shared = Arc::new(SoftShared::new(SoftDeviceConfig::default()));
        let aabbs = buffer_with(&shared, &[0u8; 24 * 10]);
        let geometry = |count| GeometryJob {
            data: GeometryJobData::Aabbs {
                buffer: aabbs.clone(),
                offset: 0,
                stride: 24,
            },
            flags: GeometryFlags::empty(),
            primitive_count: count,
        };
        let inputs = BuildInputsJob::Bottom(vec![geometry(5), geometry(0), geometry(3)]);
        assert_eq!(inputs.item_count(), 8);
        assert_eq!(
            inputs.chunks(4),
            vec![
                WorkChunk { geometry_index: 0, first: 0, count: 4 },
                WorkChunk { geometry_index: 0, first: 4, count: 1 },
                WorkChunk { geometry_index: 2, first: 0, count: 3 },
            ]
        );
    }
}
