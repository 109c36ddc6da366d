//! In-memory layout of a built acceleration structure.
//!
//! ```text
//! ImageHeader | BvhNode * node_count | item * item_count | u32 * ref_count (padded to 8 bytes)
//! ```
//!
//! Bottom level items are [`PrimitiveRecord`]s, top level items are [`InstanceRecord`]s.
//! Items keep their build order, the BVH only reorders refs.

use bytemuck::{
    Pod,
    Zeroable,
};
use raycts_core::gpu::{
    AccelerationStructureType,
    BackendError,
    BuildAccelerationStructureFlags,
    InstanceRecord,
};
use raycts_core::{
    align_up_64,
    Vec3,
};

use crate::bvh::{
    Aabb,
    BvhNode,
};

const IMAGE_MAGIC: u32 = u32::from_le_bytes(*b"SWAS");
const NODE_SIZE: u64 = std::mem::size_of::<BvhNode>() as u64;
const ITEM_SIZE: u64 = 64;
const HEADER_SIZE: u64 = std::mem::size_of::<ImageHeader>() as u64;
/// Headroom a build reserves on top of the worst case layout unless LOW_MEMORY is requested.
const BUILD_HEADROOM: u64 = 256;

pub(crate) const PRIMITIVE_TRIANGLE: u32 = 0;
pub(crate) const PRIMITIVE_AABB: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ImageLevel {
    Bottom,
    Top,
}

impl ImageLevel {
    fn to_raw(self) -> u32 {
        match self {
            ImageLevel::Bottom => 0,
            ImageLevel::Top => 1,
        }
    }

    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ImageLevel::Bottom),
            1 => Some(ImageLevel::Top),
            _ => None,
        }
    }

    pub(crate) fn fits(self, ty: AccelerationStructureType) -> bool {
        match (self, ty) {
            (_, AccelerationStructureType::Generic) => true,
            (ImageLevel::Bottom, AccelerationStructureType::BottomLevel) => true,
            (ImageLevel::Top, AccelerationStructureType::TopLevel) => true,
            _ => false,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct ImageHeader {
    magic: u32,
    level: u32,
    build_flags: u32,
    node_count: u32,
    item_count: u32,
    ref_count: u32,
    pub image_size: u64,
}

impl ImageHeader {
    pub(crate) const SIZE: u64 = HEADER_SIZE;

    pub(crate) fn parse(bytes: &[u8]) -> Result<Self, BackendError> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(BackendError::invalid_usage("acceleration structure data is truncated"));
        }
        let header: ImageHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE as usize]);
        if header.magic != IMAGE_MAGIC || ImageLevel::from_raw(header.level).is_none() {
            return Err(BackendError::invalid_usage("acceleration structure has not been built"));
        }
        if header.image_size != layout_size(header.node_count as u64, header.item_count as u64, header.ref_count as u64) {
            return Err(BackendError::invalid_usage("acceleration structure data is corrupt"));
        }
        Ok(header)
    }

    pub(crate) fn level(&self) -> ImageLevel {
        ImageLevel::from_raw(self.level).unwrap_or(ImageLevel::Bottom)
    }

    pub(crate) fn build_flags(&self) -> BuildAccelerationStructureFlags {
        BuildAccelerationStructureFlags::from_bits_truncate(self.build_flags)
    }

    pub(crate) fn item_count(&self) -> u32 {
        self.item_count
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct PrimitiveRecord {
    /// Triangle vertex 0 or AABB minimum.
    pub a: [f32; 3],
    pub kind: u32,
    /// Triangle vertex 1 or AABB maximum.
    pub b: [f32; 3],
    pub geometry_index: u32,
    pub c: [f32; 3],
    pub primitive_index: u32,
    pub geometry_flags: u32,
    _padding: [u32; 3],
}

impl PrimitiveRecord {
    pub(crate) fn triangle(vertices: [Vec3; 3], geometry_index: u32, primitive_index: u32, geometry_flags: u32) -> Self {
        Self {
            a: vertices[0].to_array(),
            kind: PRIMITIVE_TRIANGLE,
            b: vertices[1].to_array(),
            geometry_index,
            c: vertices[2].to_array(),
            primitive_index,
            geometry_flags,
            _padding: [0; 3],
        }
    }

    pub(crate) fn aabb(min: Vec3, max: Vec3, geometry_index: u32, primitive_index: u32, geometry_flags: u32) -> Self {
        Self {
            a: min.to_array(),
            kind: PRIMITIVE_AABB,
            b: max.to_array(),
            geometry_index,
            c: [0f32; 3],
            primitive_index,
            geometry_flags,
            _padding: [0; 3],
        }
    }

    /// Triangles with a NaN x coordinate and AABBs with a NaN minimum x are inactive.
    pub(crate) fn is_active(&self) -> bool {
        if self.kind == PRIMITIVE_AABB {
            !self.a[0].is_nan()
        } else {
            !(self.a[0].is_nan() || self.b[0].is_nan() || self.c[0].is_nan())
        }
    }

    pub(crate) fn bounds(&self) -> Aabb {
        if self.kind == PRIMITIVE_AABB {
            Aabb {
                min: Vec3::from_array(self.a),
                max: Vec3::from_array(self.b),
            }
        } else {
            Aabb::from_points(&[Vec3::from_array(self.a), Vec3::from_array(self.b), Vec3::from_array(self.c)])
        }
    }
}

pub(crate) enum ImageItems {
    Primitives(Vec<PrimitiveRecord>),
    Instances(Vec<InstanceRecord>),
}

impl ImageItems {
    fn len(&self) -> usize {
        match self {
            ImageItems::Primitives(primitives) => primitives.len(),
            ImageItems::Instances(instances) => instances.len(),
        }
    }
}

pub(crate) struct StructureImage {
    pub build_flags: BuildAccelerationStructureFlags,
    pub nodes: Vec<BvhNode>,
    pub items: ImageItems,
    pub refs: Vec<u32>,
}

pub(crate) fn layout_size(node_count: u64, item_count: u64, ref_count: u64) -> u64 {
    HEADER_SIZE + node_count * NODE_SIZE + item_count * ITEM_SIZE + align_up_64(ref_count * 4, 8)
}

/// Worst case size of a structure with `item_count` items, used for build size queries.
pub(crate) fn reserved_size(item_count: u64, flags: BuildAccelerationStructureFlags) -> u64 {
    let node_count = item_count * 2;
    let mut size = layout_size(node_count, item_count, item_count);
    if !flags.contains(BuildAccelerationStructureFlags::LOW_MEMORY) {
        size += BUILD_HEADROOM;
    }
    if flags.contains(BuildAccelerationStructureFlags::ALLOW_UPDATE) {
        size += node_count * NODE_SIZE;
    }
    size
}

impl StructureImage {
    pub(crate) fn level(&self) -> ImageLevel {
        match self.items {
            ImageItems::Primitives(_) => ImageLevel::Bottom,
            ImageItems::Instances(_) => ImageLevel::Top,
        }
    }

    pub(crate) fn encoded_size(&self) -> u64 {
        layout_size(self.nodes.len() as u64, self.items.len() as u64, self.refs.len() as u64)
    }

    pub(crate) fn bounds(&self) -> Aabb {
        self.nodes.first().map(|root| root.bounds()).unwrap_or(Aabb::EMPTY)
    }

    pub(crate) fn instances(&self) -> Option<&[InstanceRecord]> {
        match &self.items {
            ImageItems::Instances(instances) => Some(instances),
            ImageItems::Primitives(_) => None,
        }
    }

    pub(crate) fn instances_mut(&mut self) -> Option<&mut Vec<InstanceRecord>> {
        match &mut self.items {
            ImageItems::Instances(instances) => Some(instances),
            ImageItems::Primitives(_) => None,
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let header = ImageHeader {
            magic: IMAGE_MAGIC,
            level: self.level().to_raw(),
            build_flags: self.build_flags.bits(),
            node_count: self.nodes.len() as u32,
            item_count: self.items.len() as u32,
            ref_count: self.refs.len() as u32,
            image_size: self.encoded_size(),
        };
        let mut bytes = Vec::with_capacity(header.image_size as usize);
        bytes.extend_from_slice(bytemuck::bytes_of(&header));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.nodes));
        match &self.items {
            ImageItems::Primitives(primitives) => bytes.extend_from_slice(bytemuck::cast_slice(primitives)),
            ImageItems::Instances(instances) => bytes.extend_from_slice(bytemuck::cast_slice(instances)),
        }
        bytes.extend_from_slice(bytemuck::cast_slice(&self.refs));
        bytes.resize(header.image_size as usize, 0u8);
        bytes
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, BackendError> {
        let header = ImageHeader::parse(bytes)?;
        if (bytes.len() as u64) < header.image_size {
            return Err(BackendError::invalid_usage("acceleration structure data is truncated"));
        }

        let mut offset = HEADER_SIZE as usize;
        let nodes = read_array::<BvhNode>(bytes, &mut offset, header.node_count as usize);
        let items = match header.level() {
            ImageLevel::Bottom => ImageItems::Primitives(read_array(bytes, &mut offset, header.item_count as usize)),
            ImageLevel::Top => ImageItems::Instances(read_array(bytes, &mut offset, header.item_count as usize)),
        };
        let refs = read_array::<u32>(bytes, &mut offset, header.ref_count as usize);

        if refs.iter().any(|item| *item >= header.item_count)
            || nodes.iter().any(|node| {
                if node.is_leaf() {
                    node.first as u64 + node.count as u64 > header.ref_count as u64
                } else {
                    node.first as u64 + 1 >= header.node_count as u64
                }
            })
        {
            return Err(BackendError::invalid_usage("acceleration structure data is corrupt"));
        }

        Ok(Self {
            build_flags: header.build_flags(),
            nodes,
            items,
            refs,
        })
    }
}

fn read_array<T: Pod>(bytes: &[u8], offset: &mut usize, count: usize) -> Vec<T> {
    let size = std::mem::size_of::<T>();
    let end = *offset + size * count;
    let values = bytes[*offset..end]
        .chunks_exact(size)
        .map(|chunk| bytemuck::pod_read_unaligned(chunk))
        .collect();
    *offset = end;
    values
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use raycts_core::Affine3A;
    use raycts_core::gpu::GeometryInstanceFlags;

    use super::*;
    use crate::bvh::build_bvh;

    #[test]
    fn encoded_size_matches_layout() {
        let primitives = vec![
            PrimitiveRecord::triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0, 0, 1),
            PrimitiveRecord::aabb(Vec3::ZERO, Vec3::ONE, 0, 1, 0),
            PrimitiveRecord::triangle([Vec3::Z, Vec3::X, Vec3::Y], 0, 2, 1),
        ];
        let bounds: Vec<Aabb> = primitives.iter().map(|p| p.bounds()).collect();
        let (nodes, refs) = build_bvh(&bounds, 1);
        let image = StructureImage {
            build_flags: BuildAccelerationStructureFlags::ALLOW_COMPACTION,
            nodes,
            items: ImageItems::Primitives(primitives),
            refs,
        };
        let bytes = image.encode();
        assert_eq!(bytes.len() as u64, image.encoded_size());
        assert!(image.encoded_size() <= reserved_size(3, BuildAccelerationStructureFlags::LOW_MEMORY));

        let decoded = StructureImage::decode(&bytes).unwrap();
        assert_eq!(decoded.level(), ImageLevel::Bottom);
        assert_eq!(decoded.build_flags, BuildAccelerationStructureFlags::ALLOW_COMPACTION);
        assert_eq!(decoded.nodes, image.nodes);
        assert_eq!(decoded.refs, image.refs);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn top_level_keeps_instance_order() {
        let instances: Vec<InstanceRecord> = (0..3)
            .map(|i| InstanceRecord::new(&Affine3A::IDENTITY, i, 0xFF, 0, GeometryInstanceFlags::empty(), 0x1000 * (i as u64 + 1)))
            .collect();
        let image = StructureImage {
            build_flags: BuildAccelerationStructureFlags::empty(),
            nodes: Vec::new(),
            items: ImageItems::Instances(instances.clone()),
            refs: Vec::new(),
        };
        let decoded = StructureImage::decode(&image.encode()).unwrap();
        assert_eq!(decoded.level(), ImageLevel::Top);
        assert_eq!(decoded.instances().unwrap(), &instances[..]);
    }

    #[test]
    fn unbuilt_memory_is_rejected() {
        let zeroes = vec![0u8; 128];
        assert!(matches!(StructureImage::decode(&zeroes), Err(BackendError::InvalidUsage(_))));
    }

    #[test]
    fn nan_primitives_are_inactive() {
        let nan = Vec3::new(f32::NAN, 0f32, 0f32);
        assert!(!PrimitiveRecord::triangle([nan, nan, nan], 0, 0, 0).is_active());
        assert!(!PrimitiveRecord::aabb(nan, Vec3::ONE, 0, 0, 0).is_active());
        assert!(PrimitiveRecord::aabb(Vec3::ZERO, Vec3::ONE, 0, 0, 0).is_active());
    }
}
