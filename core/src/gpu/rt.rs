use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::{Affine3A, Mat3, Vec3};

use super::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccelerationStructureBuildType {
  Host,
  Device
}

impl AccelerationStructureBuildType {
  pub fn memory_kind(self) -> MemoryKind {
    match self {
      AccelerationStructureBuildType::Host => MemoryKind::RAM,
      AccelerationStructureBuildType::Device => MemoryKind::VRAM,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccelerationStructureType {
  TopLevel,
  BottomLevel,
  Generic
}

bitflags! {
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub struct BuildAccelerationStructureFlags: u32 {
    const ALLOW_UPDATE      = 0b1;
    const ALLOW_COMPACTION  = 0b10;
    const PREFER_FAST_TRACE = 0b100;
    const PREFER_FAST_BUILD = 0b1000;
    const LOW_MEMORY        = 0b10000;
  }
}

bitflags! {
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
  pub struct GeometryFlags: u32 {
    const OPAQUE                          = 0b1;
    const NO_DUPLICATE_ANY_HIT_INVOCATION = 0b10;
  }
}

bitflags! {
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
  pub struct GeometryInstanceFlags: u8 {
    const TRIANGLE_FACING_CULL_DISABLE    = 0b1;
    const TRIANGLE_FRONT_COUNTERCLOCKWISE = 0b10;
    const FORCE_OPAQUE                    = 0b100;
    const FORCE_NO_OPAQUE                 = 0b1000;
  }
}

bitflags! {
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
  pub struct RayFlags: u32 {
    const OPAQUE                      = 0b1;
    const NO_OPAQUE                   = 0b10;
    const TERMINATE_ON_FIRST_HIT      = 0b100;
    const CULL_BACK_FACING_TRIANGLES  = 0b10000;
    const CULL_FRONT_FACING_TRIANGLES = 0b100000;
    const CULL_OPAQUE                 = 0b1000000;
    const CULL_NO_OPAQUE              = 0b10000000;
    const SKIP_TRIANGLES              = 0b100000000;
    const SKIP_AABBS                  = 0b1000000000;
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CopyMode {
  Clone,
  Compact,
  Serialize,
  Deserialize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelerationStructureSizes {
  pub size: u64,
  pub build_scratch_size: u64,
  pub update_scratch_size: u64
}

pub struct AccelerationStructureInfo<'a, B: GPUBackend> {
  pub ty: AccelerationStructureType,
  pub buffer: &'a B::Buffer,
  pub offset: u64,
  pub size: u64
}

pub struct AccelerationStructureTriangles<'a, B: GPUBackend> {
  pub vertex_format: VertexFormat,
  pub vertex_buffer: &'a B::Buffer,
  pub vertex_buffer_offset: u64,
  pub vertex_stride: u64,
  pub max_vertex: u32,
  pub index_format: Option<IndexFormat>,
  pub index_buffer: Option<&'a B::Buffer>,
  pub index_buffer_offset: u64
}

/// Each entry holds `min.xyz` followed by `max.xyz` as f32.
pub struct AccelerationStructureAabbs<'a, B: GPUBackend> {
  pub buffer: &'a B::Buffer,
  pub offset: u64,
  pub stride: u64
}

pub enum AccelerationStructureGeometryData<'a, B: GPUBackend> {
  Triangles(AccelerationStructureTriangles<'a, B>),
  Aabbs(AccelerationStructureAabbs<'a, B>)
}

pub struct AccelerationStructureGeometry<'a, B: GPUBackend> {
  pub data: AccelerationStructureGeometryData<'a, B>,
  pub flags: GeometryFlags,
  pub primitive_count: u32
}

pub enum GeometryArray<'a, B: GPUBackend> {
  Values(&'a [AccelerationStructureGeometry<'a, B>]),
  Pointers(&'a [&'a AccelerationStructureGeometry<'a, B>])
}

impl<'a, B: GPUBackend> GeometryArray<'a, B> {
  pub fn len(&self) -> usize {
    match self {
      GeometryArray::Values(geometries) => geometries.len(),
      GeometryArray::Pointers(geometries) => geometries.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn get(&self, index: usize) -> Option<&AccelerationStructureGeometry<'a, B>> {
    match self {
      GeometryArray::Values(geometries) => geometries.get(index),
      GeometryArray::Pointers(geometries) => geometries.get(index).copied(),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &AccelerationStructureGeometry<'a, B>> {
    (0..self.len()).filter_map(move |index| self.get(index))
  }
}

/// With `array_of_pointers` the buffer holds one u64 device address per
/// instance, each pointing at an [`InstanceRecord`].
pub struct AccelerationStructureInstances<'a, B: GPUBackend> {
  pub buffer: &'a B::Buffer,
  pub offset: u64,
  pub count: u32,
  pub array_of_pointers: bool
}

pub enum AccelerationStructureInputs<'a, B: GPUBackend> {
  BottomLevel(GeometryArray<'a, B>),
  TopLevel(AccelerationStructureInstances<'a, B>)
}

impl<'a, B: GPUBackend> AccelerationStructureInputs<'a, B> {
  pub fn primitive_count(&self) -> u64 {
    match self {
      AccelerationStructureInputs::BottomLevel(geometries) => geometries.iter().map(|g| g.primitive_count as u64).sum(),
      AccelerationStructureInputs::TopLevel(instances) => instances.count as u64,
    }
  }
}

pub struct AccelerationStructureBuildInfo<'a, B: GPUBackend> {
  pub inputs: AccelerationStructureInputs<'a, B>,
  pub flags: BuildAccelerationStructureFlags,
  pub dst: &'a B::AccelerationStructure,
  pub scratch: &'a B::Buffer,
  pub scratch_offset: u64
}

pub trait AccelerationStructure {
  fn ty(&self) -> AccelerationStructureType;
  fn size(&self) -> u64;
  fn device_address(&self) -> u64;
}

/// Packed instance layout consumed by top level builds.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
  pub transform: [[f32; 4]; 3],
  pub custom_index_and_mask: u32,
  pub sbt_offset_and_flags: u32,
  pub acceleration_structure_reference: u64
}

pub const INSTANCE_FIELD_MASK: u32 = 0x00FF_FFFF;

impl InstanceRecord {
  pub const SIZE: u64 = std::mem::size_of::<InstanceRecord>() as u64;

  pub fn new(transform: &Affine3A, custom_index: u32, mask: u8, sbt_offset: u32, flags: GeometryInstanceFlags, reference: u64) -> Self {
    Self {
      transform: transform_to_rows(transform),
      custom_index_and_mask: (custom_index & INSTANCE_FIELD_MASK) | ((mask as u32) << 24),
      sbt_offset_and_flags: (sbt_offset & INSTANCE_FIELD_MASK) | ((flags.bits() as u32) << 24),
      acceleration_structure_reference: reference
    }
  }

  pub fn custom_index(&self) -> u32 {
    self.custom_index_and_mask & INSTANCE_FIELD_MASK
  }

  pub fn mask(&self) -> u8 {
    (self.custom_index_and_mask >> 24) as u8
  }

  pub fn sbt_offset(&self) -> u32 {
    self.sbt_offset_and_flags & INSTANCE_FIELD_MASK
  }

  pub fn flags(&self) -> GeometryInstanceFlags {
    GeometryInstanceFlags::from_bits_truncate((self.sbt_offset_and_flags >> 24) as u8)
  }

  pub fn is_active(&self) -> bool {
    self.acceleration_structure_reference != 0
  }

  pub fn affine(&self) -> Affine3A {
    transform_from_rows(&self.transform)
  }
}

/// Row major 3x4 matrix, the last column is the translation.
pub fn transform_to_rows(transform: &Affine3A) -> [[f32; 4]; 3] {
  let matrix = Mat3::from(transform.matrix3);
  let translation = Vec3::from(transform.translation);
  let mut rows = [[0f32; 4]; 3];
  for (row_index, row) in rows.iter_mut().enumerate() {
    let matrix_row = matrix.row(row_index);
    *row = [matrix_row.x, matrix_row.y, matrix_row.z, translation[row_index]];
  }
  rows
}

pub fn transform_from_rows(rows: &[[f32; 4]; 3]) -> Affine3A {
  let matrix = Mat3::from_cols(
    Vec3::new(rows[0][0], rows[1][0], rows[2][0]),
    Vec3::new(rows[0][1], rows[1][1], rows[2][1]),
    Vec3::new(rows[0][2], rows[1][2], rows[2][2]),
  );
  Affine3A::from_mat3_translation(matrix, Vec3::new(rows[0][3], rows[1][3], rows[2][3]))
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RayQuery {
  pub origin: [f32; 3],
  pub tmin: f32,
  pub direction: [f32; 3],
  pub tmax: f32
}

impl RayQuery {
  pub fn new(origin: Vec3, direction: Vec3, tmin: f32, tmax: f32) -> Self {
    Self {
      origin: origin.to_array(),
      tmin,
      direction: direction.to_array(),
      tmax
    }
  }
}

/// Per ray result written by ray query dispatches.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RayQueryHit {
  Miss = 0,
  Triangle = 1,
  Aabb = 2
}

impl RayQueryHit {
  pub fn from_raw(value: u32) -> Option<Self> {
    match value {
      0 => Some(RayQueryHit::Miss),
      1 => Some(RayQueryHit::Triangle),
      2 => Some(RayQueryHit::Aabb),
      _ => None,
    }
  }
}

pub struct RayQueryDispatchInfo<'a, B: GPUBackend> {
  pub acceleration_structure: &'a B::AccelerationStructure,
  pub ray_flags: RayFlags,
  pub cull_mask: u8,
  pub rays: &'a B::Buffer,
  pub rays_offset: u64,
  pub results: &'a B::Buffer,
  pub results_offset: u64,
  pub ray_count: u32
}

pub const SERIALIZED_UUID_SIZE: usize = 16;

/// Leading part of serialized acceleration structure data. The header is
/// followed by `handle_count` u64 device addresses of the referenced bottom
/// level structures and then by the opaque payload.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct SerializedHeader {
  pub driver_uuid: [u8; SERIALIZED_UUID_SIZE],
  pub compatibility_uuid: [u8; SERIALIZED_UUID_SIZE],
  pub serialized_size: u64,
  pub deserialized_size: u64,
  pub handle_count: u64
}

impl SerializedHeader {
  pub const SIZE: u64 = std::mem::size_of::<SerializedHeader>() as u64;
  pub const HANDLE_SIZE: u64 = 8;

  pub fn parse(bytes: &[u8]) -> Option<Self> {
    if bytes.len() < Self::SIZE as usize {
      return None;
    }
    Some(bytemuck::pod_read_unaligned(&bytes[..Self::SIZE as usize]))
  }

  pub fn handles_offset() -> u64 {
    Self::SIZE
  }

  pub fn payload_offset(&self) -> u64 {
    Self::SIZE + self.handle_count * Self::HANDLE_SIZE
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccelerationStructureCompatibility {
  Compatible,
  Incompatible
}
