use half::f16;
use serde::{Deserialize, Serialize};

use crate::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexFormat {
  R32G32Float,
  R32G32B32Float,
  R32G32B32A32Float,
  R16G16Float,
  R16G16B16Float,
  R16G16B16A16Float,
  R64G64Float,
  R64G64B64Float,
  R64G64B64A64Float,
  R16G16SNorm,
  R16G16B16SNorm,
  R16G16B16A16SNorm,
  R8G8SNorm,
  R8G8B8SNorm,
  R8G8B8A8SNorm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
  Float16,
  Float32,
  Float64,
  SNorm8,
  SNorm16,
}

impl ComponentType {
  pub fn size(self) -> u32 {
    match self {
      ComponentType::SNorm8 => 1,
      ComponentType::Float16 | ComponentType::SNorm16 => 2,
      ComponentType::Float32 => 4,
      ComponentType::Float64 => 8,
    }
  }
}

impl VertexFormat {
  pub const ALL: [VertexFormat; 15] = [
    VertexFormat::R32G32Float,
    VertexFormat::R32G32B32Float,
    VertexFormat::R32G32B32A32Float,
    VertexFormat::R16G16Float,
    VertexFormat::R16G16B16Float,
    VertexFormat::R16G16B16A16Float,
    VertexFormat::R64G64Float,
    VertexFormat::R64G64B64Float,
    VertexFormat::R64G64B64A64Float,
    VertexFormat::R16G16SNorm,
    VertexFormat::R16G16B16SNorm,
    VertexFormat::R16G16B16A16SNorm,
    VertexFormat::R8G8SNorm,
    VertexFormat::R8G8B8SNorm,
    VertexFormat::R8G8B8A8SNorm,
  ];

  pub fn component_count(self) -> u32 {
    match self {
      VertexFormat::R32G32Float
      | VertexFormat::R16G16Float
      | VertexFormat::R64G64Float
      | VertexFormat::R16G16SNorm
      | VertexFormat::R8G8SNorm => 2,
      VertexFormat::R32G32B32Float
      | VertexFormat::R16G16B16Float
      | VertexFormat::R64G64B64Float
      | VertexFormat::R16G16B16SNorm
      | VertexFormat::R8G8B8SNorm => 3,
      VertexFormat::R32G32B32A32Float
      | VertexFormat::R16G16B16A16Float
      | VertexFormat::R64G64B64A64Float
      | VertexFormat::R16G16B16A16SNorm
      | VertexFormat::R8G8B8A8SNorm => 4,
    }
  }

  pub fn component_type(self) -> ComponentType {
    match self {
      VertexFormat::R32G32Float | VertexFormat::R32G32B32Float | VertexFormat::R32G32B32A32Float => ComponentType::Float32,
      VertexFormat::R16G16Float | VertexFormat::R16G16B16Float | VertexFormat::R16G16B16A16Float => ComponentType::Float16,
      VertexFormat::R64G64Float | VertexFormat::R64G64B64Float | VertexFormat::R64G64B64A64Float => ComponentType::Float64,
      VertexFormat::R16G16SNorm | VertexFormat::R16G16B16SNorm | VertexFormat::R16G16B16A16SNorm => ComponentType::SNorm16,
      VertexFormat::R8G8SNorm | VertexFormat::R8G8B8SNorm | VertexFormat::R8G8B8A8SNorm => ComponentType::SNorm8,
    }
  }

  pub fn is_snorm(self) -> bool {
    matches!(self.component_type(), ComponentType::SNorm8 | ComponentType::SNorm16)
  }

  /// Size of one vertex in bytes.
  pub fn element_size(self) -> u32 {
    self.component_count() * self.component_type().size()
  }

  /// Appends `element_size()` bytes. Two component formats drop z, the fourth
  /// component is written as zero.
  pub fn encode(self, position: Vec3, out: &mut Vec<u8>) {
    let components = [position.x, position.y, position.z, 0f32];
    for &value in &components[..self.component_count() as usize] {
      match self.component_type() {
        ComponentType::Float32 => out.extend_from_slice(&value.to_le_bytes()),
        ComponentType::Float16 => out.extend_from_slice(&f16::from_f32(value).to_le_bytes()),
        ComponentType::Float64 => out.extend_from_slice(&(value as f64).to_le_bytes()),
        ComponentType::SNorm16 => {
          let encoded = (value.clamp(-1f32, 1f32) * i16::MAX as f32).round() as i16;
          out.extend_from_slice(&encoded.to_le_bytes());
        }
        ComponentType::SNorm8 => {
          let encoded = (value.clamp(-1f32, 1f32) * i8::MAX as f32).round() as i8;
          out.extend_from_slice(&encoded.to_le_bytes());
        }
      }
    }
  }

  /// Reads one vertex from the start of `bytes`, which must hold at least
  /// `element_size()` bytes.
  pub fn decode(self, bytes: &[u8]) -> Vec3 {
    let component_size = self.component_type().size() as usize;
    let mut components = [0f32; 3];
    let count = (self.component_count() as usize).min(3);
    for (index, component) in components.iter_mut().enumerate().take(count) {
      let start = index * component_size;
      let data = &bytes[start..start + component_size];
      *component = match self.component_type() {
        ComponentType::Float32 => f32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        ComponentType::Float16 => f16::from_le_bytes([data[0], data[1]]).to_f32(),
        ComponentType::Float64 => {
          let mut raw = [0u8; 8];
          raw.copy_from_slice(data);
          f64::from_le_bytes(raw) as f32
        }
        ComponentType::SNorm16 => (i16::from_le_bytes([data[0], data[1]]) as f32 / i16::MAX as f32).max(-1f32),
        ComponentType::SNorm8 => (data[0] as i8 as f32 / i8::MAX as f32).max(-1f32),
      };
    }
    Vec3::new(components[0], components[1], components[2])
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexFormat {
  U16,
  U32
}

impl IndexFormat {
  pub fn size(self) -> u32 {
    match self {
      IndexFormat::U16 => 2,
      IndexFormat::U32 => 4,
    }
  }

  pub fn max_index(self) -> u32 {
    match self {
      IndexFormat::U16 => u16::MAX as u32,
      IndexFormat::U32 => u32::MAX,
    }
  }

  pub fn encode(self, index: u32, out: &mut Vec<u8>) {
    match self {
      IndexFormat::U16 => out.extend_from_slice(&(index as u16).to_le_bytes()),
      IndexFormat::U32 => out.extend_from_slice(&index.to_le_bytes()),
    }
  }

  pub fn decode(self, bytes: &[u8]) -> u32 {
    match self {
      IndexFormat::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
      IndexFormat::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
  }
}
