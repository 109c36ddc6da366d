use std::fmt::Write as _;

use serde::{
    Deserialize,
    Serialize,
};
use smartstring::alias::String;
use thiserror::Error;

use crate::graphics::gpu::{
    AccelerationStructureBuildType,
    BuildAccelerationStructureFlags,
    GeometryInstanceFlags,
    IndexFormat,
    VertexFormat,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottomTestType {
    Triangles,
    Aabbs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopTestType {
    /// One bottom level structure per filled cell, all instances share one transform.
    IdenticalInstances,
    /// One shared bottom level structure, every instance translates it into its cell.
    DifferentInstances,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationTarget {
    None,
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    None,
    Copy,
    Compaction,
    Serialization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceCullFlags {
    None,
    CounterClockwise,
    CullDisable,
    All,
}

impl InstanceCullFlags {
    pub fn instance_flags(self) -> GeometryInstanceFlags {
        match self {
            InstanceCullFlags::None => GeometryInstanceFlags::empty(),
            InstanceCullFlags::CounterClockwise => GeometryInstanceFlags::TRIANGLE_FRONT_COUNTERCLOCKWISE,
            InstanceCullFlags::CullDisable => GeometryInstanceFlags::TRIANGLE_FACING_CULL_DISABLE,
            InstanceCullFlags::All => {
                GeometryInstanceFlags::TRIANGLE_FRONT_COUNTERCLOCKWISE | GeometryInstanceFlags::TRIANGLE_FACING_CULL_DISABLE
            }
        }
    }

    fn name(self) -> &'static str {
        match self {
            InstanceCullFlags::None => "noflags",
            InstanceCullFlags::CounterClockwise => "ccw",
            InstanceCullFlags::CullDisable => "nocull",
            InstanceCullFlags::All => "ccw_nocull",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyCase {
    NotEmpty,
    InactiveTriangles,
    InactiveInstances,
    NoGeometriesBottom,
    NoPrimitivesTop,
    NoPrimitivesBottom,
}

impl EmptyCase {
    fn name(self) -> &'static str {
        match self {
            EmptyCase::NotEmpty => "not_empty",
            EmptyCase::InactiveTriangles => "inactive_triangles",
            EmptyCase::InactiveInstances => "inactive_instances",
            EmptyCase::NoGeometriesBottom => "no_geometries_bottom",
            EmptyCase::NoPrimitivesTop => "no_primitives_top",
            EmptyCase::NoPrimitivesBottom => "no_primitives_bottom",
        }
    }
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("invalid scenario parameters: {0}")]
    InvalidParams(std::string::String),
    #[error("malformed scenario description: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything that varies between two checkerboard scenarios. Missing fields of a JSON
/// description take the values of [`ScenarioParams::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioParams {
    pub build_type: AccelerationStructureBuildType,
    pub vertex_format: VertexFormat,
    pub padding: bool,
    pub index_format: Option<IndexFormat>,
    pub bottom_type: BottomTestType,
    pub cull_flags: InstanceCullFlags,
    pub bottom_uses_aop: bool,
    pub bottom_generic: bool,
    pub top_type: TopTestType,
    pub top_uses_aop: bool,
    pub top_generic: bool,
    pub build_flags: BuildAccelerationStructureFlags,
    pub operation_target: OperationTarget,
    pub operation_type: OperationType,
    pub width: u32,
    pub height: u32,
    pub worker_threads: u32,
    pub empty_case: EmptyCase,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            build_type: AccelerationStructureBuildType::Device,
            vertex_format: VertexFormat::R32G32B32Float,
            padding: false,
            index_format: None,
            bottom_type: BottomTestType::Triangles,
            cull_flags: InstanceCullFlags::None,
            bottom_uses_aop: false,
            bottom_generic: false,
            top_type: TopTestType::IdenticalInstances,
            top_uses_aop: false,
            top_generic: false,
            build_flags: BuildAccelerationStructureFlags::empty(),
            operation_target: OperationTarget::None,
            operation_type: OperationType::None,
            width: 8,
            height: 8,
            worker_threads: 0,
            empty_case: EmptyCase::NotEmpty,
        }
    }
}

impl ScenarioParams {
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        let params: ScenarioParams = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_json(&self) -> Result<std::string::String, ScenarioError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Slash separated path that identifies the scenario, e.g.
    /// `cpu_built/triangles/identical_instances/r32g32b32float/copy_bottom`.
    pub fn name(&self) -> String {
        let mut name = String::new();
        name.push_str(match self.build_type {
            AccelerationStructureBuildType::Host => "cpu_built",
            AccelerationStructureBuildType::Device => "gpu_built",
        });
        name.push_str(match self.bottom_type {
            BottomTestType::Triangles if self.bottom_uses_aop => "/triangles_aop",
            BottomTestType::Triangles => "/triangles",
            BottomTestType::Aabbs if self.bottom_uses_aop => "/aabbs_aop",
            BottomTestType::Aabbs => "/aabbs",
        });
        name.push_str(match self.top_type {
            TopTestType::IdenticalInstances if self.top_uses_aop => "/identical_instances_aop",
            TopTestType::IdenticalInstances => "/identical_instances",
            TopTestType::DifferentInstances if self.top_uses_aop => "/different_instances_aop",
            TopTestType::DifferentInstances => "/different_instances",
        });
        let _ = write!(name, "/{}", format!("{:?}", self.vertex_format).to_lowercase());
        if self.padding {
            name.push_str("/padded");
        }
        match self.index_format {
            Some(IndexFormat::U16) => name.push_str("/index_u16"),
            Some(IndexFormat::U32) => name.push_str("/index_u32"),
            None => {}
        }
        if self.cull_flags != InstanceCullFlags::None {
            let _ = write!(name, "/{}", self.cull_flags.name());
        }
        if !self.build_flags.is_empty() {
            let _ = write!(name, "/flags_{:#x}", self.build_flags.bits());
        }
        match (self.bottom_generic, self.top_generic) {
            (true, true) => name.push_str("/bothgeneric"),
            (true, false) => name.push_str("/bottomgeneric"),
            (false, true) => name.push_str("/topgeneric"),
            (false, false) => {}
        }
        if self.operation_type != OperationType::None {
            let operation = match self.operation_type {
                OperationType::Copy => "copy",
                OperationType::Compaction => "compaction",
                _ => "serialization",
            };
            let target = match self.operation_target {
                OperationTarget::Top => "top",
                _ => "bottom",
            };
            let _ = write!(name, "/{}_{}", operation, target);
        }
        if self.worker_threads == u32::MAX {
            name.push_str("/threads_max");
        } else if self.worker_threads != 0 {
            let _ = write!(name, "/threads_{}", self.worker_threads);
        }
        if self.empty_case != EmptyCase::NotEmpty {
            let _ = write!(name, "/{}", self.empty_case.name());
        }
        let _ = write!(name, "/{}x{}", self.width, self.height);
        name
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        let invalid = |message: &str| Err(ScenarioError::InvalidParams(message.to_string()));
        if self.width == 0 || self.height == 0 {
            return invalid("the checkerboard needs at least one cell");
        }
        if (self.operation_target == OperationTarget::None) != (self.operation_type == OperationType::None) {
            return invalid("an operation needs a target level and a target level needs an operation");
        }
        if self.bottom_type == BottomTestType::Aabbs {
            if self.index_format.is_some() {
                return invalid("AABB geometries cannot be indexed");
            }
            if self.cull_flags != InstanceCullFlags::None {
                return invalid("cull flags only apply to triangles");
            }
            if self.empty_case == EmptyCase::InactiveTriangles {
                return invalid("inactive triangles need triangle geometries");
            }
        }
        if self.worker_threads != 0 {
            if self.build_type != AccelerationStructureBuildType::Host {
                return invalid("deferred worker threads only apply to host builds");
            }
            if !matches!(self.operation_type, OperationType::Copy | OperationType::Serialization) {
                return invalid("deferred worker threads only apply to copies and serialization");
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.empty_case != EmptyCase::NotEmpty
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Build flags of the bottom level, compaction is added when the bottom level gets
    /// compacted.
    pub fn bottom_build_flags(&self) -> BuildAccelerationStructureFlags {
        self.level_build_flags(OperationTarget::Bottom)
    }

    pub fn top_build_flags(&self) -> BuildAccelerationStructureFlags {
        self.level_build_flags(OperationTarget::Top)
    }

    fn level_build_flags(&self, level: OperationTarget) -> BuildAccelerationStructureFlags {
        if self.operation_type == OperationType::Compaction && self.operation_target == level {
            self.build_flags | BuildAccelerationStructureFlags::ALLOW_COMPACTION
        } else {
            self.build_flags
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_json_fields_take_defaults() {
        let params = ScenarioParams::from_json(r#"{ "build_type": "Host", "operation_target": "top", "operation_type": "copy" }"#)
            .unwrap();
        assert_eq!(params.build_type, AccelerationStructureBuildType::Host);
        assert_eq!(params.operation_type, OperationType::Copy);
        assert_eq!(params.width, 8);
        assert_eq!(params.vertex_format, VertexFormat::R32G32B32Float);
        assert_eq!(params.empty_case, EmptyCase::NotEmpty);
    }

    #[test]
    fn json_round_trips() {
        let params = ScenarioParams {
            index_format: Some(IndexFormat::U16),
            build_flags: BuildAccelerationStructureFlags::PREFER_FAST_TRACE | BuildAccelerationStructureFlags::LOW_MEMORY,
            cull_flags: InstanceCullFlags::All,
            ..Default::default()
        };
        let json = params.to_json().unwrap();
        assert_eq!(ScenarioParams::from_json(&json).unwrap(), params);
    }

    #[test]
    fn invalid_combinations_are_rejected() {
        let operation_without_target = ScenarioParams {
            operation_type: OperationType::Copy,
            ..Default::default()
        };
        assert!(matches!(operation_without_target.validate(), Err(ScenarioError::InvalidParams(_))));

        let indexed_aabbs = ScenarioParams {
            bottom_type: BottomTestType::Aabbs,
            index_format: Some(IndexFormat::U32),
            ..Default::default()
        };
        assert!(indexed_aabbs.validate().is_err());

        let threaded_device_build = ScenarioParams {
            worker_threads: 4,
            operation_target: OperationTarget::Bottom,
            operation_type: OperationType::Copy,
            ..Default::default()
        };
        assert!(threaded_device_build.validate().is_err());

        assert!(matches!(ScenarioParams::from_json("{ \"width\": \"wide\" }"), Err(ScenarioError::Json(_))));
    }

    #[test]
    fn compaction_flag_follows_the_target_level() {
        let params = ScenarioParams {
            operation_target: OperationTarget::Bottom,
            operation_type: OperationType::Compaction,
            build_flags: BuildAccelerationStructureFlags::PREFER_FAST_BUILD,
            ..Default::default()
        };
        assert_eq!(
            params.bottom_build_flags(),
            BuildAccelerationStructureFlags::PREFER_FAST_BUILD | BuildAccelerationStructureFlags::ALLOW_COMPACTION
        );
        assert_eq!(params.top_build_flags(), BuildAccelerationStructureFlags::PREFER_FAST_BUILD);
    }

    #[test]
    fn names_distinguish_variants() {
        let params = ScenarioParams {
            build_type: AccelerationStructureBuildType::Host,
            operation_target: OperationTarget::Bottom,
            operation_type: OperationType::Serialization,
            worker_threads: u32::MAX,
            ..Default::default()
        };
        assert_eq!(
            params.name().as_str(),
            "cpu_built/triangles/identical_instances/r32g32b32float/serialization_bottom/threads_max/8x8"
        );
        let other = ScenarioParams {
            worker_threads: 8,
            ..params.clone()
        };
        assert_ne!(params.name(), other.name());
    }
}
