use crate::graphics::gpu::{
    AccelerationStructureBuildType,
    BuildAccelerationStructureFlags,
    IndexFormat,
    VertexFormat,
};

use super::*;

pub const TEST_WIDTH: u32 = 8;
pub const TEST_HEIGHT: u32 = 8;

pub const HOST_THREAD_COUNTS: [u32; 6] = [1, 2, 3, 4, 8, u32::MAX];

const BUILD_TYPES: [AccelerationStructureBuildType; 2] =
    [AccelerationStructureBuildType::Host, AccelerationStructureBuildType::Device];
const INDEX_FORMATS: [Option<IndexFormat>; 3] = [None, Some(IndexFormat::U16), Some(IndexFormat::U32)];

/// Table driven scenario lists, grouped the way the cases are usually run.
pub struct ScenarioMatrix;

impl ScenarioMatrix {
    fn base(build_type: AccelerationStructureBuildType) -> ScenarioParams {
        ScenarioParams {
            build_type,
            width: TEST_WIDTH,
            height: TEST_HEIGHT,
            ..Default::default()
        }
    }

    /// Every geometry layout crossed with every combination of build flags and generic
    /// structure types.
    pub fn basic() -> Vec<ScenarioParams> {
        let bottoms = [
            (BottomTestType::Triangles, false),
            (BottomTestType::Triangles, true),
            (BottomTestType::Aabbs, false),
            (BottomTestType::Aabbs, true),
        ];
        let tops = [
            (TopTestType::IdenticalInstances, false),
            (TopTestType::IdenticalInstances, true),
            (TopTestType::DifferentInstances, false),
            (TopTestType::DifferentInstances, true),
        ];
        let optimizations = [
            BuildAccelerationStructureFlags::empty(),
            BuildAccelerationStructureFlags::PREFER_FAST_TRACE,
            BuildAccelerationStructureFlags::PREFER_FAST_BUILD,
        ];
        let updates = [BuildAccelerationStructureFlags::empty(), BuildAccelerationStructureFlags::ALLOW_UPDATE];
        let compactions = [BuildAccelerationStructureFlags::empty(), BuildAccelerationStructureFlags::ALLOW_COMPACTION];
        let low_memory = [BuildAccelerationStructureFlags::empty(), BuildAccelerationStructureFlags::LOW_MEMORY];
        let generics = [(false, false), (true, false), (false, true), (true, true)];

        let mut scenarios = Vec::new();
        for build_type in BUILD_TYPES {
            for (bottom_type, bottom_uses_aop) in bottoms {
                for (top_type, top_uses_aop) in tops {
                    for padding in [false, true] {
                        for optimization in optimizations {
                            for update in updates {
                                for compaction in compactions {
                                    for memory in low_memory {
                                        for (bottom_generic, top_generic) in generics {
                                            scenarios.push(ScenarioParams {
                                                bottom_type,
                                                bottom_uses_aop,
                                                top_type,
                                                top_uses_aop,
                                                padding,
                                                build_flags: optimization | update | compaction | memory,
                                                bottom_generic,
                                                top_generic,
                                                ..Self::base(build_type)
                                            });
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        scenarios
    }

    /// Every vertex format, with and without padding and indices.
    pub fn vertex_formats() -> Vec<ScenarioParams> {
        let mut scenarios = Vec::new();
        for build_type in BUILD_TYPES {
            for vertex_format in VertexFormat::ALL {
                for padding in [false, true] {
                    for index_format in INDEX_FORMATS {
                        scenarios.push(ScenarioParams {
                            vertex_format,
                            padding,
                            index_format,
                            ..Self::base(build_type)
                        });
                    }
                }
            }
        }
        scenarios
    }

    /// Copy, compaction and serialization of either level. Operations on the top level use
    /// one shared bottom level structure, operations on the bottom level one per cell.
    pub fn operations() -> Vec<ScenarioParams> {
        let mut scenarios = Vec::new();
        for operation_type in [OperationType::Copy, OperationType::Compaction, OperationType::Serialization] {
            for build_type in BUILD_TYPES {
                for (operation_target, top_type) in [
                    (OperationTarget::Top, TopTestType::DifferentInstances),
                    (OperationTarget::Bottom, TopTestType::IdenticalInstances),
                ] {
                    for bottom_type in [BottomTestType::Triangles, BottomTestType::Aabbs] {
                        scenarios.push(ScenarioParams {
                            operation_type,
                            operation_target,
                            top_type,
                            bottom_type,
                            ..Self::base(build_type)
                        });
                    }
                }
            }
        }
        scenarios
    }

    /// Host copies and serializations finished by several threads joined to one deferred
    /// operation.
    pub fn host_threading() -> Vec<ScenarioParams> {
        let mut scenarios = Vec::new();
        for worker_threads in HOST_THREAD_COUNTS {
            for operation_type in [OperationType::Copy, OperationType::Serialization] {
                for (operation_target, top_type) in [
                    (OperationTarget::Top, TopTestType::DifferentInstances),
                    (OperationTarget::Bottom, TopTestType::IdenticalInstances),
                ] {
                    for bottom_type in [BottomTestType::Triangles, BottomTestType::Aabbs] {
                        scenarios.push(ScenarioParams {
                            operation_type,
                            operation_target,
                            top_type,
                            bottom_type,
                            worker_threads,
                            ..Self::base(AccelerationStructureBuildType::Host)
                        });
                    }
                }
            }
        }
        scenarios
    }

    /// Instance facing flags combined with back face culling rays and reversed winding.
    pub fn culling() -> Vec<ScenarioParams> {
        let cull_flags = [
            InstanceCullFlags::None,
            InstanceCullFlags::CounterClockwise,
            InstanceCullFlags::CullDisable,
            InstanceCullFlags::All,
        ];
        let mut scenarios = Vec::new();
        for build_type in BUILD_TYPES {
            for index_format in INDEX_FORMATS {
                for top_type in [TopTestType::DifferentInstances, TopTestType::IdenticalInstances] {
                    for cull_flags in cull_flags {
                        scenarios.push(ScenarioParams {
                            index_format,
                            top_type,
                            cull_flags,
                            ..Self::base(build_type)
                        });
                    }
                }
            }
        }
        scenarios
    }

    /// Structures that are valid but contain nothing a ray could hit.
    pub fn empty() -> Vec<ScenarioParams> {
        let empty_cases = [
            EmptyCase::InactiveTriangles,
            EmptyCase::InactiveInstances,
            EmptyCase::NoGeometriesBottom,
            EmptyCase::NoPrimitivesTop,
            EmptyCase::NoPrimitivesBottom,
        ];
        let mut scenarios = Vec::new();
        for build_type in BUILD_TYPES {
            for index_format in INDEX_FORMATS {
                for empty_case in empty_cases {
                    scenarios.push(ScenarioParams {
                        index_format,
                        empty_case,
                        ..Self::base(build_type)
                    });
                }
            }
        }
        scenarios
    }

    pub fn all() -> Vec<ScenarioParams> {
        let mut scenarios = Self::basic();
        scenarios.extend(Self::vertex_formats());
        scenarios.extend(Self::operations());
        scenarios.extend(Self::host_threading());
        scenarios.extend(Self::culling());
        scenarios.extend(Self::empty());
        scenarios
    }
}
