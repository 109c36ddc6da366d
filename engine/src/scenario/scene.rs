use crate::graphics::gpu::{
    GeometryInstanceFlags,
    RayFlags,
    RayQuery,
    RayQueryHit,
};
use crate::graphics::{
    BottomLevelStructure,
    GeometryDescriptor,
    InstanceDescriptor,
    TopLevelStructure,
};
use crate::{
    Affine3A,
    Vec3,
};

use super::*;

const TRIANGLE_CORNERS: [Vec3; 4] = [
    Vec3::new(0f32, 1f32, 0f32),
    Vec3::new(0f32, 0f32, 0f32),
    Vec3::new(1f32, 1f32, 0f32),
    Vec3::new(1f32, 0f32, 0f32),
];
const INDICES: [u32; 6] = [0, 1, 2, 2, 1, 3];
/// Reversed winding, front faces become back faces for the default facing.
const REVERSED_INDICES: [u32; 6] = [2, 1, 0, 3, 1, 2];

const AABB_DEPTH: f32 = 0.1f32;
const PADDED_AABBS: [(Vec3, Vec3); 4] = [
    (Vec3::new(0f32, 0f32, -AABB_DEPTH), Vec3::new(0.5f32, 0.5f32, AABB_DEPTH)),
    (Vec3::new(0.5f32, 0.5f32, -AABB_DEPTH), Vec3::new(1f32, 1f32, AABB_DEPTH)),
    (Vec3::new(0f32, 0.5f32, -AABB_DEPTH), Vec3::new(0.5f32, 1f32, AABB_DEPTH)),
    (Vec3::new(0.5f32, 0f32, -AABB_DEPTH), Vec3::new(1f32, 0.5f32, AABB_DEPTH)),
];

pub const RAY_CULL_MASK: u8 = 0xFF;

/// A `width` x `height` grid where every cell with an odd `x + y` holds a unit quad (two
/// triangles) or unit box, and one ray per cell looks straight down onto it.
pub struct CheckerboardScene {
    pub bottoms: Vec<BottomLevelStructure>,
    pub top: TopLevelStructure,
    pub rays: Vec<RayQuery>,
    pub expected: Vec<RayQueryHit>,
    pub ray_flags: RayFlags,
}

fn is_filled(x: u32, y: u32) -> bool {
    (x + y) % 2 == 1
}

impl CheckerboardScene {
    /// Builds the unbuilt structures for `params`. Structure settings beyond the geometry
    /// (build type, flags, deferral) are left to the caller.
    pub fn new(params: &ScenarioParams) -> Self {
        let reversed = params.cull_flags != InstanceCullFlags::None;
        let snorm = params.vertex_format.is_snorm();
        let scale = if snorm {
            Vec3::new(1f32 / params.width as f32, 1f32 / params.height as f32, 1f32)
        } else {
            Vec3::ONE
        };

        let mut bottoms = Vec::new();
        let mut top = TopLevelStructure::new();
        let instance_flags: GeometryInstanceFlags = params.cull_flags.instance_flags();
        match params.top_type {
            TopTestType::DifferentInstances => {
                bottoms.push(bottom_for_cell(params, Vec3::ZERO, Vec3::ONE, reversed));
                for y in 0..params.height {
                    for x in 0..params.width {
                        if !is_filled(x, y) {
                            continue;
                        }
                        let translation = Affine3A::from_translation(Vec3::new(x as f32, y as f32, 0f32));
                        top.add_instance(InstanceDescriptor::new(0).with_transform(translation).with_flags(instance_flags));
                    }
                }
            }
            TopTestType::IdenticalInstances => {
                let transform = if snorm {
                    Affine3A::from_scale(Vec3::new(params.width as f32, params.height as f32, 1f32))
                } else {
                    Affine3A::IDENTITY
                };
                for y in 0..params.height {
                    for x in 0..params.width {
                        if !is_filled(x, y) {
                            continue;
                        }
                        let offset = Vec3::new(x as f32, y as f32, 0f32);
                        top.add_instance(
                            InstanceDescriptor::new(bottoms.len())
                                .with_transform(transform)
                                .with_flags(instance_flags),
                        );
                        bottoms.push(bottom_for_cell(params, offset, scale, reversed));
                    }
                }
            }
        }

        let mut rays = Vec::with_capacity(params.cell_count());
        let mut expected = Vec::with_capacity(params.cell_count());
        let hit = match params.bottom_type {
            BottomTestType::Triangles => RayQueryHit::Triangle,
            BottomTestType::Aabbs => RayQueryHit::Aabb,
        };
        for y in 0..params.height {
            for x in 0..params.width {
                rays.push(RayQuery::new(
                    Vec3::new(x as f32 + 0.5f32, y as f32 + 0.5f32, 0.5f32),
                    Vec3::new(0f32, 0f32, -1f32),
                    0f32,
                    1f32,
                ));
                expected.push(if is_filled(x, y) && !params.is_empty() { hit } else { RayQueryHit::Miss });
            }
        }

        let ray_flags = if params.cull_flags == InstanceCullFlags::None {
            RayFlags::empty()
        } else {
            RayFlags::CULL_BACK_FACING_TRIANGLES
        };

        Self {
            bottoms,
            top,
            rays,
            expected,
            ray_flags,
        }
    }
}

fn bottom_for_cell(params: &ScenarioParams, offset: Vec3, scale: Vec3, reversed: bool) -> BottomLevelStructure {
    let mut bottom = BottomLevelStructure::new();
    let geometry = match params.bottom_type {
        BottomTestType::Triangles => triangle_quad(params, offset, scale, reversed),
        BottomTestType::Aabbs => aabb_quad(params, offset, scale),
    };
    bottom.add_geometry(geometry);
    bottom
}

fn triangle_quad(params: &ScenarioParams, offset: Vec3, scale: Vec3, reversed: bool) -> GeometryDescriptor {
    let mut geometry = GeometryDescriptor::triangles(params.vertex_format, params.index_format);
    if params.padding {
        geometry.set_padding_blocks(1);
    }
    let corners = TRIANGLE_CORNERS.map(|corner| {
        let position = scale * (offset + corner);
        if params.empty_case == EmptyCase::InactiveTriangles {
            Vec3::new(f32::NAN, position.y, position.z)
        } else {
            position
        }
    });
    let order = if reversed { &REVERSED_INDICES } else { &INDICES };
    if params.index_format.is_some() {
        for corner in corners {
            geometry.add_vertex(corner);
        }
        for index in order {
            geometry.add_index(*index);
        }
    } else {
        for index in order {
            geometry.add_vertex(corners[*index as usize]);
        }
    }
    geometry
}

fn aabb_quad(params: &ScenarioParams, offset: Vec3, scale: Vec3) -> GeometryDescriptor {
    let mut geometry = GeometryDescriptor::aabbs();
    if params.padding {
        geometry.set_padding_blocks(1);
        for (min, max) in PADDED_AABBS {
            geometry.add_vertex(scale * (offset + min));
            geometry.add_vertex(scale * (offset + max));
        }
    } else {
        geometry.add_vertex(scale * (offset + Vec3::new(0f32, 0f32, -AABB_DEPTH)));
        geometry.add_vertex(scale * (offset + Vec3::new(1f32, 1f32, AABB_DEPTH)));
    }
    geometry
}
