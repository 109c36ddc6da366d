use std::collections::HashMap;

use raycts_core::gpu::{
    BackendError,
    GeometryFlags,
    GeometryInstanceFlags,
    InstanceRecord,
    RayFlags,
    RayQuery,
    RayQueryHit,
};
use raycts_core::Vec3;

use crate::bvh::{
    traverse,
    Visit,
};
use crate::image::{
    ImageLevel,
    PrimitiveRecord,
    StructureImage,
    PRIMITIVE_AABB,
};
use crate::{
    SoftAccelerationStructure,
    SoftBuffer,
    SoftShared,
};

const RAY_QUERY_SIZE: u64 = std::mem::size_of::<RayQuery>() as u64;
const TRIANGLE_EPSILON: f32 = 1.0e-7;
/// Shared edges are hit by both triangles even with rounding in the barycentrics.
const EDGE_TOLERANCE: f32 = 1.0e-5;

#[derive(Clone)]
pub(crate) struct TraceJob {
    pub structure: SoftAccelerationStructure,
    pub ray_flags: RayFlags,
    pub cull_mask: u8,
    pub rays: SoftBuffer,
    pub rays_offset: u64,
    pub results: SoftBuffer,
    pub results_offset: u64,
    pub ray_count: u32,
}

#[derive(Clone, Copy)]
struct Candidate {
    t: f32,
    hit: RayQueryHit,
}

/// Bottom level structures resolved once per dispatch.
struct BottomCache<'a> {
    shared: &'a SoftShared,
    images: HashMap<u64, Option<StructureImage>>,
}

impl<'a> BottomCache<'a> {
    fn get(&mut self, reference: u64) -> Option<&StructureImage> {
        let shared = self.shared;
        self.images
            .entry(reference)
            .or_insert_with(|| {
                let image = shared
                    .resolve_structure(reference)
                    .ok_or(BackendError::UnknownAddress(reference))
                    .and_then(|structure| structure.read_image());
                match image {
                    Ok(image) if image.level() == ImageLevel::Bottom => Some(image),
                    Ok(_) => {
                        log::warn!("Instance references top level structure {:#x}, skipping it", reference);
                        None
                    }
                    Err(error) => {
                        log::warn!("Instance references unusable structure {:#x}: {}", reference, error);
                        None
                    }
                }
            })
            .as_ref()
    }
}

fn is_opaque(primitive: &PrimitiveRecord, instance_flags: GeometryInstanceFlags, ray_flags: RayFlags) -> bool {
    if ray_flags.contains(RayFlags::OPAQUE) {
        return true;
    }
    if ray_flags.contains(RayFlags::NO_OPAQUE) {
        return false;
    }
    if instance_flags.contains(GeometryInstanceFlags::FORCE_OPAQUE) {
        return true;
    }
    if instance_flags.contains(GeometryInstanceFlags::FORCE_NO_OPAQUE) {
        return false;
    }
    GeometryFlags::from_bits_truncate(primitive.geometry_flags).contains(GeometryFlags::OPAQUE)
}

/// Möller-Trumbore with inclusive edges. Returns the distance and whether the vertices
/// appear clockwise when viewed from the ray origin.
fn intersect_triangle(primitive: &PrimitiveRecord, origin: Vec3, direction: Vec3, tmin: f32, tmax: f32) -> Option<(f32, bool)> {
    let v0 = Vec3::from_array(primitive.a);
    let v1 = Vec3::from_array(primitive.b);
    let v2 = Vec3::from_array(primitive.c);
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let p = direction.cross(edge2);
    let determinant = edge1.dot(p);
    if determinant.abs() < TRIANGLE_EPSILON {
        return None;
    }
    let inverse = 1f32 / determinant;
    let s = origin - v0;
    let u = s.dot(p) * inverse;
    if u < -EDGE_TOLERANCE || u > 1f32 + EDGE_TOLERANCE {
        return None;
    }
    let q = s.cross(edge1);
    let v = direction.dot(q) * inverse;
    if v < -EDGE_TOLERANCE || u + v > 1f32 + EDGE_TOLERANCE {
        return None;
    }
    let t = edge2.dot(q) * inverse;
    if t < tmin || t > tmax {
        return None;
    }
    let clockwise = edge1.cross(edge2).dot(direction) < 0f32;
    Some((t, clockwise))
}

impl TraceJob {
    pub(crate) fn execute(&self, shared: &SoftShared) -> Result<(), BackendError> {
        let top = self.structure.read_image()?;
        let instances = top.instances().ok_or_else(|| BackendError::invalid_usage("ray queries need a top level structure"))?;
        let rays = self.rays.read_bytes(self.rays_offset, self.ray_count as u64 * RAY_QUERY_SIZE)?;
        let mut cache = BottomCache {
            shared,
            images: HashMap::new(),
        };

        let mut results = Vec::with_capacity(self.ray_count as usize * 4);
        for chunk in rays.chunks_exact(RAY_QUERY_SIZE as usize) {
            let ray: RayQuery = bytemuck::pod_read_unaligned(chunk);
            let hit = self.trace(&top, instances, &mut cache, &ray);
            results.extend_from_slice(&(hit as u32).to_le_bytes());
        }
        log::trace!("Traced {} rays against {:#x}", self.ray_count, raycts_core::gpu::AccelerationStructure::device_address(&self.structure));
        self.results.write_bytes(self.results_offset, &results)
    }

    fn trace(&self, top: &StructureImage, instances: &[InstanceRecord], cache: &mut BottomCache, ray: &RayQuery) -> RayQueryHit {
        let origin = Vec3::from_array(ray.origin);
        let direction = Vec3::from_array(ray.direction);
        let mut closest: Option<Candidate> = None;
        let terminate = self.ray_flags.contains(RayFlags::TERMINATE_ON_FIRST_HIT);

        traverse(&top.nodes, &top.refs, origin, direction, ray.tmin, ray.tmax, &mut |item, limit| {
            let instance = &instances[item as usize];
            if !instance.is_active() || instance.mask() & self.cull_mask == 0 {
                return Visit::Continue;
            }
            let Some(bottom) = cache.get(instance.acceleration_structure_reference) else {
                return Visit::Continue;
            };
            let to_object = instance.affine().inverse();
            let object_origin = to_object.transform_point3(origin);
            let object_direction = to_object.transform_vector3(direction);
            let Some(candidate) = self.trace_bottom(bottom, instance.flags(), object_origin, object_direction, ray.tmin, limit) else {
                return Visit::Continue;
            };
            closest = Some(candidate);
            if terminate {
                Visit::Stop
            } else {
                Visit::Hit(candidate.t)
            }
        });

        closest.map(|candidate| candidate.hit).unwrap_or(RayQueryHit::Miss)
    }

    fn trace_bottom(
        &self,
        bottom: &StructureImage,
        instance_flags: GeometryInstanceFlags,
        origin: Vec3,
        direction: Vec3,
        tmin: f32,
        tmax: f32,
    ) -> Option<Candidate> {
        let crate::image::ImageItems::Primitives(primitives) = &bottom.items else {
            return None;
        };
        let flags = self.ray_flags;
        let terminate = flags.contains(RayFlags::TERMINATE_ON_FIRST_HIT);
        let mut closest: Option<Candidate> = None;

        traverse(&bottom.nodes, &bottom.refs, origin, direction, tmin, tmax, &mut |item, limit| {
            let primitive = &primitives[item as usize];
            if !primitive.is_active() {
                return Visit::Continue;
            }
            let opaque = is_opaque(primitive, instance_flags, flags);
            if (opaque && flags.contains(RayFlags::CULL_OPAQUE)) || (!opaque && flags.contains(RayFlags::CULL_NO_OPAQUE)) {
                return Visit::Continue;
            }

            let candidate = if primitive.kind == PRIMITIVE_AABB {
                if flags.contains(RayFlags::SKIP_AABBS) {
                    return Visit::Continue;
                }
                match primitive.bounds().intersect(origin, direction, tmin, limit) {
                    Some(t) => Candidate { t, hit: RayQueryHit::Aabb },
                    None => return Visit::Continue,
                }
            } else {
                if flags.contains(RayFlags::SKIP_TRIANGLES) {
                    return Visit::Continue;
                }
                let Some((t, clockwise)) = intersect_triangle(primitive, origin, direction, tmin, limit) else {
                    return Visit::Continue;
                };
                if !instance_flags.contains(GeometryInstanceFlags::TRIANGLE_FACING_CULL_DISABLE) {
                    let front = clockwise != instance_flags.contains(GeometryInstanceFlags::TRIANGLE_FRONT_COUNTERCLOCKWISE);
                    if (front && flags.contains(RayFlags::CULL_FRONT_FACING_TRIANGLES))
                        || (!front && flags.contains(RayFlags::CULL_BACK_FACING_TRIANGLES))
                    {
                        return Visit::Continue;
                    }
                }
                Candidate { t, hit: RayQueryHit::Triangle }
            };

            closest = Some(candidate);
            if terminate {
                Visit::Stop
            } else {
                Visit::Hit(candidate.t)
            }
        });
        closest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(vertices: [[f32; 3]; 3]) -> PrimitiveRecord {
        PrimitiveRecord::triangle(vertices.map(Vec3::from_array), 0, 0, GeometryFlags::OPAQUE.bits())
    }

    #[test]
    fn winding_decides_facing() {
        let down = Vec3::new(0f32, 0f32, -1f32);
        let origin = Vec3::new(0.25f32, 0.5f32, 0.5f32);
        let clockwise = triangle([[0f32, 1f32, 0f32], [0f32, 0f32, 0f32], [1f32, 1f32, 0f32]]);
        let counter_clockwise = triangle([[1f32, 1f32, 0f32], [0f32, 0f32, 0f32], [0f32, 1f32, 0f32]]);
        assert_eq!(intersect_triangle(&clockwise, origin, down, 0f32, 1f32), Some((0.5f32, true)));
        assert_eq!(intersect_triangle(&counter_clockwise, origin, down, 0f32, 1f32), Some((0.5f32, false)));
    }

    #[test]
    fn triangle_hits_respect_the_interval() {
        let down = Vec3::new(0f32, 0f32, -1f32);
        let origin = Vec3::new(0.25f32, 0.5f32, 0.5f32);
        let front = triangle([[0f32, 1f32, 0f32], [0f32, 0f32, 0f32], [1f32, 1f32, 0f32]]);
        assert_eq!(intersect_triangle(&front, origin, down, 0f32, 0.4f32), None);
        assert_eq!(intersect_triangle(&front, Vec3::new(0.9f32, 0.1f32, 0.5f32), down, 0f32, 1f32), None);
    }

    #[test]
    fn ray_flags_override_instance_opacity() {
        let primitive = triangle([[0f32; 3], [1f32, 0f32, 0f32], [0f32, 1f32, 0f32]]);
        assert!(is_opaque(&primitive, GeometryInstanceFlags::empty(), RayFlags::empty()));
        assert!(!is_opaque(&primitive, GeometryInstanceFlags::FORCE_NO_OPAQUE, RayFlags::empty()));
        assert!(is_opaque(&primitive, GeometryInstanceFlags::FORCE_NO_OPAQUE, RayFlags::OPAQUE));
    }
}
