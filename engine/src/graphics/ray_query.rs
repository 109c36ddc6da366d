use log::trace;

use super::gpu::{
    BackendError,
    BufferInfo,
    BufferUsage,
    CommandBuffer as _,
    MemoryKind,
    RayFlags,
    RayQuery,
    RayQueryHit,
};
use super::*;

const RESULT_SIZE: u64 = std::mem::size_of::<u32>() as u64;

/// Traces one ray query per entry of `rays` against `top` and reports for each whether it
/// hit a triangle, an AABB or nothing. Submits the context and waits for the result.
pub fn trace_ray_queries(
    context: &mut ExecutionContext,
    top: &TopLevelStructure,
    rays: &[RayQuery],
    ray_flags: RayFlags,
    cull_mask: u8,
) -> Result<Vec<RayQueryHit>> {
    let structure = top.structure()?;
    let ray_buffer = context.create_buffer_with_data(bytemuck::cast_slice(rays), BufferUsage::STORAGE, Some("Rays"))?;
    let result_buffer = context.create_buffer(
        &BufferInfo {
            size: rays.len() as u64 * RESULT_SIZE,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
            memory_kind: MemoryKind::RAM,
        },
        Some("RayQueryResults"),
    )?;

    trace!("Tracing {} ray queries against {:?}", rays.len(), structure);
    context.record(|command_buffer| unsafe {
        command_buffer.trace_ray_queries(&active_gpu_backend::RayQueryDispatchInfo {
            acceleration_structure: structure.handle(),
            ray_flags,
            cull_mask,
            rays: ray_buffer.handle(),
            rays_offset: 0,
            results: result_buffer.handle(),
            results_offset: 0,
            ray_count: rays.len() as u32,
        });
    });
    context.submit_and_wait()?;

    let bytes = result_buffer.read(0, result_buffer.size())?;
    bytes
        .chunks_exact(RESULT_SIZE as usize)
        .map(|chunk| {
            let value = bytemuck::pod_read_unaligned::<u32>(chunk);
            RayQueryHit::from_raw(value)
                .ok_or_else(|| Error::Backend(BackendError::invalid_usage(format!("unknown ray query result {}", value))))
        })
        .collect()
}
