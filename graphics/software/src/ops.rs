//! Acceleration structure operations shared by host commands and queue execution.

use std::sync::Arc;

use parking_lot::Mutex;
use raycts_core::gpu::{
    AccelerationStructure,
    AccelerationStructureCompatibility,
    AccelerationStructureInputs,
    AccelerationStructureSizes,
    BackendError,
    BuildAccelerationStructureFlags,
    CopyMode,
    InstanceRecord,
    QueryType,
    SerializedHeader,
};
use raycts_core::align_up_64;

use crate::bvh::{
    build_bvh,
    max_leaf_size,
    Aabb,
};
use crate::deferred::{
    HostTask,
    Unit,
};
use crate::geometry::{
    BuildInputsJob,
    BuildJob,
};
use crate::image::{
    reserved_size,
    ImageItems,
    ImageLevel,
    PrimitiveRecord,
    StructureImage,
};
use crate::{
    SoftAccelerationStructure,
    SoftBackend,
    SoftBuffer,
    SoftShared,
};

const SCRATCH_PER_ITEM: u64 = 32;
const MIN_SCRATCH_SIZE: u64 = 256;

pub(crate) fn build_sizes(inputs: &AccelerationStructureInputs<SoftBackend>, flags: BuildAccelerationStructureFlags) -> AccelerationStructureSizes {
    let item_count = inputs.primitive_count();
    let scratch = (item_count * SCRATCH_PER_ITEM).max(MIN_SCRATCH_SIZE);
    AccelerationStructureSizes {
        size: reserved_size(item_count, flags),
        build_scratch_size: scratch,
        update_scratch_size: if flags.contains(BuildAccelerationStructureFlags::ALLOW_UPDATE) {
            scratch
        } else {
            0
        },
    }
}

fn validate_build(job: &BuildJob) -> Result<(), BackendError> {
    job.dst.check_level(job.level())?;
    let scratch_size = (job.item_count() * SCRATCH_PER_ITEM).max(MIN_SCRATCH_SIZE);
    let scratch_end = job.scratch_offset.checked_add(scratch_size);
    if scratch_end.map(|end| end > job.scratch.size()).unwrap_or(true) {
        return Err(BackendError::invalid_usage(format!(
            "scratch buffer of {} bytes is too small, {} bytes are required at offset {}",
            job.scratch.size(),
            scratch_size,
            job.scratch_offset
        )));
    }
    Ok(())
}

/// Instance gathered for a top level build together with the world space bounds of the
/// structure it references. Inactive instances and empty bottom levels have no bounds.
struct GatheredInstance {
    record: InstanceRecord,
    bounds: Option<Aabb>,
}

fn instance_bounds(shared: &SoftShared, record: &InstanceRecord) -> Result<Option<Aabb>, BackendError> {
    if !record.is_active() {
        return Ok(None);
    }
    let reference = record.acceleration_structure_reference;
    let bottom = shared.resolve_structure(reference).ok_or(BackendError::UnknownAddress(reference))?;
    let header = bottom.read_header()?;
    if header.level() != ImageLevel::Bottom {
        return Err(BackendError::invalid_usage(format!(
            "instance references {:#x} which is not a bottom level structure",
            reference
        )));
    }
    let bounds = bottom.read_image()?.bounds();
    if bounds.is_empty() {
        return Ok(None);
    }
    Ok(Some(bounds.transformed(&record.affine())))
}

fn finish_image(build_flags: BuildAccelerationStructureFlags, items: ImageItems, bounds: Vec<Option<Aabb>>) -> StructureImage {
    let mut active = Vec::new();
    let mut active_bounds = Vec::new();
    for (index, item_bounds) in bounds.into_iter().enumerate() {
        if let Some(item_bounds) = item_bounds {
            active.push(index as u32);
            active_bounds.push(item_bounds);
        }
    }
    let (nodes, refs) = build_bvh(&active_bounds, max_leaf_size(build_flags));
    StructureImage {
        build_flags,
        nodes,
        items,
        refs: refs.into_iter().map(|reference| active[reference as usize]).collect(),
    }
}

/// Splits a build into one unit per work chunk. Every unit fills its own slot, the finish
/// step assembles the slots in order and writes the image.
pub(crate) fn build_task(shared: &Arc<SoftShared>, job: BuildJob) -> Result<HostTask, BackendError> {
    validate_build(&job)?;
    let chunks = job.inputs.chunks(shared.config().primitives_per_work_unit);
    log::trace!(
        "Building {:?} level structure at {:#x}: {} items in {} units",
        job.level(),
        job.dst.device_address(),
        job.item_count(),
        chunks.len()
    );

    let job = Arc::new(job);
    match &job.inputs {
        BuildInputsJob::Bottom(_) => {
            let slots: Arc<Mutex<Vec<Option<Vec<PrimitiveRecord>>>>> = Arc::new(Mutex::new(vec![None; chunks.len()]));
            let mut units: Vec<Unit> = Vec::with_capacity(chunks.len());
            for (slot, chunk) in chunks.into_iter().enumerate() {
                let job = job.clone();
                let slots = slots.clone();
                units.push(Box::new(move || {
                    let BuildInputsJob::Bottom(geometries) = &job.inputs else {
                        return Ok(());
                    };
                    let primitives = geometries[chunk.geometry_index as usize].gather(chunk.geometry_index, chunk.first, chunk.count)?;
                    slots.lock()[slot] = Some(primitives);
                    Ok(())
                }));
            }
            let finish: Unit = Box::new(move || {
                let primitives: Vec<PrimitiveRecord> = slots.lock().drain(..).flatten().flatten().collect();
                let bounds = primitives
                    .iter()
                    .map(|primitive| primitive.is_active().then(|| primitive.bounds()))
                    .collect();
                let image = finish_image(job.flags, ImageItems::Primitives(primitives), bounds);
                job.dst.write_image_bytes(&image.encode())
            });
            Ok(HostTask::new(units, finish))
        }
        BuildInputsJob::Top(_) => {
            let slots: Arc<Mutex<Vec<Option<Vec<GatheredInstance>>>>> = Arc::new(Mutex::new((0..chunks.len()).map(|_| None).collect()));
            let mut units: Vec<Unit> = Vec::with_capacity(chunks.len());
            for (slot, chunk) in chunks.into_iter().enumerate() {
                let job = job.clone();
                let slots = slots.clone();
                let shared = shared.clone();
                units.push(Box::new(move || {
                    let BuildInputsJob::Top(instances) = &job.inputs else {
                        return Ok(());
                    };
                    let mut gathered = Vec::with_capacity(chunk.count as usize);
                    for record in instances.gather(&shared, chunk.first, chunk.count)? {
                        let bounds = instance_bounds(&shared, &record)?;
                        gathered.push(GatheredInstance { record, bounds });
                    }
                    slots.lock()[slot] = Some(gathered);
                    Ok(())
                }));
            }
            let finish: Unit = Box::new(move || {
                let gathered: Vec<GatheredInstance> = slots.lock().drain(..).flatten().flatten().collect();
                let bounds = gathered.iter().map(|instance| instance.bounds).collect();
                let records = gathered.into_iter().map(|instance| instance.record).collect();
                let image = finish_image(job.flags, ImageItems::Instances(records), bounds);
                job.dst.write_image_bytes(&image.encode())
            });
            Ok(HostTask::new(units, finish))
        }
    }
}

pub(crate) fn copy_task(src: &SoftAccelerationStructure, dst: &SoftAccelerationStructure, mode: CopyMode) -> Result<HostTask, BackendError> {
    match mode {
        CopyMode::Clone | CopyMode::Compact => {}
        CopyMode::Serialize | CopyMode::Deserialize => {
            return Err(BackendError::invalid_usage(format!("{:?} is not a structure to structure copy", mode)));
        }
    }
    let src = src.clone();
    let dst = dst.clone();
    Ok(HostTask::single(Box::new(move || {
        let header = src.read_header()?;
        if mode == CopyMode::Compact && !header.build_flags().contains(BuildAccelerationStructureFlags::ALLOW_COMPACTION) {
            return Err(BackendError::invalid_usage("compacting a structure built without ALLOW_COMPACTION"));
        }
        dst.check_level(header.level())?;
        let bytes = src.read_image_bytes()?;
        log::trace!(
            "Copying {} bytes from {:#x} to {:#x} ({:?})",
            bytes.len(),
            src.device_address(),
            dst.device_address(),
            mode
        );
        dst.write_image_bytes(&bytes)
    })))
}

fn handles_of(image: &StructureImage) -> Vec<u64> {
    image
        .instances()
        .map(|instances| instances.iter().map(|instance| instance.acceleration_structure_reference).collect())
        .unwrap_or_default()
}

fn serialized_size(handle_count: u64, image_size: u64) -> u64 {
    SerializedHeader::SIZE + handle_count * SerializedHeader::HANDLE_SIZE + image_size
}

pub(crate) fn serialize_task(shared: &Arc<SoftShared>, src: &SoftAccelerationStructure, dst: &SoftBuffer, dst_offset: u64) -> HostTask {
    let shared = shared.clone();
    let src = src.clone();
    let dst = dst.clone();
    HostTask::single(Box::new(move || {
        let image_bytes = src.read_image_bytes()?;
        let image = StructureImage::decode(&image_bytes)?;
        let handles = handles_of(&image);
        let header = SerializedHeader {
            driver_uuid: shared.config().driver_uuid,
            compatibility_uuid: shared.config().compatibility_uuid,
            serialized_size: serialized_size(handles.len() as u64, image_bytes.len() as u64),
            deserialized_size: image_bytes.len() as u64,
            handle_count: handles.len() as u64,
        };
        let mut bytes = Vec::with_capacity(header.serialized_size as usize);
        bytes.extend_from_slice(bytemuck::bytes_of(&header));
        for handle in &handles {
            bytes.extend_from_slice(&handle.to_le_bytes());
        }
        bytes.extend_from_slice(&image_bytes);
        log::trace!(
            "Serializing structure {:#x}: {} bytes, {} handles",
            src.device_address(),
            bytes.len(),
            handles.len()
        );
        dst.write_bytes(dst_offset, &bytes)
    }))
}

pub(crate) fn compatibility(shared: &SoftShared, header: &SerializedHeader) -> AccelerationStructureCompatibility {
    if header.driver_uuid == shared.config().driver_uuid && header.compatibility_uuid == shared.config().compatibility_uuid {
        AccelerationStructureCompatibility::Compatible
    } else {
        AccelerationStructureCompatibility::Incompatible
    }
}

pub(crate) fn deserialize_task(shared: &Arc<SoftShared>, src: &SoftBuffer, src_offset: u64, dst: &SoftAccelerationStructure) -> HostTask {
    let shared = shared.clone();
    let src = src.clone();
    let dst = dst.clone();
    HostTask::single(Box::new(move || {
        let header_bytes = src.read_bytes(src_offset, SerializedHeader::SIZE)?;
        let header = SerializedHeader::parse(&header_bytes).ok_or_else(|| BackendError::invalid_usage("serialized data is truncated"))?;
        if compatibility(&shared, &header) == AccelerationStructureCompatibility::Incompatible {
            return Err(BackendError::Incompatible);
        }
        let handle_bytes = src.read_bytes(
            src_offset + SerializedHeader::handles_offset(),
            header.handle_count * SerializedHeader::HANDLE_SIZE,
        )?;
        let handles: Vec<u64> = handle_bytes
            .chunks_exact(SerializedHeader::HANDLE_SIZE as usize)
            .map(|chunk| bytemuck::pod_read_unaligned(chunk))
            .collect();
        let payload = src.read_bytes(src_offset + header.payload_offset(), header.deserialized_size)?;
        let mut image = StructureImage::decode(&payload)?;
        dst.check_level(image.level())?;

        match image.instances_mut() {
            Some(instances) => {
                if instances.len() != handles.len() {
                    return Err(BackendError::invalid_usage(format!(
                        "serialized data carries {} handles for {} instances",
                        handles.len(),
                        instances.len()
                    )));
                }
                for (instance, handle) in instances.iter_mut().zip(handles) {
                    instance.acceleration_structure_reference = handle;
                }
            }
            None if !handles.is_empty() => {
                return Err(BackendError::invalid_usage("bottom level serialized data must not carry handles"));
            }
            None => {}
        }
        log::trace!("Deserializing {} bytes into structure {:#x}", payload.len(), dst.device_address());
        dst.write_image_bytes(&image.encode())
    }))
}

pub(crate) fn properties(structures: &[SoftAccelerationStructure], query_type: QueryType) -> Result<Vec<u64>, BackendError> {
    structures
        .iter()
        .map(|structure| {
            let header = structure.read_header()?;
            match query_type {
                QueryType::AccelerationStructureCompactedSize => {
                    if !header.build_flags().contains(BuildAccelerationStructureFlags::ALLOW_COMPACTION) {
                        return Err(BackendError::invalid_usage("compacted size of a structure built without ALLOW_COMPACTION"));
                    }
                    Ok(align_up_64(header.image_size, 8))
                }
                QueryType::AccelerationStructureSerializationSize => {
                    let handle_count = match header.level() {
                        ImageLevel::Top => header.item_count() as u64,
                        ImageLevel::Bottom => 0,
                    };
                    Ok(serialized_size(handle_count, header.image_size))
                }
            }
        })
        .collect()
}
