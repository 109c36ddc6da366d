use pretty_assertions::assert_eq;
use raycts_engine::graphics::gpu::{
    AccelerationStructureBuildType,
    BuildAccelerationStructureFlags,
    IndexFormat,
    QueryType,
    RayFlags,
    RayQuery,
    RayQueryHit,
    SerializedHeader,
    VertexFormat,
};
use raycts_engine::graphics::{
    trace_ray_queries,
    BottomLevelStructure,
    BuildOrigin,
    DeferredSettings,
    DeviceConfig,
    Error,
    ExecutionContext,
    GPUDevice,
    GeometryDescriptor,
    InstanceDescriptor,
    SerialStorage,
    SizeQueryCoordinator,
    StructureState,
    TopLevelStructure,
};
use raycts_engine::Vec3;

const QUAD: [[f32; 3]; 6] = [
    [0f32, 1f32, 0f32],
    [0f32, 0f32, 0f32],
    [1f32, 1f32, 0f32],
    [1f32, 1f32, 0f32],
    [0f32, 0f32, 0f32],
    [1f32, 0f32, 0f32],
];

fn quad_bottom(build_type: AccelerationStructureBuildType, flags: BuildAccelerationStructureFlags) -> BottomLevelStructure {
    let mut geometry = GeometryDescriptor::triangles(VertexFormat::R32G32B32Float, None);
    for vertex in QUAD {
        geometry.add_vertex(Vec3::from_array(vertex));
    }
    let mut bottom = BottomLevelStructure::new();
    bottom.set_build_type(build_type);
    bottom.set_build_flags(flags);
    bottom.add_geometry(geometry);
    bottom
}

fn quad_row_bottom(build_type: AccelerationStructureBuildType, quads: u32) -> BottomLevelStructure {
    let mut geometry = GeometryDescriptor::triangles(VertexFormat::R32G32B32Float, None);
    for quad in 0..quads {
        for vertex in QUAD {
            geometry.add_vertex(Vec3::from_array(vertex) + Vec3::new(quad as f32, 0f32, 0f32));
        }
    }
    let mut bottom = BottomLevelStructure::new();
    bottom.set_build_type(build_type);
    bottom.set_build_flags(BuildAccelerationStructureFlags::ALLOW_COMPACTION);
    bottom.add_geometry(geometry);
    bottom
}

fn single_instance_top(build_type: AccelerationStructureBuildType) -> TopLevelStructure {
    let mut top = TopLevelStructure::new();
    top.set_build_type(build_type);
    top.add_instance(InstanceDescriptor::new(0));
    top
}

fn down_ray(x: f32, y: f32) -> RayQuery {
    RayQuery::new(Vec3::new(x, y, 0.5f32), Vec3::new(0f32, 0f32, -1f32), 0f32, 1f32)
}

fn trace_center(context: &mut ExecutionContext, top: &TopLevelStructure) -> RayQueryHit {
    let hits = trace_ray_queries(context, top, &[down_ray(0.5f32, 0.5f32)], RayFlags::empty(), 0xFF).unwrap();
    hits[0]
}

#[test]
fn copies_trace_like_their_source() {
    let device = GPUDevice::new(&DeviceConfig::default());
    let mut context = device.create_context();
    let host = AccelerationStructureBuildType::Host;

    let mut bottom = quad_bottom(host, BuildAccelerationStructureFlags::empty());
    bottom.create_and_build(&mut context).unwrap();
    let mut top = single_instance_top(host);
    top.create_and_build(&mut context, &[&bottom]).unwrap();

    let mut copy = TopLevelStructure::new();
    copy.set_build_type(host);
    copy.create_and_copy_from(&mut context, &top, None).unwrap();

    assert_eq!(copy.state(), StructureState::Ready(BuildOrigin::Copied));
    assert_eq!(copy.structure().unwrap().size(), top.structure().unwrap().size());
    assert_eq!(trace_center(&mut context, &top), RayQueryHit::Triangle);
    assert_eq!(trace_center(&mut context, &copy), RayQueryHit::Triangle);
}

#[test]
fn compaction_requires_the_flag() {
    let device = GPUDevice::new(&DeviceConfig::default());
    let mut context = device.create_context();
    let mut bottom = quad_bottom(AccelerationStructureBuildType::Host, BuildAccelerationStructureFlags::PREFER_FAST_TRACE);
    bottom.create_and_build(&mut context).unwrap();

    let query = SizeQueryCoordinator::query_batch(
        &mut context,
        &[bottom.structure().unwrap()],
        QueryType::AccelerationStructureCompactedSize,
    );
    assert!(matches!(query, Err(Error::IncompatibleFlags(_))));

    let mut compacted = BottomLevelStructure::new();
    compacted.set_build_type(AccelerationStructureBuildType::Host);
    let size = bottom.structure().unwrap().size();
    let result = compacted.create_and_copy_from(&mut context, &bottom, Some(size));
    assert!(matches!(result, Err(Error::IncompatibleFlags(_))));
    assert_eq!(compacted.state(), StructureState::Empty);
}

#[test]
fn compacted_structures_are_no_larger_and_still_hit() {
    let device = GPUDevice::new(&DeviceConfig::default());
    let mut context = device.create_context();
    let gpu = AccelerationStructureBuildType::Device;
    let mut bottom = quad_bottom(gpu, BuildAccelerationStructureFlags::ALLOW_COMPACTION);
    bottom.create_and_build(&mut context).unwrap();

    let query = SizeQueryCoordinator::query_batch(
        &mut context,
        &[bottom.structure().unwrap()],
        QueryType::AccelerationStructureCompactedSize,
    )
    .unwrap();
    context.submit_and_wait().unwrap();
    let sizes = query.fetch(&context).unwrap();
    assert_eq!(sizes.len(), 1);
    assert!(sizes[0] > 0);
    assert!(sizes[0] <= bottom.structure().unwrap().size());

    let again = SizeQueryCoordinator::query_batch(
        &mut context,
        &[bottom.structure().unwrap()],
        QueryType::AccelerationStructureCompactedSize,
    )
    .unwrap();
    context.submit_and_wait().unwrap();
    assert_eq!(again.fetch(&context).unwrap(), sizes);

    let mut compacted = BottomLevelStructure::new();
    compacted.set_build_type(gpu);
    compacted.create_and_copy_from(&mut context, &bottom, Some(sizes[0])).unwrap();
    assert_eq!(compacted.structure().unwrap().size(), sizes[0]);
    assert_eq!(compacted.state(), StructureState::Ready(BuildOrigin::Compacted));

    let mut top = single_instance_top(gpu);
    top.create_and_build(&mut context, &[&compacted]).unwrap();
    assert_eq!(trace_center(&mut context, &top), RayQueryHit::Triangle);
}

#[test]
fn device_queries_are_not_ready_before_submission() {
    let device = GPUDevice::new(&DeviceConfig::default());
    let mut context = device.create_context();
    let mut bottom = quad_bottom(AccelerationStructureBuildType::Device, BuildAccelerationStructureFlags::empty());
    bottom.create_and_build(&mut context).unwrap();

    let query = SizeQueryCoordinator::query_batch(
        &mut context,
        &[bottom.structure().unwrap()],
        QueryType::AccelerationStructureSerializationSize,
    )
    .unwrap();
    assert_eq!(query.fetch(&context).unwrap_err(), Error::QueryNotReady);

    context.submit_and_wait().unwrap();
    let first = query.fetch(&context).unwrap();
    let second = query.fetch(&context).unwrap();
    assert_eq!(first, second);
    assert!(first[0] > 0);
}

#[test]
fn batched_sizes_follow_the_structure_order() {
    for build_type in [AccelerationStructureBuildType::Host, AccelerationStructureBuildType::Device] {
        for query_type in [
            QueryType::AccelerationStructureCompactedSize,
            QueryType::AccelerationStructureSerializationSize,
        ] {
            let device = GPUDevice::new(&DeviceConfig::default());
            let mut context = device.create_context();
            let mut bottoms: Vec<BottomLevelStructure> = [9, 1, 4].into_iter().map(|quads| quad_row_bottom(build_type, quads)).collect();
            for bottom in &mut bottoms {
                bottom.create_and_build(&mut context).unwrap();
            }
            let structures: Vec<_> = bottoms.iter().map(|bottom| bottom.structure().unwrap()).collect();

            let batch = SizeQueryCoordinator::query_batch(&mut context, &structures, query_type).unwrap();
            let singles: Vec<_> = structures
                .iter()
                .map(|structure| SizeQueryCoordinator::query_batch(&mut context, &[*structure], query_type).unwrap())
                .collect();
            context.submit_and_wait().unwrap();

            let sizes = batch.fetch(&context).unwrap();
            assert_eq!(sizes.len(), 3);
            for (index, single) in singles.iter().enumerate() {
                assert_eq!(single.fetch(&context).unwrap().as_slice(), &[sizes[index]]);
            }
            if query_type == QueryType::AccelerationStructureSerializationSize {
                assert!(sizes[1] < sizes[2] && sizes[2] < sizes[0], "{:?}", sizes);
            }
        }
    }
}

#[test]
fn serialized_bottoms_deserialize_with_worker_threads() {
    let device = GPUDevice::new(&DeviceConfig::default());
    let mut context = device.create_context();
    let host = AccelerationStructureBuildType::Host;
    let deferred = Some(DeferredSettings { worker_threads: 4 });

    let mut bottom = quad_bottom(host, BuildAccelerationStructureFlags::empty());
    bottom.create_and_build(&mut context).unwrap();
    let sizes = SizeQueryCoordinator::query_batch(
        &mut context,
        &[bottom.structure().unwrap()],
        QueryType::AccelerationStructureSerializationSize,
    )
    .unwrap()
    .fetch(&context)
    .unwrap();

    let storage = SerialStorage::new(&context, sizes[0]).unwrap();
    bottom.set_deferred_operation(deferred);
    bottom.serialize(&mut context, &storage).unwrap();
    let header = storage.header().unwrap();
    assert_eq!(header.handle_count, 0);
    assert_eq!(header.serialized_size, sizes[0]);

    let mut deserialized = BottomLevelStructure::new();
    deserialized.set_build_type(host);
    deserialized.set_deferred_operation(deferred);
    deserialized.create_and_deserialize_from(&mut context, &storage).unwrap();
    assert_eq!(deserialized.state(), StructureState::Ready(BuildOrigin::Deserialized));

    let mut top = single_instance_top(host);
    top.create_and_build(&mut context, &[&deserialized]).unwrap();
    assert_eq!(trace_center(&mut context, &top), RayQueryHit::Triangle);
}

fn threaded_copy_payload(worker_threads: u32) -> Vec<u8> {
    let device = GPUDevice::new(&DeviceConfig::default());
    let mut context = device.create_context();
    let host = AccelerationStructureBuildType::Host;
    let deferred = Some(DeferredSettings { worker_threads });

    let mut bottom = quad_row_bottom(host, 24);
    bottom.set_deferred_operation(deferred);
    bottom.create_and_build(&mut context).unwrap();
    let mut copy = BottomLevelStructure::new();
    copy.set_build_type(host);
    copy.set_deferred_operation(deferred);
    copy.create_and_copy_from(&mut context, &bottom, None).unwrap();

    let sizes = SizeQueryCoordinator::query_batch(
        &mut context,
        &[copy.structure().unwrap()],
        QueryType::AccelerationStructureSerializationSize,
    )
    .unwrap()
    .fetch(&context)
    .unwrap();
    let storage = SerialStorage::new(&context, sizes[0]).unwrap();
    copy.serialize(&mut context, &storage).unwrap();
    let bytes = storage.bytes().unwrap();
    bytes[SerializedHeader::SIZE as usize..].to_vec()
}

#[test]
fn threaded_builds_and_copies_match_single_threaded_ones() {
    let single = threaded_copy_payload(0);
    assert!(!single.is_empty());
    for worker_threads in [2, 8, u32::MAX] {
        assert!(threaded_copy_payload(worker_threads) == single, "{} worker threads", worker_threads);
    }
}

#[test]
fn relocation_tables_must_cover_every_instance() {
    let device = GPUDevice::new(&DeviceConfig::default());
    let mut context = device.create_context();
    let host = AccelerationStructureBuildType::Host;

    let mut bottom = quad_bottom(host, BuildAccelerationStructureFlags::empty());
    bottom.create_and_build(&mut context).unwrap();
    let mut top = single_instance_top(host);
    top.create_and_build(&mut context, &[&bottom]).unwrap();

    let sizes = SizeQueryCoordinator::query_batch(
        &mut context,
        &[top.structure().unwrap()],
        QueryType::AccelerationStructureSerializationSize,
    )
    .unwrap()
    .fetch(&context)
    .unwrap();
    let mut storage = SerialStorage::new(&context, sizes[0]).unwrap();
    top.serialize(&mut context, &storage).unwrap();

    let address = bottom.device_address().unwrap();
    assert_eq!(storage.handles().unwrap(), vec![(0, address)]);
    assert!(matches!(storage.remap(&[]), Err(Error::IncompatibleSerialFormat(_))));
    assert!(matches!(storage.remap(&[address, address]), Err(Error::IncompatibleSerialFormat(_))));

    let table = top.relocation_table(&[&bottom]).unwrap();
    assert_eq!(table, vec![address]);
    let mut deserialized = TopLevelStructure::new();
    deserialized.set_build_type(host);
    deserialized
        .create_and_deserialize_relocated(&mut context, &mut storage, &table)
        .unwrap();
    assert_eq!(trace_center(&mut context, &deserialized), RayQueryHit::Triangle);
}

#[test]
fn foreign_serialized_data_is_rejected() {
    let host = AccelerationStructureBuildType::Host;
    let bytes = {
        let device = GPUDevice::new(&DeviceConfig::default());
        let mut context = device.create_context();
        let mut bottom = quad_bottom(host, BuildAccelerationStructureFlags::empty());
        bottom.create_and_build(&mut context).unwrap();
        let sizes = SizeQueryCoordinator::query_batch(
            &mut context,
            &[bottom.structure().unwrap()],
            QueryType::AccelerationStructureSerializationSize,
        )
        .unwrap()
        .fetch(&context)
        .unwrap();
        let storage = SerialStorage::new(&context, sizes[0]).unwrap();
        bottom.serialize(&mut context, &storage).unwrap();
        storage.bytes().unwrap()
    };

    let same = GPUDevice::new(&DeviceConfig::default());
    let same_context = same.create_context();
    let storage = SerialStorage::from_bytes(&same_context, &bytes).unwrap();
    assert!(same.is_compatible(&storage.header().unwrap()));
    drop(same_context);

    let config = DeviceConfig {
        compatibility_uuid: *b"other-image-v2\0\0",
        ..Default::default()
    };
    let other = GPUDevice::new(&config);
    let mut context = other.create_context();
    let storage = SerialStorage::from_bytes(&context, &bytes).unwrap();
    assert!(!other.is_compatible(&storage.header().unwrap()));

    let mut deserialized = BottomLevelStructure::new();
    deserialized.set_build_type(host);
    let result = deserialized.create_and_deserialize_from(&mut context, &storage);
    assert!(matches!(result, Err(Error::IncompatibleSerialFormat(_))));
    assert_eq!(deserialized.state(), StructureState::Empty);
}

#[test]
fn indexed_and_plain_quads_agree() {
    let device = GPUDevice::new(&DeviceConfig::default());
    let mut context = device.create_context();
    let host = AccelerationStructureBuildType::Host;

    let plain = quad_bottom(host, BuildAccelerationStructureFlags::empty());
    let mut geometry = GeometryDescriptor::triangles(VertexFormat::R32G32B32Float, Some(IndexFormat::U16));
    for vertex in [QUAD[0], QUAD[1], QUAD[2], QUAD[5]] {
        geometry.add_vertex(Vec3::from_array(vertex));
    }
    for index in [0, 1, 2, 2, 1, 3] {
        geometry.add_index(index);
    }
    let mut indexed = BottomLevelStructure::new();
    indexed.set_build_type(host);
    indexed.add_geometry(geometry);

    let rays = [
        down_ray(0.25f32, 0.75f32),
        down_ray(0.75f32, 0.25f32),
        down_ray(0.5f32, 0.5f32),
        down_ray(1.5f32, 0.5f32),
    ];
    let mut results = Vec::new();
    for mut bottom in [plain, indexed] {
        bottom.create_and_build(&mut context).unwrap();
        let mut top = single_instance_top(host);
        top.create_and_build(&mut context, &[&bottom]).unwrap();
        results.push(trace_ray_queries(&mut context, &top, &rays, RayFlags::empty(), 0xFF).unwrap());
    }
    assert_eq!(
        results[0],
        vec![RayQueryHit::Triangle, RayQueryHit::Triangle, RayQueryHit::Triangle, RayQueryHit::Miss]
    );
    assert_eq!(results[0], results[1]);
}

#[test]
fn structures_without_primitives_miss() {
    let device = GPUDevice::new(&DeviceConfig::default());
    let mut context = device.create_context();
    let gpu = AccelerationStructureBuildType::Device;

    let mut bottom = quad_bottom(gpu, BuildAccelerationStructureFlags::empty());
    bottom.set_build_without_primitives(true);
    bottom.create_and_build(&mut context).unwrap();
    let mut top = single_instance_top(gpu);
    top.create_and_build(&mut context, &[&bottom]).unwrap();
    assert_eq!(trace_center(&mut context, &top), RayQueryHit::Miss);

    let mut empty_top = single_instance_top(gpu);
    empty_top.set_build_without_primitives(true);
    let mut full_bottom = quad_bottom(gpu, BuildAccelerationStructureFlags::empty());
    full_bottom.create_and_build(&mut context).unwrap();
    empty_top.create_and_build(&mut context, &[&full_bottom]).unwrap();
    assert_eq!(trace_center(&mut context, &empty_top), RayQueryHit::Miss);
}

#[test]
fn malformed_geometry_is_rejected_before_building() {
    let device = GPUDevice::new(&DeviceConfig::default());
    let mut context = device.create_context();
    let mut geometry = GeometryDescriptor::triangles(VertexFormat::R32G32B32Float, None);
    for vertex in &QUAD[..4] {
        geometry.add_vertex(Vec3::from_array(*vertex));
    }
    let mut bottom = BottomLevelStructure::new();
    bottom.add_geometry(geometry);
    assert!(matches!(bottom.create_and_build(&mut context), Err(Error::InvalidGeometry(_))));
    assert_eq!(bottom.state(), StructureState::Empty);
    assert!(matches!(bottom.structure(), Err(Error::NotBuilt(_))));
}
