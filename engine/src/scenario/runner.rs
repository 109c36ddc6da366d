use crossbeam_channel::unbounded;
use log::{
    debug,
    error,
};
use smallvec::{
    smallvec,
    SmallVec,
};

use crate::graphics::gpu::{
    AccelerationStructureBuildType,
    QueryType,
    RayQueryHit,
};
use crate::graphics::{
    self,
    trace_ray_queries,
    AccelerationStructure,
    BottomLevelStructure,
    DeferredSettings,
    DeviceConfig,
    ExecutionContext,
    GPUDevice,
    SerialStorage,
    SizeQueryCoordinator,
    SizeQueryResults,
    TopLevelStructure,
};

use super::*;

/// Runs checkerboard scenarios, each pass on a device of its own.
pub struct ScenarioRunner {
    config: DeviceConfig,
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self::new(DeviceConfig::default())
    }
}

impl ScenarioRunner {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    /// Scenarios with worker threads run twice, once finishing deferred operations on the
    /// calling thread and once with the requested thread count. Both passes must succeed.
    pub fn run(&self, params: &ScenarioParams) -> ScenarioOutcome {
        let name = params.name();
        let failure = match params.validate() {
            Err(error) => Some(ScenarioFailure::InvalidParams {
                message: error.to_string(),
            }),
            Ok(()) => {
                let passes: SmallVec<[u32; 2]> = if params.worker_threads == 0 {
                    smallvec![0]
                } else {
                    smallvec![0, params.worker_threads]
                };
                passes.into_iter().find_map(|worker_threads| self.check_pass(params, worker_threads))
            }
        };
        let outcome = ScenarioOutcome {
            name,
            params: params.clone(),
            failure,
        };
        outcome.log();
        outcome
    }

    /// Runs every scenario, `parallelism` at a time (0 picks the number of cores). Failed
    /// scenarios don't stop the batch.
    pub fn run_all(&self, scenarios: &[ScenarioParams], parallelism: usize) -> ScenarioReport {
        let parallelism = if parallelism > 0 { parallelism } else { num_cpus::get() };
        let parallelism = parallelism.min(scenarios.len()).max(1);
        debug!("Running {} scenarios on {} threads", scenarios.len(), parallelism);

        let (work_sender, work_receiver) = unbounded::<usize>();
        let (result_sender, result_receiver) = unbounded::<(usize, ScenarioOutcome)>();
        for index in 0..scenarios.len() {
            let _ = work_sender.send(index);
        }
        drop(work_sender);

        let scope_result = crossbeam_utils::thread::scope(|scope| {
            for _ in 0..parallelism {
                let work_receiver = work_receiver.clone();
                let result_sender = result_sender.clone();
                scope.spawn(move |_| {
                    for index in work_receiver.iter() {
                        let _ = result_sender.send((index, self.run(&scenarios[index])));
                    }
                });
            }
        });
        drop(result_sender);
        if scope_result.is_err() {
            error!("A scenario thread panicked");
        }

        let mut outcomes: Vec<Option<ScenarioOutcome>> = vec![None; scenarios.len()];
        for (index, outcome) in result_receiver.iter() {
            outcomes[index] = Some(outcome);
        }
        let mut report = ScenarioReport::default();
        for (outcome, params) in outcomes.into_iter().zip(scenarios) {
            report.push(outcome.unwrap_or_else(|| ScenarioOutcome {
                name: params.name(),
                params: params.clone(),
                failure: Some(ScenarioFailure::Error {
                    worker_threads: params.worker_threads,
                    message: "the scenario thread panicked".to_string(),
                }),
            }));
        }
        report.log_summary();
        report
    }

    fn check_pass(&self, params: &ScenarioParams, worker_threads: u32) -> Option<ScenarioFailure> {
        let scene = CheckerboardScene::new(params);
        let expected = scene.expected.clone();
        match self.run_pass(params, scene, worker_threads) {
            Err(error) => Some(ScenarioFailure::Error {
                worker_threads,
                message: error.to_string(),
            }),
            Ok(actual) => {
                let cells = compare_results(params.width, &expected, &actual);
                if cells.is_empty() {
                    None
                } else {
                    Some(ScenarioFailure::Mismatch { worker_threads, cells })
                }
            }
        }
    }

    /// Builds the scene, applies the operation to its target level and traces one ray per
    /// cell.
    pub fn run_pass(
        &self,
        params: &ScenarioParams,
        scene: CheckerboardScene,
        worker_threads: u32,
    ) -> graphics::Result<Vec<RayQueryHit>> {
        let device = GPUDevice::new(&self.config);
        let mut context = device.create_context();
        let deferred = (worker_threads != 0).then_some(DeferredSettings { worker_threads });
        let CheckerboardScene {
            bottoms: mut scene_bottoms,
            top: mut scene_top,
            rays,
            ray_flags,
            ..
        } = scene;
        debug!("Running {} with {} worker threads", params.name(), worker_threads);

        build_bottoms(&mut context, params, &mut scene_bottoms)?;

        let bottoms = if params.operation_target == OperationTarget::Bottom {
            operate_on_bottoms(&mut context, params, scene_bottoms, deferred)?
        } else {
            scene_bottoms
        };
        let bottom_refs: Vec<&BottomLevelStructure> = bottoms.iter().collect();

        build_top(&mut context, params, &mut scene_top, &bottom_refs)?;

        let top = if params.operation_target == OperationTarget::Top {
            operate_on_top(&mut context, params, &mut scene_top, &bottom_refs, deferred)?
        } else {
            scene_top
        };

        let hits = trace_ray_queries(&mut context, &top, &rays, ray_flags, RAY_CULL_MASK)?;
        device.status()?;
        Ok(hits)
    }
}

fn build_bottoms(
    context: &mut ExecutionContext,
    params: &ScenarioParams,
    bottoms: &mut [BottomLevelStructure],
) -> graphics::Result<()> {
    for bottom in bottoms {
        bottom.set_build_type(params.build_type);
        bottom.set_build_flags(params.bottom_build_flags());
        bottom.set_use_array_of_pointers(params.bottom_uses_aop);
        bottom.set_create_generic(params.bottom_generic);
        bottom.set_build_without_geometries(params.empty_case == EmptyCase::NoGeometriesBottom);
        bottom.set_build_without_primitives(params.empty_case == EmptyCase::NoPrimitivesBottom);
        bottom.create_and_build(context)?;
    }
    Ok(())
}

fn build_top(
    context: &mut ExecutionContext,
    params: &ScenarioParams,
    top: &mut TopLevelStructure,
    bottoms: &[&BottomLevelStructure],
) -> graphics::Result<()> {
    top.set_build_type(params.build_type);
    top.set_build_flags(params.top_build_flags());
    top.set_use_array_of_pointers(params.top_uses_aop);
    top.set_create_generic(params.top_generic);
    top.set_build_without_primitives(params.empty_case == EmptyCase::NoPrimitivesTop);
    top.set_inactive_instances(params.empty_case == EmptyCase::InactiveInstances);
    top.create_and_build(context, bottoms)
}

/// Deferral applies to the operation the scenario runs threaded, never to builds or
/// compactions.
fn operation_deferral(params: &ScenarioParams, operation: OperationType, deferred: Option<DeferredSettings>) -> Option<DeferredSettings> {
    if params.operation_type == operation {
        deferred
    } else {
        None
    }
}

fn query_sizes(
    context: &mut ExecutionContext,
    structures: &[&AccelerationStructure],
    query_type: QueryType,
) -> graphics::Result<SizeQueryResults> {
    let query = SizeQueryCoordinator::query_batch(context, structures, query_type)?;
    if context.has_pending_commands() {
        context.submit_and_wait()?;
    }
    query.fetch(context)
}

fn submit_device_work(context: &mut ExecutionContext, params: &ScenarioParams) -> graphics::Result<()> {
    if params.build_type == AccelerationStructureBuildType::Device {
        context.submit_and_wait()?;
    }
    Ok(())
}

fn operate_on_bottoms(
    context: &mut ExecutionContext,
    params: &ScenarioParams,
    mut sources: Vec<BottomLevelStructure>,
    deferred: Option<DeferredSettings>,
) -> graphics::Result<Vec<BottomLevelStructure>> {
    let new_bottom = |deferred: Option<DeferredSettings>| {
        let mut bottom = BottomLevelStructure::new();
        bottom.set_build_type(params.build_type);
        bottom.set_build_flags(params.build_flags);
        bottom.set_use_array_of_pointers(params.bottom_uses_aop);
        bottom.set_create_generic(params.bottom_generic);
        bottom.set_deferred_operation(deferred);
        bottom
    };
    let mut results = Vec::with_capacity(sources.len());

    match params.operation_type {
        OperationType::None => return Ok(sources),
        OperationType::Copy => {
            let deferred = operation_deferral(params, OperationType::Copy, deferred);
            for source in sources.iter() {
                let mut copy = new_bottom(deferred);
                copy.create_and_copy_from(context, source, None)?;
                results.push(copy);
            }
        }
        OperationType::Compaction => {
            let structures = sources
                .iter()
                .map(|source| source.structure())
                .collect::<graphics::Result<Vec<_>>>()?;
            let sizes = query_sizes(context, &structures, QueryType::AccelerationStructureCompactedSize)?;
            for (source, size) in sources.iter().zip(sizes) {
                let mut compacted = new_bottom(None);
                compacted.create_and_copy_from(context, source, Some(size))?;
                results.push(compacted);
            }
        }
        OperationType::Serialization => {
            let structures = sources
                .iter()
                .map(|source| source.structure())
                .collect::<graphics::Result<Vec<_>>>()?;
            let sizes = query_sizes(context, &structures, QueryType::AccelerationStructureSerializationSize)?;
            let deferred = operation_deferral(params, OperationType::Serialization, deferred);
            let mut storages = Vec::with_capacity(sources.len());
            for (source, size) in sources.iter_mut().zip(sizes) {
                let storage = SerialStorage::new(context, size)?;
                source.set_deferred_operation(deferred);
                source.serialize(context, &storage)?;
                storages.push(storage);
            }
            submit_device_work(context, params)?;
            for storage in &storages {
                let mut deserialized = new_bottom(deferred);
                deserialized.create_and_deserialize_from(context, storage)?;
                results.push(deserialized);
            }
        }
    }
    Ok(results)
}

fn operate_on_top(
    context: &mut ExecutionContext,
    params: &ScenarioParams,
    source: &mut TopLevelStructure,
    bottoms: &[&BottomLevelStructure],
    deferred: Option<DeferredSettings>,
) -> graphics::Result<TopLevelStructure> {
    let mut result = TopLevelStructure::new();
    result.set_build_type(params.build_type);
    result.set_build_flags(params.build_flags);
    result.set_use_array_of_pointers(params.top_uses_aop);
    result.set_create_generic(params.top_generic);

    match params.operation_type {
        OperationType::None => return Ok(std::mem::take(source)),
        OperationType::Copy => {
            result.set_deferred_operation(operation_deferral(params, OperationType::Copy, deferred));
            result.create_and_copy_from(context, source, None)?;
        }
        OperationType::Compaction => {
            let sizes = query_sizes(context, &[source.structure()?], QueryType::AccelerationStructureCompactedSize)?;
            let size = sizes.first().copied().unwrap_or_default();
            result.create_and_copy_from(context, source, Some(size))?;
        }
        OperationType::Serialization => {
            let sizes = query_sizes(context, &[source.structure()?], QueryType::AccelerationStructureSerializationSize)?;
            let size = sizes.first().copied().unwrap_or_default();
            let deferred = operation_deferral(params, OperationType::Serialization, deferred);
            let mut storage = SerialStorage::new(context, size)?;
            source.set_deferred_operation(deferred);
            source.serialize(context, &storage)?;
            submit_device_work(context, params)?;

            let table = source.relocation_table(bottoms)?;
            result.set_deferred_operation(deferred);
            result.create_and_deserialize_relocated(context, &mut storage, &table)?;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::graphics::gpu::AccelerationStructureType;

    #[test]
    fn default_scenario_passes() {
        let outcome = ScenarioRunner::default().run(&ScenarioParams::default());
        assert_eq!(outcome.failure, None);
    }

    #[test]
    fn invalid_params_fail_without_running() {
        let params = ScenarioParams {
            width: 0,
            ..Default::default()
        };
        let outcome = ScenarioRunner::default().run(&params);
        assert!(matches!(outcome.failure, Some(ScenarioFailure::InvalidParams { .. })));
    }

    #[test]
    fn batches_keep_their_order() {
        let scenarios = vec![
            ScenarioParams {
                build_type: AccelerationStructureBuildType::Host,
                ..Default::default()
            },
            ScenarioParams {
                width: 0,
                ..Default::default()
            },
            ScenarioParams {
                top_type: TopTestType::DifferentInstances,
                ..Default::default()
            },
        ];
        let report = ScenarioRunner::default().run_all(&scenarios, 2);
        assert_eq!(report.outcomes.len(), 3);
        for (outcome, params) in report.outcomes.iter().zip(&scenarios) {
            assert_eq!(&outcome.params, params);
        }
        assert_eq!(report.passed_count(), 2);
        assert!(!report.outcomes[1].passed());
    }

    #[test]
    fn transformed_structures_keep_the_creation_settings() {
        for operation_type in [OperationType::Copy, OperationType::Compaction, OperationType::Serialization] {
            for operation_target in [OperationTarget::Bottom, OperationTarget::Top] {
                let params = ScenarioParams {
                    build_type: AccelerationStructureBuildType::Host,
                    bottom_generic: true,
                    bottom_uses_aop: true,
                    top_generic: true,
                    top_uses_aop: true,
                    operation_target,
                    operation_type,
                    ..Default::default()
                };
                let device = GPUDevice::new(&DeviceConfig::default());
                let mut context = device.create_context();
                let CheckerboardScene { mut bottoms, mut top, .. } = CheckerboardScene::new(&params);
                build_bottoms(&mut context, &params, &mut bottoms).unwrap();
                let bottoms = if operation_target == OperationTarget::Bottom {
                    operate_on_bottoms(&mut context, &params, bottoms, None).unwrap()
                } else {
                    bottoms
                };
                for bottom in &bottoms {
                    assert_eq!(bottom.structure().unwrap().structure_type(), AccelerationStructureType::Generic);
                    assert!(bottom.settings().array_of_pointers);
                }

                let bottom_refs: Vec<&BottomLevelStructure> = bottoms.iter().collect();
                build_top(&mut context, &params, &mut top, &bottom_refs).unwrap();
                let top = if operation_target == OperationTarget::Top {
                    operate_on_top(&mut context, &params, &mut top, &bottom_refs, None).unwrap()
                } else {
                    top
                };
                assert_eq!(top.structure().unwrap().structure_type(), AccelerationStructureType::Generic);
                assert!(top.settings().array_of_pointers);
            }
        }
    }
}
