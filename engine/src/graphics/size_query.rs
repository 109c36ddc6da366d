use std::mem::ManuallyDrop;
use std::sync::Arc;

use log::trace;
use smallvec::SmallVec;

use super::gpu::{
    AccelerationStructureBuildType,
    BuildAccelerationStructureFlags,
    CommandBuffer as _,
    Device as _,
    QueryPool as _,
    QueryType,
};
use super::*;

pub type SizeQueryResults = SmallVec<[u64; 4]>;

struct QueryPool {
    pool: ManuallyDrop<active_gpu_backend::QueryPool>,
    destroyer: Arc<DeferredDestroyer>,
}

impl Drop for QueryPool {
    fn drop(&mut self) {
        let pool = unsafe { ManuallyDrop::take(&mut self.pool) };
        self.destroyer.destroy_query_pool(pool);
    }
}

enum PendingResults {
    Resolved(SizeQueryResults),
    Pool {
        pool: QueryPool,
        count: u32,
        submission: u64,
    },
}

/// Sizes of a batch of structures. Host queries resolve immediately, device queries once
/// the submission that wrote them completed.
pub struct SizeQuery {
    query_type: QueryType,
    results: PendingResults,
}

impl SizeQuery {
    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn fetch(&self, context: &ExecutionContext) -> Result<SizeQueryResults> {
        match &self.results {
            PendingResults::Resolved(values) => Ok(values.clone()),
            PendingResults::Pool { pool, count, submission } => {
                if context.completed_submission() < *submission {
                    return Err(Error::QueryNotReady);
                }
                let mut values: SizeQueryResults = SmallVec::from_elem(0u64, *count as usize);
                pool.pool.get_results(0, &mut values)?;
                Ok(values)
            }
        }
    }
}

pub struct SizeQueryCoordinator;

impl SizeQueryCoordinator {
    /// All structures of a batch must share one build type.
    pub fn query_batch(
        context: &mut ExecutionContext,
        structures: &[&AccelerationStructure],
        query_type: QueryType,
    ) -> Result<SizeQuery> {
        let Some(first) = structures.first() else {
            return Ok(SizeQuery {
                query_type,
                results: PendingResults::Resolved(SmallVec::new()),
            });
        };
        let build_type = first.build_type();
        if let Some(mixed) = structures.iter().find(|structure| structure.build_type() != build_type) {
            return Err(Error::IncompatibleFlags(format!(
                "{:?} cannot be queried in a batch of {:?} built structures",
                mixed, build_type
            )));
        }
        if query_type == QueryType::AccelerationStructureCompactedSize {
            if let Some(structure) = structures
                .iter()
                .find(|structure| !structure.built_flags().contains(BuildAccelerationStructureFlags::ALLOW_COMPACTION))
            {
                return Err(Error::IncompatibleFlags(format!(
                    "{:?} was built without ALLOW_COMPACTION",
                    structure
                )));
            }
        }

        let handles: SmallVec<[&active_gpu_backend::AccelerationStructure; 4]> =
            structures.iter().map(|structure| structure.handle()).collect();
        let count = handles.len() as u32;
        trace!("Querying {:?} of {} structures on the {:?}", query_type, count, build_type);

        let results = match build_type {
            AccelerationStructureBuildType::Host => {
                let mut values: SizeQueryResults = SmallVec::from_elem(0u64, handles.len());
                unsafe {
                    context
                        .device()
                        .write_acceleration_structures_properties(&handles, query_type, &mut values)?;
                }
                PendingResults::Resolved(values)
            }
            AccelerationStructureBuildType::Device => {
                let pool = QueryPool {
                    pool: ManuallyDrop::new(unsafe { context.device().create_query_pool(query_type, count) }),
                    destroyer: context.destroyer().clone(),
                };
                context.record(|command_buffer| unsafe {
                    command_buffer.reset_query_pool(&pool.pool, 0, count);
                    command_buffer.write_acceleration_structures_properties(&handles, &pool.pool, 0);
                });
                PendingResults::Pool {
                    pool,
                    count,
                    submission: context.current_submission(),
                }
            }
        };
        Ok(SizeQuery { query_type, results })
    }
}
