use raycts_core::gpu::{
    AccelerationStructureBuildInfo,
    BackendError,
    Barrier,
    CommandBuffer,
    CopyMode,
    QueryPool,
    RayQueryDispatchInfo,
};

use crate::deferred::HostTask;
use crate::geometry::BuildJob;
use crate::trace::TraceJob;
use crate::{
    ops,
    SoftAccelerationStructure,
    SoftBackend,
    SoftBuffer,
    SoftQueryPool,
    SoftShared,
};

/// Recorded command. Everything is captured by value so the queue thread can execute it
/// after the recording call returned.
#[derive(Clone)]
pub(crate) enum Command {
    BeginLabel(String),
    EndLabel,
    Barrier(Vec<Barrier>),
    Build(Vec<BuildJob>),
    Copy {
        src: SoftAccelerationStructure,
        dst: SoftAccelerationStructure,
        mode: CopyMode,
    },
    CopyToMemory {
        src: SoftAccelerationStructure,
        dst: SoftBuffer,
        dst_offset: u64,
    },
    CopyFromMemory {
        src: SoftBuffer,
        src_offset: u64,
        dst: SoftAccelerationStructure,
    },
    ResetQueries {
        pool: SoftQueryPool,
        first: u32,
        count: u32,
    },
    WriteProperties {
        structures: Vec<SoftAccelerationStructure>,
        pool: SoftQueryPool,
        first: u32,
    },
    TraceRays(TraceJob),
    /// Recording failed, executing reports the error.
    Invalid(BackendError),
}

pub(crate) fn execute(shared: &std::sync::Arc<SoftShared>, command: &Command) -> Result<(), BackendError> {
    match command {
        Command::BeginLabel(label) => {
            log::trace!("Begin label {}", label);
            Ok(())
        }
        Command::EndLabel => Ok(()),
        // Commands execute in record order on a single thread.
        Command::Barrier(_) => Ok(()),
        Command::Build(jobs) => {
            let mut tasks = Vec::with_capacity(jobs.len());
            for job in jobs {
                tasks.push(ops::build_task(shared, job.clone())?);
            }
            HostTask::merge(tasks).run()
        }
        Command::Copy { src, dst, mode } => ops::copy_task(src, dst, *mode)?.run(),
        Command::CopyToMemory { src, dst, dst_offset } => ops::serialize_task(shared, src, dst, *dst_offset).run(),
        Command::CopyFromMemory { src, src_offset, dst } => ops::deserialize_task(shared, src, *src_offset, dst).run(),
        Command::ResetQueries { pool, first, count } => pool.reset_range(*first, *count),
        Command::WriteProperties { structures, pool, first } => {
            let values = ops::properties(structures, pool.query_type())?;
            pool.write(*first, &values)
        }
        Command::TraceRays(job) => job.execute(shared),
        Command::Invalid(error) => Err(error.clone()),
    }
}

pub struct SoftCommandBuffer {
    commands: Vec<Command>,
    recording: bool,
}

impl SoftCommandBuffer {
    pub(crate) fn new() -> Self {
        Self {
            commands: Vec::new(),
            recording: false,
        }
    }

    pub(crate) fn commands(&self) -> &[Command] {
        &self.commands
    }

    fn push(&mut self, command: Command) {
        if !self.recording {
            log::warn!("Recording into a command buffer that was not begun");
        }
        self.commands.push(command);
    }
}

impl CommandBuffer<SoftBackend> for SoftCommandBuffer {
    unsafe fn begin(&mut self) {
        self.commands.clear();
        self.recording = true;
    }

    unsafe fn finish(&mut self) {
        self.recording = false;
    }

    unsafe fn reset(&mut self) {
        self.commands.clear();
        self.recording = false;
    }

    unsafe fn begin_label(&mut self, label: &str) {
        self.push(Command::BeginLabel(label.to_string()));
    }

    unsafe fn end_label(&mut self) {
        self.push(Command::EndLabel);
    }

    unsafe fn barrier(&mut self, barriers: &[Barrier]) {
        self.push(Command::Barrier(barriers.to_vec()));
    }

    unsafe fn build_acceleration_structures(&mut self, infos: &[AccelerationStructureBuildInfo<SoftBackend>]) {
        let jobs: Result<Vec<BuildJob>, BackendError> = infos.iter().map(BuildJob::from_info).collect();
        match jobs {
            Ok(jobs) => self.push(Command::Build(jobs)),
            Err(error) => self.push(Command::Invalid(error)),
        }
    }

    unsafe fn copy_acceleration_structure(&mut self, src: &SoftAccelerationStructure, dst: &SoftAccelerationStructure, mode: CopyMode) {
        self.push(Command::Copy {
            src: src.clone(),
            dst: dst.clone(),
            mode,
        });
    }

    unsafe fn copy_acceleration_structure_to_memory(&mut self, src: &SoftAccelerationStructure, dst: &SoftBuffer, dst_offset: u64) {
        self.push(Command::CopyToMemory {
            src: src.clone(),
            dst: dst.clone(),
            dst_offset,
        });
    }

    unsafe fn copy_memory_to_acceleration_structure(&mut self, src: &SoftBuffer, src_offset: u64, dst: &SoftAccelerationStructure) {
        self.push(Command::CopyFromMemory {
            src: src.clone(),
            src_offset,
            dst: dst.clone(),
        });
    }

    unsafe fn reset_query_pool(&mut self, query_pool: &SoftQueryPool, first_query: u32, query_count: u32) {
        self.push(Command::ResetQueries {
            pool: query_pool.clone(),
            first: first_query,
            count: query_count,
        });
    }

    unsafe fn write_acceleration_structures_properties(
        &mut self,
        acceleration_structures: &[&SoftAccelerationStructure],
        query_pool: &SoftQueryPool,
        first_query: u32,
    ) {
        self.push(Command::WriteProperties {
            structures: acceleration_structures.iter().map(|structure| (*structure).clone()).collect(),
            pool: query_pool.clone(),
            first: first_query,
        });
    }

    unsafe fn trace_ray_queries(&mut self, info: &RayQueryDispatchInfo<SoftBackend>) {
        self.push(Command::TraceRays(TraceJob {
            structure: info.acceleration_structure.clone(),
            ray_flags: info.ray_flags,
            cull_mask: info.cull_mask,
            rays: info.rays.clone(),
            rays_offset: info.rays_offset,
            results: info.results.clone(),
            results_offset: info.results_offset,
            ray_count: info.ray_count,
        }));
    }
}
