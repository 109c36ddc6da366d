use std::fmt::{
    Debug,
    Formatter,
};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use log::debug;
use serde::{
    Deserialize,
    Serialize,
};

use super::gpu::{
    AccelerationStructure as _,
    AccelerationStructureBuildType,
    AccelerationStructureCompatibility,
    AccelerationStructureType,
    BufferInfo,
    BufferUsage,
    BuildAccelerationStructureFlags,
    CommandBuffer as _,
    CopyMode,
    Device as _,
};
use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureLevel {
    Bottom,
    Top,
}

impl StructureLevel {
    fn structure_type(self, create_generic: bool) -> AccelerationStructureType {
        match (self, create_generic) {
            (_, true) => AccelerationStructureType::Generic,
            (StructureLevel::Bottom, false) => AccelerationStructureType::BottomLevel,
            (StructureLevel::Top, false) => AccelerationStructureType::TopLevel,
        }
    }
}

/// How the current contents of a structure came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildOrigin {
    Built,
    Copied,
    Compacted,
    Deserialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureState {
    Empty,
    Ready(BuildOrigin),
}

/// Creation and build parameters shared by bottom and top level structures.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureSettings {
    pub build_type: AccelerationStructureBuildType,
    pub flags: BuildAccelerationStructureFlags,
    pub create_generic: bool,
    pub array_of_pointers: bool,
    pub deferred: Option<DeferredSettings>,
}

impl Default for StructureSettings {
    fn default() -> Self {
        Self {
            build_type: AccelerationStructureBuildType::Device,
            flags: BuildAccelerationStructureFlags::empty(),
            create_generic: false,
            array_of_pointers: false,
            deferred: None,
        }
    }
}

impl StructureSettings {
    /// Deferred operations only exist for host commands.
    fn host_deferred(&self) -> Option<DeferredSettings> {
        match self.build_type {
            AccelerationStructureBuildType::Host => self.deferred,
            AccelerationStructureBuildType::Device => None,
        }
    }
}

pub struct AccelerationStructure {
    acceleration_structure: ManuallyDrop<active_gpu_backend::AccelerationStructure>,
    buffer: Buffer,
    destroyer: Arc<DeferredDestroyer>,
    level: StructureLevel,
    build_type: AccelerationStructureBuildType,
    built_flags: BuildAccelerationStructureFlags,
    origin: BuildOrigin,
}

impl Debug for AccelerationStructure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(AccelerationStructure: {:?} level at {:#x} ({} bytes, {:?}, {:?}))",
            self.level,
            self.device_address(),
            self.size(),
            self.build_type,
            self.origin
        )
    }
}

impl AccelerationStructure {
    #[inline(always)]
    pub(super) fn handle(&self) -> &active_gpu_backend::AccelerationStructure {
        &self.acceleration_structure
    }

    pub fn size(&self) -> u64 {
        self.acceleration_structure.size()
    }

    pub fn device_address(&self) -> u64 {
        self.acceleration_structure.device_address()
    }

    pub fn level(&self) -> StructureLevel {
        self.level
    }

    pub fn structure_type(&self) -> AccelerationStructureType {
        self.acceleration_structure.ty()
    }

    pub fn build_type(&self) -> AccelerationStructureBuildType {
        self.build_type
    }

    /// Flags of the build that produced the data, copies inherit them from their source.
    pub fn built_flags(&self) -> BuildAccelerationStructureFlags {
        self.built_flags
    }

    pub fn origin(&self) -> BuildOrigin {
        self.origin
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        let acceleration_structure = unsafe { ManuallyDrop::take(&mut self.acceleration_structure) };
        self.destroyer.destroy_acceleration_structure(acceleration_structure);
    }
}

fn allocate(
    context: &ExecutionContext,
    level: StructureLevel,
    settings: &StructureSettings,
    size: u64,
    built_flags: BuildAccelerationStructureFlags,
    origin: BuildOrigin,
    name: &str,
) -> Result<AccelerationStructure> {
    let buffer = context.create_buffer(
        &BufferInfo {
            size,
            usage: BufferUsage::ACCELERATION_STRUCTURE | BufferUsage::SHADER_DEVICE_ADDRESS,
            memory_kind: settings.build_type.memory_kind(),
        },
        Some(name),
    )?;
    let acceleration_structure = unsafe {
        context.device().create_acceleration_structure(
            &active_gpu_backend::AccelerationStructureInfo {
                ty: level.structure_type(settings.create_generic),
                buffer: buffer.handle(),
                offset: 0,
                size,
            },
            Some(name),
        )?
    };
    Ok(AccelerationStructure {
        acceleration_structure: ManuallyDrop::new(acceleration_structure),
        buffer,
        destroyer: context.destroyer().clone(),
        level,
        build_type: settings.build_type,
        built_flags,
        origin,
    })
}

pub(super) fn build(
    context: &mut ExecutionContext,
    level: StructureLevel,
    settings: &StructureSettings,
    inputs: active_gpu_backend::AccelerationStructureInputs,
    name: &str,
) -> Result<AccelerationStructure> {
    let sizes = unsafe {
        context
            .device()
            .get_acceleration_structure_build_sizes(settings.build_type, &inputs, settings.flags)
    };
    debug!(
        "Building {:?} level structure {:?} on the {:?}: {} bytes, {} bytes of scratch",
        level, name, settings.build_type, sizes.size, sizes.build_scratch_size
    );
    let structure = allocate(context, level, settings, sizes.size, settings.flags, BuildOrigin::Built, name)?;
    let scratch = context.create_buffer(
        &BufferInfo {
            size: sizes.build_scratch_size,
            usage: BufferUsage::ACCELERATION_STRUCTURE_SCRATCH | BufferUsage::STORAGE | BufferUsage::SHADER_DEVICE_ADDRESS,
            memory_kind: settings.build_type.memory_kind(),
        },
        Some("AccelerationStructureScratch"),
    )?;
    let info = active_gpu_backend::AccelerationStructureBuildInfo {
        inputs,
        flags: settings.flags,
        dst: structure.handle(),
        scratch: scratch.handle(),
        scratch_offset: 0,
    };

    match settings.build_type {
        AccelerationStructureBuildType::Host => {
            let device = context.device();
            execute_host_operation(device, settings.host_deferred(), |operation| unsafe {
                device.build_acceleration_structures(operation, &[info])
            })?;
        }
        AccelerationStructureBuildType::Device => {
            context.record(|command_buffer| unsafe {
                command_buffer.build_acceleration_structures(&[info]);
            });
            context.record_structure_barrier();
        }
    }
    Ok(structure)
}

/// Copies `src` into a new structure. With `compacted_size` the copy is a compaction into
/// a structure of exactly that size, otherwise the copy has the size of the source.
pub(super) fn copy(
    context: &mut ExecutionContext,
    src: &AccelerationStructure,
    settings: &StructureSettings,
    compacted_size: Option<u64>,
    name: &str,
) -> Result<AccelerationStructure> {
    let (mode, size, origin) = match compacted_size {
        Some(size) => {
            if !src.built_flags().contains(BuildAccelerationStructureFlags::ALLOW_COMPACTION) {
                return Err(Error::IncompatibleFlags(format!(
                    "{:?} was built without ALLOW_COMPACTION and cannot be compacted",
                    src
                )));
            }
            (CopyMode::Compact, size, BuildOrigin::Compacted)
        }
        None => (CopyMode::Clone, src.size(), BuildOrigin::Copied),
    };
    let structure = allocate(context, src.level(), settings, size, src.built_flags(), origin, name)?;
    debug!("Copying {:?} into {:?} ({:?})", src, structure, mode);

    match settings.build_type {
        AccelerationStructureBuildType::Host => {
            let device = context.device();
            execute_host_operation(device, settings.host_deferred(), |operation| unsafe {
                device.copy_acceleration_structure(operation, src.handle(), structure.handle(), mode)
            })?;
        }
        AccelerationStructureBuildType::Device => {
            context.record(|command_buffer| unsafe {
                command_buffer.copy_acceleration_structure(src.handle(), structure.handle(), mode);
            });
            context.record_structure_barrier();
        }
    }
    Ok(structure)
}

/// Writes the serialized form of `src` to the start of `storage`. Device serialization only
/// lands in the storage once the context was submitted.
pub(super) fn serialize(
    context: &mut ExecutionContext,
    src: &AccelerationStructure,
    settings: &StructureSettings,
    storage: &SerialStorage,
) -> Result<()> {
    debug!("Serializing {:?} into {} bytes of storage", src, storage.size());
    match src.build_type() {
        AccelerationStructureBuildType::Host => {
            let device = context.device();
            execute_host_operation(device, settings.host_deferred(), |operation| unsafe {
                device.copy_acceleration_structure_to_memory(operation, src.handle(), storage.handle(), 0)
            })?;
        }
        AccelerationStructureBuildType::Device => {
            context.record(|command_buffer| unsafe {
                command_buffer.copy_acceleration_structure_to_memory(src.handle(), storage.handle(), 0);
            });
        }
    }
    Ok(())
}

/// Creates a structure from serialized data. Incompatible data is rejected before any
/// device work is issued.
pub(super) fn deserialize(
    context: &mut ExecutionContext,
    level: StructureLevel,
    settings: &StructureSettings,
    storage: &SerialStorage,
    name: &str,
) -> Result<AccelerationStructure> {
    let header = storage.header()?;
    if context.device().acceleration_structure_compatibility(&header) != AccelerationStructureCompatibility::Compatible {
        return Err(Error::IncompatibleSerialFormat(format!(
            "driver {:02x?} / compatibility {:02x?} is not accepted by this device",
            header.driver_uuid, header.compatibility_uuid
        )));
    }
    let structure = allocate(
        context,
        level,
        settings,
        header.deserialized_size,
        settings.flags,
        BuildOrigin::Deserialized,
        name,
    )?;
    debug!("Deserializing {} handles into {:?}", header.handle_count, structure);

    match settings.build_type {
        AccelerationStructureBuildType::Host => {
            let device = context.device();
            execute_host_operation(device, settings.host_deferred(), |operation| unsafe {
                device.copy_memory_to_acceleration_structure(operation, storage.handle(), 0, structure.handle())
            })?;
        }
        AccelerationStructureBuildType::Device => {
            context.record(|command_buffer| unsafe {
                command_buffer.copy_memory_to_acceleration_structure(storage.handle(), 0, structure.handle());
            });
            context.record_structure_barrier();
        }
    }
    Ok(structure)
}
