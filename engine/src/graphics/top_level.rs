use super::gpu::{
    AccelerationStructureBuildType,
    AccelerationStructureInputs,
    AccelerationStructureInstances,
    BufferUsage,
    BuildAccelerationStructureFlags,
    InstanceRecord,
};
use super::*;

/// Top level acceleration structure over instances of bottom level structures.
pub struct TopLevelStructure {
    settings: StructureSettings,
    instances: Vec<InstanceDescriptor>,
    inactive_instances: bool,
    build_without_primitives: bool,
    structure: Option<AccelerationStructure>,
}

impl Default for TopLevelStructure {
    fn default() -> Self {
        Self::new()
    }
}

impl TopLevelStructure {
    pub fn new() -> Self {
        Self {
            settings: StructureSettings::default(),
            instances: Vec::new(),
            inactive_instances: false,
            build_without_primitives: false,
            structure: None,
        }
    }

    pub fn set_build_type(&mut self, build_type: AccelerationStructureBuildType) {
        self.settings.build_type = build_type;
    }

    pub fn set_build_flags(&mut self, flags: BuildAccelerationStructureFlags) {
        self.settings.flags = flags;
    }

    pub fn set_create_generic(&mut self, create_generic: bool) {
        self.settings.create_generic = create_generic;
    }

    pub fn set_use_array_of_pointers(&mut self, array_of_pointers: bool) {
        self.settings.array_of_pointers = array_of_pointers;
    }

    /// Builds every instance with a null reference.
    pub fn set_inactive_instances(&mut self, inactive_instances: bool) {
        self.inactive_instances = inactive_instances;
    }

    /// Builds with an instance count of 0.
    pub fn set_build_without_primitives(&mut self, build_without_primitives: bool) {
        self.build_without_primitives = build_without_primitives;
    }

    pub fn set_deferred_operation(&mut self, deferred: Option<DeferredSettings>) {
        self.settings.deferred = deferred;
    }

    pub fn add_instance(&mut self, instance: InstanceDescriptor) {
        self.instances.push(instance);
    }

    pub fn instances(&self) -> &[InstanceDescriptor] {
        &self.instances
    }

    pub fn settings(&self) -> &StructureSettings {
        &self.settings
    }

    pub fn state(&self) -> StructureState {
        match &self.structure {
            Some(structure) => StructureState::Ready(structure.origin()),
            None => StructureState::Empty,
        }
    }

    pub fn structure(&self) -> Result<&AccelerationStructure> {
        self.structure
            .as_ref()
            .ok_or_else(|| Error::NotBuilt("top level structure".to_string()))
    }

    /// Device addresses the built instances reference, in instance order. Inactive
    /// instances reference 0.
    pub fn relocation_table(&self, bottoms: &[&BottomLevelStructure]) -> Result<Vec<u64>> {
        if self.build_without_primitives {
            return Ok(Vec::new());
        }
        self.instances
            .iter()
            .enumerate()
            .map(|(index, instance)| {
                if self.inactive_instances {
                    return Ok(0u64);
                }
                let bottom = bottoms.get(instance.bottom).ok_or_else(|| {
                    Error::InvalidInstance(format!(
                        "instance {} references bottom level structure {} of {}",
                        index,
                        instance.bottom,
                        bottoms.len()
                    ))
                })?;
                bottom.device_address().map_err(|_| {
                    Error::InvalidInstance(format!(
                        "instance {} references bottom level structure {} which has not been built",
                        index, instance.bottom
                    ))
                })
            })
            .collect()
    }

    pub fn create_and_build(&mut self, context: &mut ExecutionContext, bottoms: &[&BottomLevelStructure]) -> Result<()> {
        let references = if self.build_without_primitives {
            vec![0u64; self.instances.len()]
        } else {
            self.relocation_table(bottoms)?
        };
        let records = self
            .instances
            .iter()
            .zip(&references)
            .map(|(instance, reference)| instance.to_record(*reference))
            .collect::<Result<Vec<InstanceRecord>>>()?;

        let instance_buffer = context.create_buffer_with_data(
            bytemuck::cast_slice(&records),
            BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT,
            Some("TopLevelInstances"),
        )?;
        let pointer_buffer = if self.settings.array_of_pointers {
            let pointers: Vec<u64> = (0..records.len() as u64)
                .map(|index| instance_buffer.va() + index * InstanceRecord::SIZE)
                .collect();
            Some(context.create_buffer_with_data(
                bytemuck::cast_slice(&pointers),
                BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT,
                Some("TopLevelInstancePointers"),
            )?)
        } else {
            None
        };

        let count = if self.build_without_primitives { 0 } else { records.len() as u32 };
        let instances = AccelerationStructureInstances {
            buffer: pointer_buffer.as_ref().unwrap_or(&instance_buffer).handle(),
            offset: 0,
            count,
            array_of_pointers: pointer_buffer.is_some(),
        };
        let structure = super::structure::build(
            context,
            StructureLevel::Top,
            &self.settings,
            AccelerationStructureInputs::TopLevel(instances),
            "TopLevelStructure",
        )?;
        self.structure = Some(structure);
        Ok(())
    }

    pub fn create_and_copy_from(
        &mut self,
        context: &mut ExecutionContext,
        src: &TopLevelStructure,
        compacted_size: Option<u64>,
    ) -> Result<()> {
        let structure = super::structure::copy(context, src.structure()?, &self.settings, compacted_size, "TopLevelCopy")?;
        self.structure = Some(structure);
        Ok(())
    }

    pub fn serialize(&self, context: &mut ExecutionContext, storage: &SerialStorage) -> Result<()> {
        super::structure::serialize(context, self.structure()?, &self.settings, storage)
    }

    /// Deserializes with the handles stored in `storage`, the bottom level structures they
    /// reference must still be alive.
    pub fn create_and_deserialize_from(&mut self, context: &mut ExecutionContext, storage: &SerialStorage) -> Result<()> {
        let structure = super::structure::deserialize(context, StructureLevel::Top, &self.settings, storage, "TopLevelDeserialized")?;
        self.structure = Some(structure);
        Ok(())
    }

    /// Points instance `i` of the deserialized structure at `table[i]`.
    pub fn create_and_deserialize_relocated(
        &mut self,
        context: &mut ExecutionContext,
        storage: &mut SerialStorage,
        table: &[u64],
    ) -> Result<()> {
        storage.remap(table)?;
        self.create_and_deserialize_from(context, storage)
    }
}
