use super::gpu::{
    AccelerationStructureAabbs,
    AccelerationStructureBuildType,
    AccelerationStructureGeometryData,
    AccelerationStructureInputs,
    AccelerationStructureTriangles,
    BufferUsage,
    BuildAccelerationStructureFlags,
    GeometryArray,
};
use super::*;

struct GeometryUpload {
    vertices: Buffer,
    indices: Option<Buffer>,
    stride: u64,
}

/// Bottom level acceleration structure made of triangle or AABB geometries.
pub struct BottomLevelStructure {
    settings: StructureSettings,
    geometries: Vec<GeometryDescriptor>,
    build_without_geometries: bool,
    build_without_primitives: bool,
    structure: Option<AccelerationStructure>,
}

impl Default for BottomLevelStructure {
    fn default() -> Self {
        Self::new()
    }
}

impl BottomLevelStructure {
    pub fn new() -> Self {
        Self {
            settings: StructureSettings::default(),
            geometries: Vec::new(),
            build_without_geometries: false,
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

    /// Builds with an empty geometry list even if geometries were added.
    pub fn set_build_without_geometries(&mut self, build_without_geometries: bool) {
        self.build_without_geometries = build_without_geometries;
    }

    /// Builds every geometry with a primitive count of 0.
    pub fn set_build_without_primitives(&mut self, build_without_primitives: bool) {
        self.build_without_primitives = build_without_primitives;
    }

    pub fn set_deferred_operation(&mut self, deferred: Option<DeferredSettings>) {
        self.settings.deferred = deferred;
    }

    pub fn add_geometry(&mut self, geometry: GeometryDescriptor) {
        self.geometries.push(geometry);
    }

    pub fn geometries(&self) -> &[GeometryDescriptor] {
        &self.geometries
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
            .ok_or_else(|| Error::NotBuilt("bottom level structure".to_string()))
    }

    pub fn device_address(&self) -> Result<u64> {
        Ok(self.structure()?.device_address())
    }

    pub fn create_and_build(&mut self, context: &mut ExecutionContext) -> Result<()> {
        for geometry in &self.geometries {
            geometry.validate()?;
        }

        let mut uploads = Vec::with_capacity(self.geometries.len());
        for geometry in &self.geometries {
            let encoded = geometry.encode();
            let vertices = context.create_buffer_with_data(
                &encoded.vertices,
                BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT,
                Some("BottomLevelVertices"),
            )?;
            let indices = match &encoded.indices {
                Some(indices) => Some(context.create_buffer_with_data(
                    indices,
                    BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT,
                    Some("BottomLevelIndices"),
                )?),
                None => None,
            };
            uploads.push(GeometryUpload {
                vertices,
                indices,
                stride: encoded.stride,
            });
        }

        let build_without_primitives = self.build_without_primitives;
        let descriptions: Vec<active_gpu_backend::AccelerationStructureGeometry> = if self.build_without_geometries {
            Vec::new()
        } else {
            self.geometries
                .iter()
                .zip(&uploads)
                .map(|(geometry, upload)| {
                    let data = match geometry.geometry_type() {
                        GeometryType::Triangles => AccelerationStructureGeometryData::Triangles(AccelerationStructureTriangles {
                            vertex_format: geometry.vertex_format(),
                            vertex_buffer: upload.vertices.handle(),
                            vertex_buffer_offset: 0,
                            vertex_stride: upload.stride,
                            max_vertex: geometry.vertices().len().saturating_sub(1) as u32,
                            index_format: geometry.index_format(),
                            index_buffer: upload.indices.as_ref().map(|indices| indices.handle()),
                            index_buffer_offset: 0,
                        }),
                        GeometryType::Aabbs => AccelerationStructureGeometryData::Aabbs(AccelerationStructureAabbs {
                            buffer: upload.vertices.handle(),
                            offset: 0,
                            stride: upload.stride,
                        }),
                    };
                    active_gpu_backend::AccelerationStructureGeometry {
                        data,
                        flags: geometry.flags(),
                        primitive_count: if build_without_primitives { 0 } else { geometry.primitive_count() },
                    }
                })
                .collect()
        };
        let pointers: Vec<&active_gpu_backend::AccelerationStructureGeometry> = descriptions.iter().collect();
        let geometries = if self.settings.array_of_pointers {
            GeometryArray::Pointers(&pointers)
        } else {
            GeometryArray::Values(&descriptions)
        };

        let structure = super::structure::build(
            context,
            StructureLevel::Bottom,
            &self.settings,
            AccelerationStructureInputs::BottomLevel(geometries),
            "BottomLevelStructure",
        )?;
        self.structure = Some(structure);
        Ok(())
    }

    /// Replaces this structure with a copy of `src`, compacted to `compacted_size` if given.
    /// The copy uses the settings of `self`.
    pub fn create_and_copy_from(
        &mut self,
        context: &mut ExecutionContext,
        src: &BottomLevelStructure,
        compacted_size: Option<u64>,
    ) -> Result<()> {
        let structure = super::structure::copy(context, src.structure()?, &self.settings, compacted_size, "BottomLevelCopy")?;
        self.structure = Some(structure);
        Ok(())
    }

    pub fn serialize(&self, context: &mut ExecutionContext, storage: &SerialStorage) -> Result<()> {
        super::structure::serialize(context, self.structure()?, &self.settings, storage)
    }

    pub fn create_and_deserialize_from(&mut self, context: &mut ExecutionContext, storage: &SerialStorage) -> Result<()> {
        let structure = super::structure::deserialize(
            context,
            StructureLevel::Bottom,
            &self.settings,
            storage,
            "BottomLevelDeserialized",
        )?;
        self.structure = Some(structure);
        Ok(())
    }
}
