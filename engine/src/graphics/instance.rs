use super::gpu::{
    GeometryInstanceFlags,
    InstanceRecord,
    INSTANCE_FIELD_MASK,
};
use super::*;
use crate::Affine3A;

/// Placement of a bottom level structure in a top level structure. `bottom` indexes the
/// bottom level list passed to the top level build.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDescriptor {
    pub bottom: usize,
    pub transform: Affine3A,
    pub custom_index: u32,
    pub mask: u8,
    pub sbt_offset: u32,
    pub flags: GeometryInstanceFlags,
}

impl InstanceDescriptor {
    pub fn new(bottom: usize) -> Self {
        Self {
            bottom,
            transform: Affine3A::IDENTITY,
            custom_index: 0,
            mask: 0xFF,
            sbt_offset: 0,
            flags: GeometryInstanceFlags::empty(),
        }
    }

    pub fn with_transform(mut self, transform: Affine3A) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_custom_index(mut self, custom_index: u32) -> Self {
        self.custom_index = custom_index;
        self
    }

    pub fn with_mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_sbt_offset(mut self, sbt_offset: u32) -> Self {
        self.sbt_offset = sbt_offset;
        self
    }

    pub fn with_flags(mut self, flags: GeometryInstanceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// A reference of 0 makes the instance inactive.
    pub fn to_record(&self, reference: u64) -> Result<InstanceRecord> {
        if self.custom_index & !INSTANCE_FIELD_MASK != 0 {
            return Err(Error::InvalidInstance(format!(
                "custom index {:#x} does not fit 24 bits",
                self.custom_index
            )));
        }
        if self.sbt_offset & !INSTANCE_FIELD_MASK != 0 {
            return Err(Error::InvalidInstance(format!(
                "shader binding table offset {:#x} does not fit 24 bits",
                self.sbt_offset
            )));
        }
        Ok(InstanceRecord::new(
            &self.transform,
            self.custom_index,
            self.mask,
            self.sbt_offset,
            self.flags,
            reference,
        ))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Vec3;

    #[test]
    fn records_carry_every_field() {
        let record = InstanceDescriptor::new(3)
            .with_transform(Affine3A::from_translation(Vec3::new(2f32, 5f32, 0f32)))
            .with_custom_index(7)
            .with_mask(0x0F)
            .with_sbt_offset(1)
            .with_flags(GeometryInstanceFlags::TRIANGLE_FACING_CULL_DISABLE)
            .to_record(0x1000)
            .unwrap();
        assert_eq!(record.custom_index(), 7);
        assert_eq!(record.mask(), 0x0F);
        assert_eq!(record.sbt_offset(), 1);
        assert_eq!(record.flags(), GeometryInstanceFlags::TRIANGLE_FACING_CULL_DISABLE);
        assert_eq!(record.transform[0][3], 2f32);
        assert_eq!(record.transform[1][3], 5f32);
        assert_eq!(record.acceleration_structure_reference, 0x1000);
    }

    #[test]
    fn oversized_fields_are_rejected() {
        let instance = InstanceDescriptor::new(0).with_custom_index(1 << 24);
        assert!(matches!(instance.to_record(0), Err(Error::InvalidInstance(_))));
        let instance = InstanceDescriptor::new(0).with_sbt_offset(u32::MAX);
        assert!(matches!(instance.to_record(0), Err(Error::InvalidInstance(_))));
    }
}
