use std::sync::Arc;

use raycts_core::gpu::{
    AccelerationStructure,
    AccelerationStructureInfo,
    AccelerationStructureType,
    BackendError,
    Buffer,
    BufferUsage,
};
use raycts_core::is_aligned_64;

use crate::image::{
    ImageHeader,
    ImageLevel,
    StructureImage,
};
use crate::shared::ADDRESS_ALIGNMENT;
use crate::{
    SoftBackend,
    SoftBuffer,
    SoftShared,
};

pub(crate) struct StructureInner {
    ty: AccelerationStructureType,
    buffer: SoftBuffer,
    offset: u64,
    size: u64,
    address: u64,
    shared: Arc<SoftShared>,
    name: Option<String>,
}

impl Drop for StructureInner {
    fn drop(&mut self) {
        log::trace!("Destroying acceleration structure {:?} at {:#x}", self.name, self.address);
        self.shared.unregister_structure(self.address, self as *const StructureInner);
    }
}

/// Acceleration structure placed in a range of a [`SoftBuffer`]. The built data lives in
/// that buffer memory, so copying the range copies the structure.
#[derive(Clone)]
pub struct SoftAccelerationStructure {
    inner: Arc<StructureInner>,
}

impl SoftAccelerationStructure {
    pub(crate) fn new(shared: &Arc<SoftShared>, info: &AccelerationStructureInfo<SoftBackend>, name: Option<&str>) -> Result<Self, BackendError> {
        if !info.buffer.info().usage.contains(BufferUsage::ACCELERATION_STRUCTURE) {
            return Err(BackendError::invalid_usage("buffer was not created with ACCELERATION_STRUCTURE usage"));
        }
        if !is_aligned_64(info.offset, ADDRESS_ALIGNMENT) {
            return Err(BackendError::invalid_usage(format!("offset {} is not aligned to {}", info.offset, ADDRESS_ALIGNMENT)));
        }
        if info.offset.checked_add(info.size).map(|end| end > info.buffer.size()).unwrap_or(true) {
            return Err(BackendError::invalid_usage(format!(
                "acceleration structure of {} bytes at offset {} does not fit a buffer of {} bytes",
                info.size,
                info.offset,
                info.buffer.size()
            )));
        }

        let address = info.buffer.va() + info.offset;
        let inner = Arc::new(StructureInner {
            ty: info.ty,
            buffer: info.buffer.clone(),
            offset: info.offset,
            size: info.size,
            address,
            shared: shared.clone(),
            name: name.map(|name| name.to_string()),
        });
        shared.register_structure(address, &inner);
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<StructureInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn require_host_visible(&self, usage: &str) -> Result<(), BackendError> {
        self.inner.buffer.require_host_visible(usage)
    }

    pub(crate) fn check_level(&self, level: ImageLevel) -> Result<(), BackendError> {
        if !level.fits(self.inner.ty) {
            return Err(BackendError::invalid_usage(format!(
                "{:?} level data does not fit an acceleration structure of type {:?}",
                level, self.inner.ty
            )));
        }
        Ok(())
    }

    pub(crate) fn read_header(&self) -> Result<ImageHeader, BackendError> {
        let size = ImageHeader::SIZE.min(self.inner.size);
        let bytes = self.inner.buffer.read_bytes(self.inner.offset, size)?;
        let header = ImageHeader::parse(&bytes)?;
        if header.image_size > self.inner.size {
            return Err(BackendError::invalid_usage("acceleration structure data is corrupt"));
        }
        Ok(header)
    }

    pub(crate) fn read_image_bytes(&self) -> Result<Vec<u8>, BackendError> {
        let header = self.read_header()?;
        self.inner.buffer.read_bytes(self.inner.offset, header.image_size)
    }

    pub(crate) fn read_image(&self) -> Result<StructureImage, BackendError> {
        StructureImage::decode(&self.read_image_bytes()?)
    }

    pub(crate) fn write_image_bytes(&self, bytes: &[u8]) -> Result<(), BackendError> {
        if bytes.len() as u64 > self.inner.size {
            return Err(BackendError::invalid_usage(format!(
                "{} bytes of acceleration structure data do not fit a structure of {} bytes",
                bytes.len(),
                self.inner.size
            )));
        }
        self.inner.buffer.write_bytes(self.inner.offset, bytes)
    }
}

impl AccelerationStructure for SoftAccelerationStructure {
    fn ty(&self) -> AccelerationStructureType {
        self.inner.ty
    }

    fn size(&self) -> u64 {
        self.inner.size
    }

    fn device_address(&self) -> u64 {
        self.inner.address
    }
}
