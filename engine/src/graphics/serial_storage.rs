use log::trace;

use super::gpu::{
    BufferInfo,
    BufferUsage,
    MemoryKind,
    SerializedHeader,
};
use super::*;

/// Host visible memory that receives serialized acceleration structures.
///
/// Layout: [`SerializedHeader`], then one u64 device address per instance of a serialized
/// top level structure in instance order, then the opaque payload.
#[derive(Debug)]
pub struct SerialStorage {
    buffer: Buffer,
}

impl SerialStorage {
    pub fn new(context: &ExecutionContext, size: u64) -> Result<Self> {
        let buffer = context.create_buffer(
            &BufferInfo {
                size,
                usage: BufferUsage::STORAGE | BufferUsage::SHADER_DEVICE_ADDRESS,
                memory_kind: MemoryKind::RAM,
            },
            Some("SerialStorage"),
        )?;
        Ok(Self { buffer })
    }

    /// Storage holding data that was serialized earlier, possibly by another device.
    pub fn from_bytes(context: &ExecutionContext, bytes: &[u8]) -> Result<Self> {
        let buffer = context.create_buffer_with_data(bytes, BufferUsage::STORAGE, Some("SerialStorage"))?;
        Ok(Self { buffer })
    }

    #[inline(always)]
    pub(super) fn handle(&self) -> &active_gpu_backend::Buffer {
        self.buffer.handle()
    }

    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    pub fn bytes(&self) -> Result<Vec<u8>> {
        self.buffer.read(0, self.size())
    }

    pub fn header(&self) -> Result<SerializedHeader> {
        if self.size() < SerializedHeader::SIZE {
            return Err(Error::IncompatibleSerialFormat(format!(
                "{} bytes of storage cannot hold a serialized header",
                self.size()
            )));
        }
        let bytes = self.buffer.read(0, SerializedHeader::SIZE)?;
        let header = SerializedHeader::parse(&bytes)
            .ok_or_else(|| Error::IncompatibleSerialFormat("truncated serialized header".to_string()))?;
        if header.serialized_size > self.size() || header.payload_offset() > header.serialized_size {
            return Err(Error::IncompatibleSerialFormat(format!(
                "header describes {} bytes with {} handles but the storage holds {} bytes",
                header.serialized_size,
                header.handle_count,
                self.size()
            )));
        }
        Ok(header)
    }

    /// Bottom level references in instance order.
    pub fn handles(&self) -> Result<Vec<(u32, u64)>> {
        let header = self.header()?;
        let bytes = self
            .buffer
            .read(SerializedHeader::handles_offset(), header.handle_count * SerializedHeader::HANDLE_SIZE)?;
        Ok(bytes
            .chunks_exact(SerializedHeader::HANDLE_SIZE as usize)
            .enumerate()
            .map(|(index, chunk)| (index as u32, bytemuck::pod_read_unaligned::<u64>(chunk)))
            .collect())
    }

    /// Rewrites the handle table so instance `i` references `table[i]` once deserialized.
    pub fn remap(&mut self, table: &[u64]) -> Result<()> {
        let header = self.header()?;
        if table.len() as u64 != header.handle_count {
            return Err(Error::IncompatibleSerialFormat(format!(
                "relocation table holds {} handles, the serialized structure references {}",
                table.len(),
                header.handle_count
            )));
        }
        trace!("Remapping {} serialized handles", table.len());
        self.buffer
            .write(SerializedHeader::handles_offset(), bytemuck::cast_slice(table))
    }
}
