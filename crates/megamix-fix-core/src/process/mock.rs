//! Mock process memory for testing
//!
//! Provides an in-memory implementation of `ReadMemory` and `WriteMemory`
//! that stands in for the host process image.

use std::ops::Range;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::process::{ModuleImage, ReadMemory, WriteMemory};

/// Mock process memory for testing
///
/// Reads and writes an in-memory buffer mapped at `base`. Ranges registered
/// as unreadable fail like unmapped pages would.
#[derive(Debug)]
pub struct MockMemory {
    data: Mutex<Vec<u8>>,
    base: u64,
    unreadable: Vec<Range<u64>>,
    writes: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl MockMemory {
    /// Create a new mock with the given data at base address 0x1000
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_base(data, 0x1000)
    }

    /// Create a new mock with custom base address
    pub fn with_base(data: Vec<u8>, base: u64) -> Self {
        Self {
            data: Mutex::new(data),
            base,
            unreadable: Vec::new(),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Get the size of the underlying buffer
    pub fn len(&self) -> usize {
        self.lock_data().len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.lock_data().is_empty()
    }

    /// Describe the whole buffer as a module image
    pub fn module(&self, name: &str) -> ModuleImage {
        ModuleImage::new(name, self.base, self.len() as u64)
    }

    /// Every write performed so far, in order
    pub fn writes(&self) -> Vec<(u64, Vec<u8>)> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear_writes(&self) {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn lock_data(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn offset_of(&self, address: u64, size: usize, len: usize) -> Result<usize> {
        if address < self.base {
            return Err(Error::MemoryReadFailed {
                address,
                message: format!("Address below base (base=0x{:X})", self.base),
            });
        }
        let offset = (address - self.base) as usize;
        if offset + size > len {
            return Err(Error::MemoryReadFailed {
                address,
                message: format!("Out of bounds: offset={}, size={}, len={}", offset, size, len),
            });
        }
        Ok(offset)
    }
}

impl ReadMemory for MockMemory {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let end = address + size as u64;
        if self
            .unreadable
            .iter()
            .any(|range| address < range.end && range.start < end)
        {
            return Err(Error::MemoryReadFailed {
                address,
                message: "Page is not readable".to_string(),
            });
        }

        let data = self.lock_data();
        let offset = self.offset_of(address, size, data.len())?;
        Ok(data[offset..offset + size].to_vec())
    }
}

impl WriteMemory for MockMemory {
    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()> {
        let mut data = self.lock_data();
        let offset = self
            .offset_of(address, bytes.len(), data.len())
            .map_err(|e| Error::MemoryWriteFailed {
                address,
                message: e.to_string(),
            })?;
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        drop(data);

        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((address, bytes.to_vec()));
        Ok(())
    }
}

/// Builder for creating test memory images
///
/// Provides a fluent API for constructing memory layouts for testing.
#[derive(Debug, Clone, Default)]
pub struct MockMemoryBuilder {
    data: Vec<u8>,
    base: u64,
    unreadable: Vec<Range<u64>>,
}

impl MockMemoryBuilder {
    /// Create a new builder with default base address (0x1000)
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            base: 0x1000,
            unreadable: Vec::new(),
        }
    }

    /// Set the base address for the mock
    pub fn base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    /// Pre-allocate buffer with zeros up to the specified size
    pub fn with_size(mut self, size: usize) -> Self {
        self.data.resize(size, 0);
        self
    }

    /// Write a signed 32-bit integer at the specified offset from base
    pub fn write_i32(mut self, offset: usize, value: i32) -> Self {
        self.ensure_size(offset + 4);
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self
    }

    /// Write an unsigned 32-bit integer at the specified offset from base
    pub fn write_u32(mut self, offset: usize, value: u32) -> Self {
        self.ensure_size(offset + 4);
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self
    }

    /// Write an unsigned 64-bit integer at the specified offset from base
    pub fn write_u64(mut self, offset: usize, value: u64) -> Self {
        self.ensure_size(offset + 8);
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        self
    }

    /// Write raw bytes at the specified offset from base
    pub fn write_bytes(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.ensure_size(offset + bytes.len());
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// Mark `len` bytes at `offset` as unreadable
    pub fn unreadable(mut self, offset: usize, len: usize) -> Self {
        let start = self.base + offset as u64;
        self.unreadable.push(start..start + len as u64);
        self
    }

    /// Build the MockMemory
    pub fn build(self) -> MockMemory {
        MockMemory {
            data: Mutex::new(self.data),
            base: self.base,
            unreadable: self.unreadable,
            writes: Mutex::new(Vec::new()),
        }
    }

    fn ensure_size(&mut self, required: usize) {
        if self.data.len() < required {
            self.data.resize(required, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_with_base() {
        let memory = MockMemory::with_base(vec![0x01, 0x02, 0x03, 0x04], 0x140000000);

        let bytes = memory.read_bytes(0x140000000, 4).unwrap();
        assert_eq!(bytes, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_mock_below_base() {
        let memory = MockMemory::with_base(vec![0x01, 0x02, 0x03, 0x04], 0x2000);
        assert!(memory.read_bytes(0x1000, 4).is_err());
    }

    #[test]
    fn test_mock_records_writes() {
        let memory = MockMemory::new(vec![0; 16]);
        memory.write_i32(0x1008, 2160).unwrap();

        assert_eq!(memory.read_i32(0x1008).unwrap(), 2160);
        assert_eq!(memory.writes(), vec![(0x1008, 2160i32.to_le_bytes().to_vec())]);
    }

    #[test]
    fn test_mock_write_out_of_bounds() {
        let memory = MockMemory::new(vec![0; 4]);
        assert!(memory.write_i32(0x1002, 1).is_err());
        assert!(memory.writes().is_empty());
    }

    #[test]
    fn test_builder_unreadable_range() {
        let memory = MockMemoryBuilder::new()
            .with_size(0x40)
            .unreadable(0x10, 0x10)
            .build();

        assert!(memory.read_bytes(0x1000, 0x10).is_ok());
        assert!(memory.read_bytes(0x1018, 4).is_err());
        assert!(memory.read_bytes(0x100C, 8).is_err());
        assert!(memory.read_bytes(0x1020, 0x20).is_ok());
    }

    #[test]
    fn test_builder_basic() {
        let memory = MockMemoryBuilder::new()
            .base(0x140000000)
            .write_i32(0, 0x12345678)
            .write_u64(4, 0xDEADBEEFCAFEBABE)
            .build();

        assert_eq!(memory.base(), 0x140000000);
        assert_eq!(memory.read_i32(0x140000000).unwrap(), 0x12345678);
        assert_eq!(memory.read_u64(0x140000004).unwrap(), 0xDEADBEEFCAFEBABE);
    }
}
