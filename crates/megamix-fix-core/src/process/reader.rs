#![cfg_attr(not(target_os = "windows"), allow(dead_code, unused_variables))]

use crate::error::{Error, Result};

#[cfg(target_os = "windows")]
use std::ffi::c_void;
#[cfg(target_os = "windows")]
use tracing::warn;
#[cfg(target_os = "windows")]
use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
#[cfg(target_os = "windows")]
use windows::Win32::System::Memory::{
    PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, VirtualProtect,
};
#[cfg(target_os = "windows")]
use windows::Win32::System::Threading::GetCurrentProcess;

/// Trait for reading memory from a process or buffer
///
/// This trait enables mocking for tests and abstracts over different memory sources.
pub trait ReadMemory {
    /// Read raw bytes from memory at the given address
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>>;

    /// Read a signed 32-bit integer from memory
    fn read_i32(&self, address: u64) -> Result<i32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read an unsigned 16-bit integer from memory
    fn read_u16(&self, address: u64) -> Result<u16> {
        let bytes = self.read_bytes(address, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read an unsigned 32-bit integer from memory
    fn read_u32(&self, address: u64) -> Result<u32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read an unsigned 64-bit integer from memory
    fn read_u64(&self, address: u64) -> Result<u64> {
        let bytes = self.read_bytes(address, 8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }
}

/// Trait for writing memory in the host process
///
/// Handlers run on game threads, so implementations must be shareable.
pub trait WriteMemory: Send + Sync {
    /// Write raw bytes at the given address
    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()>;

    /// Write a signed 32-bit integer
    fn write_i32(&self, address: u64, value: i32) -> Result<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }
}

/// Memory of the process this module is loaded into.
///
/// Reads go through `ReadProcessMemory` on the current process so that an
/// unmapped or guarded page produces an error instead of an access violation.
/// Writes lift the page protection to execute-read-write for the duration of
/// the store and restore it afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalMemory;

impl LocalMemory {
    pub fn new() -> Self {
        Self
    }

    #[cfg(target_os = "windows")]
    fn read_bytes_impl(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        let mut bytes_read = 0;

        // SAFETY: ReadProcessMemory validates the source range itself and fails instead of
        // faulting on unreadable pages. The destination buffer is sized to `size`.
        unsafe {
            ReadProcessMemory(
                GetCurrentProcess(),
                address as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                size,
                Some(&mut bytes_read),
            )
            .map_err(|e| Error::MemoryReadFailed {
                address,
                message: e.to_string(),
            })?;
        }

        if bytes_read != size {
            return Err(Error::MemoryReadFailed {
                address,
                message: format!("Expected {} bytes, read {}", size, bytes_read),
            });
        }

        Ok(buffer)
    }

    #[cfg(not(target_os = "windows"))]
    fn read_bytes_impl(&self, address: u64, _size: usize) -> Result<Vec<u8>> {
        Err(Error::MemoryReadFailed {
            address,
            message: "Windows only: memory reading not supported on this platform".to_string(),
        })
    }

    /// Run `action` on `len` bytes at `address` with the pages made writable.
    ///
    /// # Safety
    ///
    /// `address..address + len` must be mapped memory of this process. Writing
    /// outside of it is undefined behaviour and will usually crash the host.
    #[cfg(target_os = "windows")]
    unsafe fn with_writable<F>(&self, address: u64, len: usize, action: F) -> Result<()>
    where
        F: FnOnce(*mut u8),
    {
        let mut old_protect = PAGE_PROTECTION_FLAGS::default();

        // SAFETY: upheld by the caller; VirtualProtect fails on unmapped ranges.
        unsafe {
            VirtualProtect(
                address as *const c_void,
                len,
                PAGE_EXECUTE_READWRITE,
                &mut old_protect,
            )
            .map_err(|e| Error::MemoryWriteFailed {
                address,
                message: format!("VirtualProtect failed: {}", e),
            })?;
        }

        action(address as *mut u8);

        let mut restored = PAGE_PROTECTION_FLAGS::default();
        // SAFETY: same range that was successfully re-protected above.
        if let Err(e) =
            unsafe { VirtualProtect(address as *const c_void, len, old_protect, &mut restored) }
        {
            warn!(
                "Failed to restore page protection at {:#x} ({} bytes): {}",
                address, len, e
            );
        }

        Ok(())
    }

    #[cfg(target_os = "windows")]
    fn write_bytes_impl(&self, address: u64, bytes: &[u8]) -> Result<()> {
        // SAFETY: callers only write to addresses derived from successful scans of the
        // host image. A wrong address here is the accepted host-fatal risk of patching.
        unsafe {
            self.with_writable(address, bytes.len(), |dst| {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len())
            })
        }
    }

    #[cfg(not(target_os = "windows"))]
    fn write_bytes_impl(&self, address: u64, _bytes: &[u8]) -> Result<()> {
        Err(Error::MemoryWriteFailed {
            address,
            message: "Windows only: memory writing not supported on this platform".to_string(),
        })
    }
}

impl ReadMemory for LocalMemory {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        self.read_bytes_impl(address, size)
    }
}

impl WriteMemory for LocalMemory {
    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()> {
        self.write_bytes_impl(address, bytes)
    }

    #[cfg(target_os = "windows")]
    fn write_i32(&self, address: u64, value: i32) -> Result<()> {
        // A single 32-bit store, so concurrent readers never observe a torn value.
        // SAFETY: see write_bytes_impl.
        unsafe {
            self.with_writable(address, 4, |dst| {
                (dst as *mut i32).write_unaligned(value)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::mock::MockMemory;

    #[test]
    fn test_read_i32() {
        let data = vec![0x78, 0x56, 0x34, 0x12]; // Little-endian 0x12345678
        let memory = MockMemory::new(data);

        assert_eq!(memory.read_i32(0x1000).unwrap(), 0x12345678);
    }

    #[test]
    fn test_read_i32_negative() {
        let memory = MockMemory::new(vec![0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(memory.read_i32(0x1000).unwrap(), -1);
    }

    #[test]
    fn test_read_u64() {
        let data = vec![0xEF, 0xCD, 0xAB, 0x90, 0x78, 0x56, 0x34, 0x12];
        let memory = MockMemory::new(data);

        assert_eq!(memory.read_u64(0x1000).unwrap(), 0x1234567890ABCDEF);
    }

    #[test]
    fn test_write_i32_default_impl() {
        let memory = MockMemory::new(vec![0; 8]);
        memory.write_i32(0x1004, -2).unwrap();

        assert_eq!(memory.read_i32(0x1004).unwrap(), -2);
        assert_eq!(memory.read_i32(0x1000).unwrap(), 0);
    }

    #[test]
    fn test_read_out_of_bounds() {
        let memory = MockMemory::new(vec![0x01, 0x02]);
        assert!(memory.read_u32(0x1000).is_err());
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_local_memory_unsupported_off_windows() {
        let memory = LocalMemory::new();
        assert!(memory.read_bytes(0x1000, 4).is_err());
        assert!(memory.write_i32(0x1000, 1).is_err());
    }
}
