#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

use crate::error::{Error, Result};
use crate::process::ReadMemory;

#[cfg(target_os = "windows")]
use std::path::PathBuf;
#[cfg(target_os = "windows")]
use windows::Win32::Foundation::HMODULE;
#[cfg(target_os = "windows")]
use windows::Win32::System::LibraryLoader::GetModuleFileNameW;
#[cfg(target_os = "windows")]
use windows::Win32::System::ProcessStatus::{GetModuleInformation, MODULEINFO};
#[cfg(target_os = "windows")]
use windows::Win32::System::Threading::GetCurrentProcess;

/// Offset of `e_lfanew` in the DOS header
const DOS_LFANEW_OFFSET: u64 = 0x3C;
/// Offset of `TimeDateStamp` from the start of the NT headers
const NT_TIMESTAMP_OFFSET: u64 = 0x8;
const DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"
const NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"

/// A module mapped into the current process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImage {
    pub name: String,
    pub base: u64,
    pub size: u64,
}

impl ModuleImage {
    pub fn new(name: impl Into<String>, base: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            base,
            size,
        }
    }

    /// One past the last mapped byte
    pub fn end(&self) -> u64 {
        self.base + self.size
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }

    /// Render an address as `module+offset` for logs
    pub fn describe(&self, address: u64) -> String {
        format!("{}+{:x}", self.name, address.wrapping_sub(self.base))
    }

    /// Read the PE `TimeDateStamp` of this module
    pub fn timestamp<R: ReadMemory>(&self, reader: &R) -> Result<u32> {
        read_pe_timestamp(reader, self.base)
    }
}

/// Read the linker timestamp from the PE headers of the image at `base`
pub fn read_pe_timestamp<R: ReadMemory>(reader: &R, base: u64) -> Result<u32> {
    if reader.read_u16(base)? != DOS_SIGNATURE {
        return Err(Error::ModuleNotFound(format!(
            "No DOS header at {:#x}",
            base
        )));
    }

    let nt_headers = base + reader.read_u32(base + DOS_LFANEW_OFFSET)? as u64;
    if reader.read_u32(nt_headers)? != NT_SIGNATURE {
        return Err(Error::ModuleNotFound(format!(
            "No NT headers at {:#x}",
            nt_headers
        )));
    }

    reader.read_u32(nt_headers + NT_TIMESTAMP_OFFSET)
}

#[cfg(target_os = "windows")]
impl ModuleImage {
    pub fn from_handle(module: HMODULE) -> Result<Self> {
        let mut info = MODULEINFO::default();
        // SAFETY: `module` is a loaded module of this process and `info` is properly sized.
        unsafe {
            GetModuleInformation(
                GetCurrentProcess(),
                module,
                &mut info,
                std::mem::size_of::<MODULEINFO>() as u32,
            )
            .map_err(|e| Error::ModuleNotFound(format!("Failed to get module info: {}", e)))?;
        }

        let name = module_path(module)?
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            name,
            base: info.lpBaseOfDll as u64,
            size: info.SizeOfImage as u64,
        })
    }
}

/// Full path of a loaded module
#[cfg(target_os = "windows")]
pub fn module_path(module: HMODULE) -> Result<PathBuf> {
    let mut buffer = vec![0u16; 1024];
    loop {
        // SAFETY: the buffer is writable for its full length.
        let len = unsafe { GetModuleFileNameW(module, &mut buffer) } as usize;
        if len == 0 {
            return Err(Error::ModuleNotFound(
                "GetModuleFileNameW returned no path".to_string(),
            ));
        }
        if len < buffer.len() {
            return Ok(PathBuf::from(String::from_utf16_lossy(&buffer[..len])));
        }
        buffer.resize(buffer.len() * 2, 0);
    }
}
