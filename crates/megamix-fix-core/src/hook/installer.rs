#![cfg_attr(not(target_os = "windows"), allow(dead_code, unused_variables))]

use crate::error::{Error, Result};
use crate::hook::{InstallHook, InterceptHandler};

#[cfg(target_os = "windows")]
use std::ffi::c_void;
#[cfg(target_os = "windows")]
use std::panic::{AssertUnwindSafe, catch_unwind};

#[cfg(target_os = "windows")]
use tracing::{debug, error, warn};
#[cfg(target_os = "windows")]
use windows::Win32::Foundation::{CloseHandle, HANDLE};
#[cfg(target_os = "windows")]
use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
#[cfg(target_os = "windows")]
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First, Thread32Next,
};
#[cfg(target_os = "windows")]
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_FREE, MEM_RELEASE, MEM_RESERVE, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE_READ,
    PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, PAGE_READWRITE, VirtualAlloc, VirtualFree,
    VirtualProtect, VirtualQuery,
};
#[cfg(target_os = "windows")]
use windows::Win32::System::Threading::{
    GetCurrentProcess, GetCurrentProcessId, GetCurrentThreadId, OpenThread, ResumeThread,
    SuspendThread, THREAD_SUSPEND_RESUME,
};

#[cfg(target_os = "windows")]
use crate::hook::registers::Registers;
#[cfg(target_os = "windows")]
use crate::hook::trampoline::{build_trampoline, displaced_instructions, displaced_len, jump_patch};
use crate::hook::trampoline::{JUMP_PATCH_LEN, MAX_INSTRUCTION_LEN};
#[cfg(target_os = "windows")]
use crate::process::LocalMemory;
use crate::process::ReadMemory;

/// Bytes reserved for one trampoline
const TRAMPOLINE_SIZE: usize = 0x1000;
/// Step between candidate trampoline addresses
const ALLOCATION_GRANULARITY: u64 = 0x10000;
/// Search radius for the trampoline, kept inside rel32 reach of the hook site
const NEAR_RANGE: u64 = 0x7FF0_0000;
/// Page size used when a hook site read has to stop short
const SITE_PAGE_SIZE: u64 = 0x1000;

/// An installed mid-function hook.
///
/// Dropping it writes the original bytes back with all other threads
/// suspended, then releases the trampoline and the handler.
pub struct MidHook {
    address: u64,
    original: Vec<u8>,
    #[cfg(target_os = "windows")]
    _trampoline: ExecutableMemory,
    #[cfg(target_os = "windows")]
    _handler: Box<Box<dyn InterceptHandler>>,
}

impl MidHook {
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Number of bytes overwritten at the hook site
    pub fn patched_len(&self) -> usize {
        self.original.len()
    }
}

impl std::fmt::Debug for MidHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidHook")
            .field("address", &format_args!("{:#x}", self.address))
            .field("patched_len", &self.original.len())
            .finish()
    }
}

#[cfg(target_os = "windows")]
impl Drop for MidHook {
    fn drop(&mut self) {
        let restored = {
            let _frozen = ThreadFreezer::freeze();
            // SAFETY: the hook site was patched by us and is still mapped.
            unsafe { patch_frozen(self.address, &self.original) }
        };
        if let Err(step) = restored {
            error!("Failed to remove hook at {:#x}: {} failed", self.address, step);
        }
    }
}

/// Installs [`MidHook`]s into the current process
#[derive(Debug, Clone, Copy, Default)]
pub struct MidHookInstaller {
    #[cfg(target_os = "windows")]
    memory: LocalMemory,
}

impl MidHookInstaller {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstallHook for MidHookInstaller {
    type Hook = MidHook;

    #[cfg(target_os = "windows")]
    fn install(&self, address: u64, handler: Box<dyn InterceptHandler>) -> Result<MidHook> {
        let code = read_hook_site(&self.memory, address)?;
        let displaced = displaced_instructions(&code, address, JUMP_PATCH_LEN)?;
        let patched_len = displaced_len(&displaced);

        let trampoline = ExecutableMemory::allocate_near(address, TRAMPOLINE_SIZE)?;
        let handler = Box::new(handler);
        let context = &*handler as *const Box<dyn InterceptHandler> as u64;

        let stub = build_trampoline(
            trampoline.address(),
            dispatch as usize as u64,
            context,
            &displaced,
        )?;
        trampoline.write_code(&stub)?;

        let patch = jump_patch(address, trampoline.address(), patched_len)?;
        let original = code[..patched_len].to_vec();

        let patched = {
            let _frozen = ThreadFreezer::freeze();
            // SAFETY: `address` is mapped code of this module; `patch` covers whole
            // instructions that the trampoline now executes instead.
            unsafe { patch_frozen(address, &patch) }
        };
        if let Err(step) = patched {
            return Err(Error::hook_failed(
                address,
                format!("{} failed while patching", step),
            ));
        }

        debug!(
            "Hooked {:#x} ({} bytes displaced, trampoline at {:#x})",
            address,
            patched_len,
            trampoline.address()
        );

        Ok(MidHook {
            address,
            original,
            _trampoline: trampoline,
            _handler: handler,
        })
    }

    #[cfg(not(target_os = "windows"))]
    fn install(&self, address: u64, _handler: Box<dyn InterceptHandler>) -> Result<MidHook> {
        Err(Error::hook_failed(
            address,
            "Windows only: hooking not supported on this platform",
        ))
    }
}

/// Code bytes at a hook site, enough to decode the instructions a jump displaces.
///
/// Reads the longest useful window first. If it runs into an unreadable page,
/// falls back to the bytes left on the site's own page.
fn read_hook_site<R: ReadMemory>(reader: &R, address: u64) -> Result<Vec<u8>> {
    let full = JUMP_PATCH_LEN + MAX_INSTRUCTION_LEN;
    match reader.read_bytes(address, full) {
        Ok(code) => Ok(code),
        Err(e) => {
            let to_page_end = SITE_PAGE_SIZE - (address % SITE_PAGE_SIZE);
            if to_page_end >= full as u64 {
                return Err(e);
            }
            reader.read_bytes(address, to_page_end as usize)
        }
    }
}

/// Step of [`patch_frozen`] that failed
#[cfg(target_os = "windows")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
enum PatchStep {
    #[strum(serialize = "VirtualProtect")]
    Protect,
    #[strum(serialize = "FlushInstructionCache")]
    Flush,
}

/// Overwrite code bytes while other threads are suspended.
///
/// Runs between `SuspendThread` and `ResumeThread`. A suspended thread may hold
/// the heap lock, so nothing here allocates: no logging, no formatting, and the
/// failing step is reported as a plain value.
///
/// # Safety
///
/// `address..address + bytes.len()` must be mapped code of this process.
#[cfg(target_os = "windows")]
unsafe fn patch_frozen(address: u64, bytes: &[u8]) -> std::result::Result<(), PatchStep> {
    let mut old = PAGE_PROTECTION_FLAGS::default();

    // SAFETY: upheld by the caller.
    unsafe {
        if VirtualProtect(
            address as *const c_void,
            bytes.len(),
            PAGE_EXECUTE_READWRITE,
            &mut old,
        )
        .is_err()
        {
            return Err(PatchStep::Protect);
        }

        std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());

        let mut restored = PAGE_PROTECTION_FLAGS::default();
        let _ = VirtualProtect(address as *const c_void, bytes.len(), old, &mut restored);

        if FlushInstructionCache(
            GetCurrentProcess(),
            Some(address as *const c_void),
            bytes.len(),
        )
        .is_err()
        {
            return Err(PatchStep::Flush);
        }
    }

    Ok(())
}

/// Called by every trampoline with the saved registers and its handler
#[cfg(target_os = "windows")]
unsafe extern "win64" fn dispatch(regs: *mut Registers, handler: *const Box<dyn InterceptHandler>) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: the trampoline passes its own stack snapshot, valid and unaliased for
        // the duration of this call, and the handler owned by the live MidHook.
        let (regs, handler) = unsafe { (&mut *regs, &*handler) };
        handler.on_hit(regs);
    }));

    if result.is_err() {
        error!("Hook handler panicked; registers left as captured");
    }
}

/// A private page of code near a hook site
#[cfg(target_os = "windows")]
struct ExecutableMemory {
    address: u64,
    size: usize,
}

#[cfg(target_os = "windows")]
impl ExecutableMemory {
    /// Reserve `size` bytes within rel32 reach of `target`, searching downward
    /// first and then upward in allocation-granularity steps.
    fn allocate_near(target: u64, size: usize) -> Result<Self> {
        let aligned = target & !(ALLOCATION_GRANULARITY - 1);
        let low = target.saturating_sub(NEAR_RANGE).max(ALLOCATION_GRANULARITY);
        let high = target.saturating_add(NEAR_RANGE);

        let below = (0..)
            .map(|step| aligned.checked_sub(step * ALLOCATION_GRANULARITY))
            .take_while(|candidate| candidate.is_some_and(|c| c >= low))
            .flatten();
        let above = (1..)
            .map(|step| aligned + step * ALLOCATION_GRANULARITY)
            .take_while(|candidate| candidate + size as u64 <= high);

        for candidate in below.chain(above) {
            if let Some(memory) = Self::try_allocate_at(candidate, size) {
                return Ok(memory);
            }
        }

        Err(Error::hook_failed(
            target,
            "No free memory within jump range for the trampoline",
        ))
    }

    fn try_allocate_at(candidate: u64, size: usize) -> Option<Self> {
        let mut info = MEMORY_BASIC_INFORMATION::default();
        // SAFETY: VirtualQuery only fills `info`, which is sized correctly.
        let written = unsafe {
            VirtualQuery(
                Some(candidate as *const c_void),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if written == 0 || info.State != MEM_FREE || info.RegionSize < size {
            return None;
        }

        // SAFETY: the region was reported free; VirtualAlloc fails cleanly if it was taken since.
        let pointer = unsafe {
            VirtualAlloc(
                Some(candidate as *const c_void),
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        (!pointer.is_null()).then(|| Self {
            address: pointer as u64,
            size,
        })
    }

    fn address(&self) -> u64 {
        self.address
    }

    /// Copy `code` to the start of the page and make it execute-read.
    fn write_code(&self, code: &[u8]) -> Result<()> {
        if code.len() > self.size {
            return Err(Error::hook_failed(
                self.address,
                format!("Trampoline of {} bytes exceeds {} bytes", code.len(), self.size),
            ));
        }

        // SAFETY: the page is ours, committed read-write and at least `code.len()` long.
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), self.address as *mut u8, code.len());

            let mut old = PAGE_PROTECTION_FLAGS::default();
            VirtualProtect(
                self.address as *const c_void,
                self.size,
                PAGE_EXECUTE_READ,
                &mut old,
            )
            .map_err(|e| Error::hook_failed(self.address, format!("VirtualProtect failed: {}", e)))?;

            FlushInstructionCache(
                GetCurrentProcess(),
                Some(self.address as *const c_void),
                code.len(),
            )
            .map_err(|e| {
                Error::hook_failed(self.address, format!("FlushInstructionCache failed: {}", e))
            })?;
        }

        Ok(())
    }
}

#[cfg(target_os = "windows")]
impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        // SAFETY: the address came from VirtualAlloc and is released exactly once.
        if let Err(e) = unsafe { VirtualFree(self.address as *mut c_void, 0, MEM_RELEASE) } {
            warn!("Failed to release trampoline at {:#x}: {}", self.address, e);
        }
    }
}

/// Suspends every other thread of the process until dropped.
///
/// Instruction pointers of suspended threads are not inspected, so a thread
/// parked inside the bytes being rewritten resumes into the new code.
#[cfg(target_os = "windows")]
struct ThreadFreezer {
    threads: Vec<HANDLE>,
}

#[cfg(target_os = "windows")]
impl ThreadFreezer {
    /// Suspend every other thread of the process.
    ///
    /// Thread ids are gathered and handle storage reserved before the first
    /// thread is suspended. From then on until [`Drop`] nothing allocates.
    fn freeze() -> Self {
        let ids = other_thread_ids();
        let mut threads = Vec::with_capacity(ids.len());

        for id in ids.iter().copied() {
            // SAFETY: the handle is only used to suspend and later resume the thread,
            // and is closed either here or in Drop.
            unsafe {
                if let Ok(thread) = OpenThread(THREAD_SUSPEND_RESUME, false, id) {
                    if SuspendThread(thread) != u32::MAX {
                        threads.push(thread);
                    } else {
                        let _ = CloseHandle(thread);
                    }
                }
            }
        }

        Self { threads }
    }
}

/// Ids of every thread of this process except the calling one
#[cfg(target_os = "windows")]
fn other_thread_ids() -> Vec<u32> {
    let mut ids = Vec::new();

    // SAFETY: plain Toolhelp enumeration; the snapshot handle is closed before returning.
    unsafe {
        let snapshot = match CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Thread snapshot failed, patching without suspending: {}", e);
                return ids;
            }
        };

        let process_id = GetCurrentProcessId();
        let current_thread = GetCurrentThreadId();
        let mut entry = THREADENTRY32 {
            dwSize: std::mem::size_of::<THREADENTRY32>() as u32,
            ..Default::default()
        };

        let mut more = Thread32First(snapshot, &mut entry).is_ok();
        while more {
            if entry.th32OwnerProcessID == process_id && entry.th32ThreadID != current_thread {
                ids.push(entry.th32ThreadID);
            }
            more = Thread32Next(snapshot, &mut entry).is_ok();
        }

        let _ = CloseHandle(snapshot);
    }

    ids
}

#[cfg(target_os = "windows")]
impl Drop for ThreadFreezer {
    fn drop(&mut self) {
        for thread in self.threads.drain(..) {
            // SAFETY: each handle was suspended by us and is still open.
            unsafe {
                ResumeThread(thread);
                let _ = CloseHandle(thread);
            }
        }
    }
}
