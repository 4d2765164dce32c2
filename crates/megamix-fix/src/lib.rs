//! MegaMixPlusFix: resolution and HUD fixes for Hatsune Miku: Project DIVA Mega Mix+.
//!
//! Loaded into the game by an ASI/DLL loader. `DllMain` only starts a worker
//! thread; all scanning and hooking happens there.

#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

#[cfg(target_os = "windows")]
mod desktop;
mod logging;
mod setup;

#[cfg(target_os = "windows")]
mod entry {
    use std::ffi::c_void;
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use megamix_fix_core::{FIX_NAME, FIX_VERSION, InstalledFix, MidHook};
    use tracing::error;
    use windows::Win32::Foundation::{BOOL, CloseHandle, HMODULE, TRUE};
    use windows::Win32::System::Console::AllocConsole;
    use windows::Win32::System::LibraryLoader::FreeLibraryAndExitThread;
    use windows::Win32::System::SystemServices::DLL_PROCESS_ATTACH;
    use windows::Win32::System::Threading::{
        CreateThread, SetThreadPriority, THREAD_CREATION_FLAGS, THREAD_PRIORITY_HIGHEST,
    };

    use crate::setup;

    /// Handle of this DLL, stored as an integer so it can live in a static
    static THIS_MODULE: AtomicUsize = AtomicUsize::new(0);

    /// Hooks stay installed until the process exits
    static INSTALLED: OnceLock<InstalledFix<MidHook>> = OnceLock::new();

    #[unsafe(no_mangle)]
    #[allow(non_snake_case)]
    pub extern "system" fn DllMain(module: HMODULE, reason: u32, _reserved: *mut c_void) -> BOOL {
        if reason == DLL_PROCESS_ATTACH {
            THIS_MODULE.store(module.0 as usize, Ordering::Release);

            // SAFETY: `worker` matches LPTHREAD_START_ROUTINE and takes no parameter.
            // The thread only starts running once the loader lock is released.
            unsafe {
                if let Ok(thread) =
                    CreateThread(None, 0, Some(worker), None, THREAD_CREATION_FLAGS(0), None)
                {
                    // Get ahead of the game's own startup code
                    let _ = SetThreadPriority(thread, THREAD_PRIORITY_HIGHEST);
                    let _ = CloseHandle(thread);
                }
            }
        }

        TRUE
    }

    unsafe extern "system" fn worker(_parameter: *mut c_void) -> u32 {
        let module = HMODULE(THIS_MODULE.load(Ordering::Acquire) as *mut c_void);

        match setup::run(module) {
            Ok(installed) => {
                let _ = INSTALLED.set(installed);
                1
            }
            Err(e) => unload(module, &e),
        }
    }

    /// Report a setup failure on a fresh console and unload the fix
    fn unload(module: HMODULE, err: &anyhow::Error) -> ! {
        error!("{:#}", err);

        // SAFETY: AllocConsole fails harmlessly if a console already exists.
        let _ = unsafe { AllocConsole() };
        println!("{} v{} loaded.", FIX_NAME, FIX_VERSION);
        println!("ERROR: {:#}", err);

        // SAFETY: no code of this DLL runs after this call returns control to the loader,
        // and no hooks were installed.
        unsafe { FreeLibraryAndExitThread(module, 1) }
    }
}
