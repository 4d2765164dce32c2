#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

use std::path::{Path, PathBuf};

use chrono::DateTime;
use megamix_fix_core::fix::load_sites;
use megamix_fix_core::{
    CONFIG_FILE_NAME, FIX_NAME, FIX_VERSION, ModuleImage, SITES_FILE_NAME, SiteTable,
};
use tracing::{error, info, warn};

#[cfg(target_os = "windows")]
use std::sync::Arc;

#[cfg(target_os = "windows")]
use anyhow::{Context, Result};
#[cfg(target_os = "windows")]
use megamix_fix_core::process::module_path;
#[cfg(target_os = "windows")]
use megamix_fix_core::{
    Error, FixContext, Fixer, InstalledFix, LocalMemory, MidHook, MidHookInstaller, load_config,
};
#[cfg(target_os = "windows")]
use windows::Win32::Foundation::HMODULE;
#[cfg(target_os = "windows")]
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
#[cfg(target_os = "windows")]
use windows::core::PCWSTR;

#[cfg(target_os = "windows")]
use crate::desktop::desktop_resolution;
#[cfg(target_os = "windows")]
use crate::logging;

/// Where the fix reads and writes its files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixPaths {
    /// Directory holding the fix DLL
    pub fix_dir: PathBuf,
    /// Directory holding the game executable
    pub exe_dir: PathBuf,
}

impl FixPaths {
    pub fn new(dll_path: &Path, exe_path: &Path) -> Self {
        Self {
            fix_dir: parent_dir(dll_path),
            exe_dir: parent_dir(exe_path),
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.exe_dir.join(format!("{}.log", FIX_NAME))
    }

    pub fn config_file(&self) -> PathBuf {
        self.fix_dir.join(CONFIG_FILE_NAME)
    }

    pub fn sites_file(&self) -> PathBuf {
        self.fix_dir.join(SITES_FILE_NAME)
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// The site table override next to the DLL, or the builtin table
pub fn load_site_table(path: &Path) -> SiteTable {
    if !path.is_file() {
        return SiteTable::builtin();
    }

    match load_sites(path) {
        Ok(sites) => {
            info!("Site table: {} (version {})", path.display(), sites.version);
            sites
        }
        Err(e) => {
            error!(
                "Site table: Failed to load {}: {}. Using builtin sites.",
                path.display(),
                e
            );
            SiteTable::builtin()
        }
    }
}

/// Render a PE timestamp like `1700000000 (2023-11-14 22:13:20 UTC)`
pub fn format_timestamp(timestamp: u32) -> String {
    match DateTime::from_timestamp(timestamp as i64, 0) {
        Some(time) => format!("{} ({})", timestamp, time.format("%Y-%m-%d %H:%M:%S UTC")),
        None => timestamp.to_string(),
    }
}

pub fn log_header(paths: &FixPaths, exe: &ModuleImage, exe_path: &Path, timestamp: Option<u32>) {
    info!("----------");
    info!("{} v{} loaded.", FIX_NAME, FIX_VERSION);
    info!("----------");
    info!("Log file: {}", paths.log_file().display());
    info!("----------");
    info!("Module Name: {}", exe.name);
    info!("Module Path: {}", exe_path.display());
    info!("Module Address: {:#x}", exe.base);
    match timestamp {
        Some(timestamp) => info!("Module Timestamp: {}", format_timestamp(timestamp)),
        None => warn!("Module Timestamp: unavailable"),
    }
    info!("----------");
}

/// Load everything and install the hooks.
///
/// Errors returned from here are fatal: the caller reports them and unloads
/// the fix, leaving the game untouched.
#[cfg(target_os = "windows")]
pub fn run(this_module: HMODULE) -> Result<InstalledFix<MidHook>> {
    // SAFETY: a null name asks for the handle of the process executable.
    let exe_module = unsafe { GetModuleHandleW(PCWSTR::null()) }
        .context("Could not get the game executable")?;
    let exe_path = module_path(exe_module)?;
    let paths = FixPaths::new(&module_path(this_module)?, &exe_path);

    logging::init(&paths.log_file())?;

    let memory = LocalMemory::new();
    let exe = ModuleImage::from_handle(exe_module)?;
    log_header(&paths, &exe, &exe_path, exe.timestamp(&memory).ok());

    let config = match load_config(paths.config_file()) {
        Ok(config) => config,
        Err(Error::ConfigNotFound(path)) => {
            error!("ERROR: Could not locate config file {}", CONFIG_FILE_NAME);
            anyhow::bail!(
                "Could not locate config file.\nMake sure {} is located in {}",
                CONFIG_FILE_NAME,
                path.parent().unwrap_or(&paths.fix_dir).display()
            );
        }
        Err(e) => return Err(e).context("Failed to read config file"),
    };
    info!("Config file: {}", paths.config_file().display());
    info!("----------");
    config.log();
    info!("----------");

    let sites = load_site_table(&paths.sites_file());
    let context = Arc::new(FixContext::new(desktop_resolution()));

    let installer = MidHookInstaller::new();
    let fixer = Fixer::new(&memory, Arc::new(memory), &installer, &exe, &sites);
    Ok(fixer.apply(&config, context))
}
