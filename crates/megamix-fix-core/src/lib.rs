pub mod config;
pub mod display;
pub mod error;
pub mod fix;
pub mod hook;
pub mod process;

pub use config::{CONFIG_FILE_NAME, FixConfig, load_config, parse_config};
pub use display::{DisplayGeometry, NATIVE_ASPECT, Resolution};
pub use error::{Error, Result};
pub use fix::{FixContext, Fixer, InstalledFix, InstalledHook, SITES_FILE_NAME, SiteTable};
pub use hook::{InstallHook, InterceptHandler, MidHook, MidHookInstaller, Registers};
pub use process::{LocalMemory, ModuleImage, Pattern, ReadMemory, WriteMemory};

/// Name used for the log, config and site table files
pub const FIX_NAME: &str = "MegaMixPlusFix";
pub const FIX_VERSION: &str = env!("CARGO_PKG_VERSION");
