pub mod address;
mod module;
pub mod pattern;
mod reader;

// Mock process memory for testing (always available for unit and integration tests)
#[doc(hidden)]
pub mod mock;

pub use address::{OperandKind, resolve};
pub use module::{ModuleImage, read_pe_timestamp};
#[cfg(target_os = "windows")]
pub use module::module_path;
pub use pattern::{Pattern, scan};
pub use reader::{LocalMemory, ReadMemory, WriteMemory};

#[doc(hidden)]
pub use mock::{MockMemory, MockMemoryBuilder};
