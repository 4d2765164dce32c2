//! Mid-function hooks with a mutable register snapshot.
//!
//! A hook replaces a few instructions at an arbitrary address with a jump to a
//! generated trampoline. The trampoline saves the CPU state, hands it to an
//! [`InterceptHandler`], loads the (possibly modified) state back and then
//! runs the displaced instructions before returning to the original code.

mod installer;
pub mod registers;
pub mod trampoline;

pub use installer::{MidHook, MidHookInstaller};
pub use registers::{Gpr, Registers, Xmm};

use crate::error::Result;

/// Code run every time execution passes a hook site.
///
/// Handlers run inline on game threads and must not block.
pub trait InterceptHandler: Send + Sync {
    fn on_hit(&self, regs: &mut Registers);
}

impl<F> InterceptHandler for F
where
    F: Fn(&mut Registers) + Send + Sync,
{
    fn on_hit(&self, regs: &mut Registers) {
        self(regs)
    }
}

/// Trait for placing hooks, so setup code can be tested without patching code
pub trait InstallHook {
    /// Handle that keeps the hook alive
    type Hook;

    fn install(&self, address: u64, handler: Box<dyn InterceptHandler>) -> Result<Self::Hook>;
}
