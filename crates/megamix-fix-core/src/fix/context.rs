use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::{debug, error};

use crate::display::{DisplayGeometry, NATIVE_ASPECT, Resolution};

/// Addresses of the game's resolution tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionLists {
    pub internal: u64,
    pub hud: u64,
}

/// State shared by every hook handler.
///
/// Handlers run on whatever game thread reaches their site, so the hot path
/// only touches atomics. The full geometry sits behind a mutex that is taken
/// when the resolution changes.
#[derive(Debug)]
pub struct FixContext {
    current: AtomicU64,
    applied: AtomicU64,
    aspect_ratio: AtomicU32,
    geometry: Mutex<DisplayGeometry>,
    lists: OnceLock<ResolutionLists>,
}

impl FixContext {
    /// Start from the desktop resolution and log the initial geometry.
    ///
    /// An unusable desktop resolution falls back to the 1920x1080 canvas.
    pub fn new(desktop: Resolution) -> Self {
        let geometry = DisplayGeometry::compute(desktop).unwrap_or_else(|| {
            error!(
                "Current Resolution: Desktop resolution {} is invalid, using {} instead.",
                desktop,
                DisplayGeometry::native().resolution
            );
            DisplayGeometry::native()
        });
        geometry.log();

        Self {
            current: AtomicU64::new(geometry.resolution.pack()),
            // 0x0 is never a valid resolution, so the first report always applies
            applied: AtomicU64::new(Resolution::default().pack()),
            aspect_ratio: AtomicU32::new(geometry.aspect_ratio.to_bits()),
            geometry: Mutex::new(geometry),
            lists: OnceLock::new(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::unpack(self.current.load(Ordering::Acquire))
    }

    pub fn aspect_ratio(&self) -> f32 {
        f32::from_bits(self.aspect_ratio.load(Ordering::Acquire))
    }

    pub fn is_native_aspect(&self) -> bool {
        self.aspect_ratio() == NATIVE_ASPECT
    }

    pub fn geometry(&self) -> DisplayGeometry {
        *self.geometry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a resolution reported by the game.
    ///
    /// Returns true if it differs from the current one, in which case the
    /// geometry is recomputed and logged. Non-positive sizes are ignored.
    pub fn update_resolution(&self, resolution: Resolution) -> bool {
        if !resolution.is_valid() {
            debug!("Ignoring reported resolution {}", resolution);
            return false;
        }

        let packed = resolution.pack();
        if self.current.swap(packed, Ordering::AcqRel) == packed {
            return false;
        }

        let Some(geometry) = DisplayGeometry::compute(resolution) else {
            return false;
        };

        let mut slot = self.geometry.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = geometry;
        self.aspect_ratio
            .store(geometry.aspect_ratio.to_bits(), Ordering::Release);
        drop(slot);

        geometry.log();
        true
    }

    /// Remember `resolution` as written to the resolution lists.
    ///
    /// Returns false if it was already the last one written.
    pub fn mark_applied(&self, resolution: Resolution) -> bool {
        let packed = resolution.pack();
        self.applied.swap(packed, Ordering::AcqRel) != packed
    }

    /// Store the resolution list addresses. Only the first call has an effect.
    pub fn set_resolution_lists(&self, lists: ResolutionLists) -> bool {
        self.lists.set(lists).is_ok()
    }

    pub fn resolution_lists(&self) -> Option<ResolutionLists> {
        self.lists.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_from_desktop() {
        let context = FixContext::new(Resolution::new(2560, 1440));

        assert_eq!(context.resolution(), Resolution::new(2560, 1440));
        assert!(context.is_native_aspect());
        assert_eq!(context.geometry().hud_width, 2560.0);
    }

    #[test]
    fn test_new_with_invalid_desktop_uses_native() {
        let context = FixContext::new(Resolution::new(0, 0));

        assert_eq!(context.resolution(), Resolution::new(1920, 1080));
        assert_eq!(context.aspect_ratio(), NATIVE_ASPECT);
    }

    #[test]
    fn test_update_resolution_only_on_change() {
        let context = FixContext::new(Resolution::new(1920, 1080));

        assert!(!context.update_resolution(Resolution::new(1920, 1080)));
        assert!(context.update_resolution(Resolution::new(2560, 1080)));
        assert!(!context.update_resolution(Resolution::new(2560, 1080)));

        let geometry = context.geometry();
        assert_eq!(geometry.resolution, Resolution::new(2560, 1080));
        assert_eq!(geometry.hud_width_offset, 320.0);
        assert!(context.aspect_ratio() > NATIVE_ASPECT);
    }

    #[test]
    fn test_update_resolution_ignores_non_positive() {
        let context = FixContext::new(Resolution::new(1600, 1200));

        assert!(!context.update_resolution(Resolution::new(0, 1080)));
        assert!(!context.update_resolution(Resolution::new(-5, 1080)));
        assert_eq!(context.resolution(), Resolution::new(1600, 1200));
        assert!(context.aspect_ratio() < NATIVE_ASPECT);
    }

    #[test]
    fn test_mark_applied() {
        let context = FixContext::new(Resolution::new(1920, 1080));

        assert!(context.mark_applied(Resolution::new(1920, 1080)));
        assert!(!context.mark_applied(Resolution::new(1920, 1080)));
        assert!(context.mark_applied(Resolution::new(3440, 1440)));
    }

    #[test]
    fn test_resolution_lists_are_set_once() {
        let context = FixContext::new(Resolution::new(1920, 1080));
        assert_eq!(context.resolution_lists(), None);

        let lists = ResolutionLists {
            internal: 0x1000,
            hud: 0x2000,
        };
        assert!(context.set_resolution_lists(lists));
        assert!(!context.set_resolution_lists(ResolutionLists {
            internal: 0,
            hud: 0,
        }));
        assert_eq!(context.resolution_lists(), Some(lists));
    }
}
