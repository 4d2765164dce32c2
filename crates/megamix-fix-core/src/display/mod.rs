//! Display geometry derived from the active resolution.
//!
//! The game lays out its UI for a 16:9 canvas. Everything here is pure math
//! over the current resolution: the aspect ratio, how far it deviates from
//! 16:9, and the centred 16:9 HUD rectangle inside the screen.

use std::fmt;

use tracing::info;

/// Aspect ratio the game's UI is authored for (16:9)
pub const NATIVE_ASPECT: f32 = 16.0 / 9.0;

/// A screen resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resolution {
    pub width: i32,
    pub height: i32,
}

impl Resolution {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Both dimensions are strictly positive
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Pack into a single word for lock-free storage
    pub fn pack(self) -> u64 {
        ((self.width as u32 as u64) << 32) | self.height as u32 as u64
    }

    pub fn unpack(packed: u64) -> Self {
        Self {
            width: (packed >> 32) as u32 as i32,
            height: packed as u32 as i32,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Geometry derived from a resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayGeometry {
    pub resolution: Resolution,
    pub aspect_ratio: f32,
    /// `aspect_ratio / NATIVE_ASPECT`
    pub aspect_multiplier: f32,
    pub hud_width: f32,
    pub hud_height: f32,
    pub hud_width_offset: f32,
    pub hud_height_offset: f32,
}

impl DisplayGeometry {
    /// Compute the geometry for `resolution`.
    ///
    /// Returns `None` if either dimension is not positive; callers treat that
    /// as a no-op and keep their previous geometry. Zero dimensions never
    /// reach the desktop-resolution fallback because they fail this check.
    pub fn compute(resolution: Resolution) -> Option<Self> {
        if !resolution.is_valid() {
            return None;
        }

        let width = resolution.width as f32;
        let height = resolution.height as f32;
        let aspect_ratio = width / height;
        let aspect_multiplier = aspect_ratio / NATIVE_ASPECT;

        let geometry = if aspect_ratio >= NATIVE_ASPECT {
            // Wider: full height, pillarboxed width
            let hud_width = height * NATIVE_ASPECT;
            Self {
                resolution,
                aspect_ratio,
                aspect_multiplier,
                hud_width,
                hud_height: height,
                hud_width_offset: (width - hud_width) / 2.0,
                hud_height_offset: 0.0,
            }
        } else {
            // Narrower: full width, letterboxed height
            let hud_height = width / NATIVE_ASPECT;
            Self {
                resolution,
                aspect_ratio,
                aspect_multiplier,
                hud_width: width,
                hud_height,
                hud_width_offset: 0.0,
                hud_height_offset: (height - hud_height) / 2.0,
            }
        };

        Some(geometry)
    }

    /// Geometry of the 1920x1080 reference canvas
    pub fn native() -> Self {
        Self {
            resolution: Resolution::new(1920, 1080),
            aspect_ratio: NATIVE_ASPECT,
            aspect_multiplier: 1.0,
            hud_width: 1920.0,
            hud_height: 1080.0,
            hud_width_offset: 0.0,
            hud_height_offset: 0.0,
        }
    }

    pub fn is_native(&self) -> bool {
        self.aspect_ratio == NATIVE_ASPECT
    }

    pub fn log(&self) {
        info!("----------");
        info!("Current Resolution: Resolution: {}", self.resolution);
        info!("Current Resolution: fAspectRatio: {}", self.aspect_ratio);
        info!("Current Resolution: fAspectMultiplier: {}", self.aspect_multiplier);
        info!("Current Resolution: fHUDWidth: {}", self.hud_width);
        info!("Current Resolution: fHUDHeight: {}", self.hud_height);
        info!("Current Resolution: fHUDWidthOffset: {}", self.hud_width_offset);
        info!("Current Resolution: fHUDHeightOffset: {}", self.hud_height_offset);
        info!("----------");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-3;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < EPSILON,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_native_resolution() {
        let geometry = DisplayGeometry::compute(Resolution::new(1920, 1080)).unwrap();

        assert_eq!(geometry.aspect_ratio, NATIVE_ASPECT);
        assert!(geometry.is_native());
        assert_close(geometry.aspect_multiplier, 1.0);
        assert_close(geometry.hud_width, 1920.0);
        assert_close(geometry.hud_height, 1080.0);
        assert_close(geometry.hud_width_offset, 0.0);
        assert_close(geometry.hud_height_offset, 0.0);
    }

    #[test]
    fn test_ultrawide_resolution() {
        let geometry = DisplayGeometry::compute(Resolution::new(2560, 1080)).unwrap();

        assert_close(geometry.aspect_ratio, 2560.0 / 1080.0);
        assert!(geometry.aspect_ratio > NATIVE_ASPECT);
        assert_close(geometry.hud_width, 1920.0);
        assert_close(geometry.hud_height, 1080.0);
        assert_close(geometry.hud_width_offset, 320.0);
        assert_eq!(geometry.hud_height_offset, 0.0);
    }

    #[test]
    fn test_four_by_three_resolution() {
        let geometry = DisplayGeometry::compute(Resolution::new(1600, 1200)).unwrap();

        assert_close(geometry.aspect_ratio, 1600.0 / 1200.0);
        assert!(geometry.aspect_ratio < NATIVE_ASPECT);
        assert_close(geometry.hud_width, 1600.0);
        assert_close(geometry.hud_height, 900.0);
        assert_eq!(geometry.hud_width_offset, 0.0);
        assert_close(geometry.hud_height_offset, 150.0);
    }

    #[test]
    fn test_offsets_follow_aspect_for_common_resolutions() {
        let resolutions = [
            (1280, 720),
            (3840, 2160),
            (3440, 1440),
            (5120, 1440),
            (1280, 1024),
            (1920, 1200),
            (2560, 1600),
            (1024, 768),
            (800, 600),
            (1366, 768),
        ];

        for (width, height) in resolutions {
            let geometry = DisplayGeometry::compute(Resolution::new(width, height)).unwrap();
            let aspect = width as f32 / height as f32;

            assert_close(geometry.aspect_ratio, aspect);
            assert_close(geometry.aspect_multiplier, aspect / NATIVE_ASPECT);

            if geometry.aspect_ratio > NATIVE_ASPECT {
                assert!(geometry.hud_width_offset > 0.0, "{width}x{height}");
                assert_eq!(geometry.hud_height_offset, 0.0, "{width}x{height}");
            } else if geometry.aspect_ratio < NATIVE_ASPECT {
                assert!(geometry.hud_height_offset > 0.0, "{width}x{height}");
                assert_eq!(geometry.hud_width_offset, 0.0, "{width}x{height}");
            } else {
                assert_eq!(geometry.hud_width_offset, 0.0, "{width}x{height}");
                assert_eq!(geometry.hud_height_offset, 0.0, "{width}x{height}");
            }
        }
    }

    #[test]
    fn test_compute_is_idempotent() {
        let resolution = Resolution::new(3440, 1440);
        assert_eq!(
            DisplayGeometry::compute(resolution),
            DisplayGeometry::compute(resolution)
        );
    }

    #[test]
    fn test_non_positive_resolution_is_rejected() {
        assert!(DisplayGeometry::compute(Resolution::new(0, 1080)).is_none());
        assert!(DisplayGeometry::compute(Resolution::new(1920, 0)).is_none());
        assert!(DisplayGeometry::compute(Resolution::new(-1920, 1080)).is_none());
        assert!(DisplayGeometry::compute(Resolution::new(1920, -1)).is_none());
    }

    #[test]
    fn test_resolution_pack_roundtrip() {
        for resolution in [
            Resolution::new(2560, 1080),
            Resolution::new(0, 0),
            Resolution::new(-1, 7),
            Resolution::new(i32::MAX, i32::MIN),
        ] {
            assert_eq!(Resolution::unpack(resolution.pack()), resolution);
        }
    }

    #[test]
    fn test_native_geometry_matches_compute() {
        let computed = DisplayGeometry::compute(Resolution::new(1920, 1080)).unwrap();
        let native = DisplayGeometry::native();

        assert_eq!(computed.resolution, native.resolution);
        assert_close(computed.hud_width, native.hud_width);
        assert_close(computed.aspect_multiplier, native.aspect_multiplier);
    }
}
