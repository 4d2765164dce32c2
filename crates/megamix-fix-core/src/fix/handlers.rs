//! Hook handlers.
//!
//! Each handler is a plain struct so it can be driven in tests with a
//! hand-built [`Registers`] instead of a live hook.

use std::sync::Arc;

use tracing::error;

use crate::display::{NATIVE_ASPECT, Resolution};
use crate::fix::context::{FixContext, ResolutionLists};
use crate::fix::sites::{ListKind, ListWrite, RegisterCopy};
use crate::hook::{Gpr, InterceptHandler, Registers};
use crate::process::WriteMemory;

/// Overwrites a register with a constant on every hit
#[derive(Debug, Clone, Copy)]
pub struct ForceRegister {
    pub register: Gpr,
    pub value: u64,
}

impl InterceptHandler for ForceRegister {
    fn on_hit(&self, regs: &mut Registers) {
        regs.set_gpr(self.register, self.value);
    }
}

/// Widens the game's viewport to the whole window and feeds the window size
/// into the resolution lists.
pub struct ViewportSize<W> {
    context: Arc<FixContext>,
    writer: Arc<W>,
    zero: Vec<Gpr>,
    width: RegisterCopy,
    height: RegisterCopy,
    writes: Vec<ListWrite>,
}

impl<W: WriteMemory> ViewportSize<W> {
    pub fn new(
        context: Arc<FixContext>,
        writer: Arc<W>,
        zero: Vec<Gpr>,
        width: RegisterCopy,
        height: RegisterCopy,
        writes: Vec<ListWrite>,
    ) -> Self {
        Self {
            context,
            writer,
            zero,
            width,
            height,
            writes,
        }
    }

    fn write_lists(&self, lists: ResolutionLists, resolution: Resolution) {
        for write in &self.writes {
            let base = match write.list {
                ListKind::Internal => lists.internal,
                ListKind::Hud => lists.hud,
            };

            for (offset, value) in [
                (write.width_offset, resolution.width),
                (write.height_offset, resolution.height),
            ] {
                if let Err(e) = self.writer.write_i32(base + offset, value) {
                    error!("Viewport Size: {}", e);
                }
            }
        }
    }
}

impl<W: WriteMemory> InterceptHandler for ViewportSize<W> {
    fn on_hit(&self, regs: &mut Registers) {
        for reg in &self.zero {
            regs.set_gpr(*reg, 0);
        }

        let width = regs.gpr(self.width.from);
        let height = regs.gpr(self.height.from);
        regs.set_gpr(self.width.to, width);
        regs.set_gpr(self.height.to, height);

        // The game keeps these as 32-bit ints; the upper halves are garbage
        let resolution = Resolution::new(width as u32 as i32, height as u32 as i32);
        if !resolution.is_valid() {
            return;
        }

        self.context.update_resolution(resolution);

        if let Some(lists) = self.context.resolution_lists() {
            if self.context.mark_applied(resolution) {
                self.write_lists(lists, resolution);
            }
        }
    }
}

/// Stops the song selection text from scrolling off a non-16:9 screen
pub struct SuppressTextScroll {
    context: Arc<FixContext>,
    register: Gpr,
}

impl SuppressTextScroll {
    pub fn new(context: Arc<FixContext>, register: Gpr) -> Self {
        Self { context, register }
    }
}

impl InterceptHandler for SuppressTextScroll {
    fn on_hit(&self, regs: &mut Registers) {
        if !self.context.is_native_aspect() {
            regs.set_gpr(self.register, 0);
        }
    }
}

/// Stretches a HUD element to the full screen by rescaling one side of its
/// width/height pair.
pub struct HudScale {
    context: Arc<FixContext>,
    width_xmm: usize,
    height_xmm: usize,
}

impl HudScale {
    pub fn new(context: Arc<FixContext>, width_xmm: usize, height_xmm: usize) -> Self {
        Self {
            context,
            width_xmm,
            height_xmm,
        }
    }
}

impl InterceptHandler for HudScale {
    fn on_hit(&self, regs: &mut Registers) {
        let aspect = self.context.aspect_ratio();

        if aspect > NATIVE_ASPECT {
            let height = regs.xmm[self.height_xmm].f32(0);
            regs.xmm[self.width_xmm].set_f32(0, height * NATIVE_ASPECT);
        } else if aspect < NATIVE_ASPECT {
            let width = regs.xmm[self.width_xmm].f32(0);
            regs.xmm[self.height_xmm].set_f32(0, width / NATIVE_ASPECT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::sites::SiteTable;
    use crate::hook::Xmm;
    use crate::process::{MockMemory, MockMemoryBuilder, ReadMemory};

    const INTERNAL: u64 = 0x1000;
    const HUD: u64 = 0x1400;

    fn context_with_lists(desktop: Resolution) -> Arc<FixContext> {
        let context = Arc::new(FixContext::new(desktop));
        context.set_resolution_lists(ResolutionLists {
            internal: INTERNAL,
            hud: HUD,
        });
        context
    }

    fn memory() -> Arc<MockMemory> {
        Arc::new(MockMemoryBuilder::new().with_size(0x800).build())
    }

    fn runtime_viewport(
        context: Arc<FixContext>,
        memory: Arc<MockMemory>,
    ) -> ViewportSize<MockMemory> {
        let sites = SiteTable::builtin();
        let site = sites.viewport_size.sites[1].clone();
        ViewportSize::new(
            context,
            memory,
            site.zero,
            site.width,
            site.height,
            sites.resolution_lists.writes,
        )
    }

    #[test]
    fn test_force_register() {
        let mut regs = Registers {
            rcx: 1080,
            ..Default::default()
        };
        ForceRegister {
            register: Gpr::Rcx,
            value: 2160,
        }
        .on_hit(&mut regs);

        assert_eq!(regs.rcx, 2160);
    }

    #[test]
    fn test_viewport_moves_registers_and_writes_lists() {
        let context = context_with_lists(Resolution::new(1920, 1080));
        let memory = memory();
        let handler = runtime_viewport(context.clone(), memory.clone());

        let mut regs = Registers {
            rbx: 320,
            rsi: 40,
            r10: 2560,
            r8: 1080,
            r11: 1920,
            r9: 1080,
            ..Default::default()
        };
        handler.on_hit(&mut regs);

        assert_eq!((regs.rbx, regs.rsi), (0, 0));
        assert_eq!((regs.r11, regs.r9), (2560, 1080));
        assert_eq!(context.resolution(), Resolution::new(2560, 1080));

        assert_eq!(memory.writes().len(), 6);
        assert_eq!(memory.read_i32(INTERNAL + 0x1A4).unwrap(), 2560);
        assert_eq!(memory.read_i32(INTERNAL + 0x1A8).unwrap(), 1080);
        assert_eq!(memory.read_i32(INTERNAL + 0x1B8).unwrap(), 2560);
        assert_eq!(memory.read_i32(INTERNAL + 0x1BC).unwrap(), 1080);
        assert_eq!(memory.read_i32(HUD + 0x8).unwrap(), 2560);
        assert_eq!(memory.read_i32(HUD + 0xC).unwrap(), 1080);
    }

    #[test]
    fn test_viewport_unchanged_resolution_writes_nothing() {
        let context = context_with_lists(Resolution::new(1920, 1080));
        let memory = memory();
        let handler = runtime_viewport(context.clone(), memory.clone());

        let mut regs = Registers {
            r10: 3440,
            r8: 1440,
            ..Default::default()
        };
        handler.on_hit(&mut regs);
        memory.clear_writes();

        let mut again = Registers {
            r10: 3440,
            r8: 1440,
            ..Default::default()
        };
        handler.on_hit(&mut again);

        assert!(memory.writes().is_empty());
        assert_eq!((again.r11, again.r9), (3440, 1440));
    }

    #[test]
    fn test_viewport_first_report_writes_even_if_desktop_matches() {
        let context = context_with_lists(Resolution::new(2560, 1080));
        let memory = memory();
        let handler = runtime_viewport(context, memory.clone());

        let mut regs = Registers {
            r10: 2560,
            r8: 1080,
            ..Default::default()
        };
        handler.on_hit(&mut regs);

        assert_eq!(memory.writes().len(), 6);
    }

    #[test]
    fn test_viewport_truncates_to_32_bits() {
        let context = context_with_lists(Resolution::new(1920, 1080));
        let memory = memory();
        let handler = runtime_viewport(context.clone(), memory);

        let mut regs = Registers {
            r10: 0xFFFF_FFFF_0000_0A00,
            r8: 0x1234_5678_0000_0438,
            ..Default::default()
        };
        handler.on_hit(&mut regs);

        assert_eq!(context.resolution(), Resolution::new(2560, 1080));
    }

    #[test]
    fn test_viewport_ignores_zero_size() {
        let context = context_with_lists(Resolution::new(1920, 1080));
        let memory = memory();
        let handler = runtime_viewport(context.clone(), memory.clone());

        let mut regs = Registers {
            rbx: 7,
            ..Default::default()
        };
        handler.on_hit(&mut regs);

        assert_eq!(regs.rbx, 0);
        assert_eq!(context.resolution(), Resolution::new(1920, 1080));
        assert!(memory.writes().is_empty());
    }

    #[test]
    fn test_viewport_without_lists_only_tracks_resolution() {
        let context = Arc::new(FixContext::new(Resolution::new(1920, 1080)));
        let memory = memory();
        let handler = runtime_viewport(context.clone(), memory.clone());

        let mut regs = Registers {
            r10: 1600,
            r8: 1200,
            ..Default::default()
        };
        handler.on_hit(&mut regs);

        assert_eq!(context.resolution(), Resolution::new(1600, 1200));
        assert!(memory.writes().is_empty());
    }

    #[test]
    fn test_suppress_text_scroll() {
        let native = Arc::new(FixContext::new(Resolution::new(1920, 1080)));
        let wide = Arc::new(FixContext::new(Resolution::new(2560, 1080)));

        let mut regs = Registers {
            rax: 1,
            ..Default::default()
        };
        SuppressTextScroll::new(native, Gpr::Rax).on_hit(&mut regs);
        assert_eq!(regs.rax, 1);

        SuppressTextScroll::new(wide, Gpr::Rax).on_hit(&mut regs);
        assert_eq!(regs.rax, 0);
    }

    fn hud_regs(width: f32, height: f32) -> Registers {
        let mut regs = Registers::default();
        regs.xmm[11] = Xmm::from_f32s([width, 7.0, 7.0, 7.0]);
        regs.xmm[9] = Xmm::from_f32s([height, 7.0, 7.0, 7.0]);
        regs
    }

    #[test]
    fn test_hud_scale_wider_than_native() {
        let context = Arc::new(FixContext::new(Resolution::new(2560, 1080)));
        let mut regs = hud_regs(2560.0, 1080.0);

        HudScale::new(context, 11, 9).on_hit(&mut regs);

        assert!((regs.xmm[11].f32(0) - 1920.0).abs() < 1e-3);
        assert_eq!(regs.xmm[11].f32(1), 7.0);
        assert_eq!(regs.xmm[9].f32(0), 1080.0);
    }

    #[test]
    fn test_hud_scale_narrower_than_native() {
        let context = Arc::new(FixContext::new(Resolution::new(1600, 1200)));
        let mut regs = hud_regs(1600.0, 1200.0);

        HudScale::new(context, 11, 9).on_hit(&mut regs);

        assert_eq!(regs.xmm[11].f32(0), 1600.0);
        assert!((regs.xmm[9].f32(0) - 900.0).abs() < 1e-3);
    }

    #[test]
    fn test_hud_scale_native_is_untouched() {
        let context = Arc::new(FixContext::new(Resolution::new(1920, 1080)));
        let mut regs = hud_regs(1234.0, 567.0);

        HudScale::new(context, 11, 9).on_hit(&mut regs);

        assert_eq!(regs.xmm[11].f32(0), 1234.0);
        assert_eq!(regs.xmm[9].f32(0), 567.0);
    }
}
