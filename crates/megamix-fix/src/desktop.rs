use megamix_fix_core::Resolution;
use tracing::warn;
use windows::Win32::Graphics::Gdi::{DEVMODEW, ENUM_CURRENT_SETTINGS, EnumDisplaySettingsW};
use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};
use windows::core::PCWSTR;

/// Physical size of the primary display.
///
/// `GetSystemMetrics` reports DPI-scaled sizes for unaware processes, so it is
/// only the fallback.
pub fn desktop_resolution() -> Resolution {
    let mut mode = DEVMODEW {
        dmSize: std::mem::size_of::<DEVMODEW>() as u16,
        ..Default::default()
    };

    // SAFETY: `mode` is a properly sized DEVMODEW; a null device name means the primary display.
    if unsafe { EnumDisplaySettingsW(PCWSTR::null(), ENUM_CURRENT_SETTINGS, &mut mode) }.as_bool() {
        return Resolution::new(mode.dmPelsWidth as i32, mode.dmPelsHeight as i32);
    }

    warn!("EnumDisplaySettingsW failed, falling back to system metrics");
    // SAFETY: GetSystemMetrics has no preconditions.
    unsafe {
        Resolution::new(
            GetSystemMetrics(SM_CXSCREEN),
            GetSystemMetrics(SM_CYSCREEN),
        )
    }
}
