//! User configuration read from `MegaMixPlusFix.ini`.
//!
//! ```ini
//! [Fix Resolution]
//! Enabled = true
//!
//! [Stretch HUD]
//! Enabled = false
//! ```

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::error::{Error, Result};

/// Config file name, looked up next to the fix DLL
pub const CONFIG_FILE_NAME: &str = "MegaMixPlusFix.ini";

const SECTION_FIX_RESOLUTION: &str = "fix resolution";
const SECTION_STRETCH_HUD: &str = "stretch hud";

/// Feature toggles. Every toggle defaults to off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixConfig {
    /// `[Fix Resolution] Enabled`
    pub fix_resolution: bool,
    /// `[Stretch HUD] Enabled`
    pub stretch_hud: bool,
}

impl FixConfig {
    pub fn log(&self) {
        info!("Config Parse: bFixResolution: {}", self.fix_resolution);
        info!("Config Parse: bStretchHUD: {}", self.stretch_hud);
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<FixConfig> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::ConfigNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path)?;
    Ok(parse_config(&content))
}

/// Parse INI text.
///
/// Unknown sections, unknown keys and unparsable values are reported and
/// leave the defaults untouched; nothing here is fatal.
pub fn parse_config(content: &str) -> FixConfig {
    let mut config = FixConfig::default();
    let mut section = String::new();

    for (index, line) in content.lines().enumerate() {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.trim().to_lowercase();
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            warn!("Config line {}: expected 'key = value', got '{}'", index + 1, line);
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        let target = match (section.as_str(), key.as_str()) {
            (SECTION_FIX_RESOLUTION, "enabled") => &mut config.fix_resolution,
            (SECTION_STRETCH_HUD, "enabled") => &mut config.stretch_hud,
            _ => {
                warn!("Unknown config key: [{}] {} (value: {})", section, key, value);
                continue;
            }
        };

        match parse_bool(value) {
            Some(parsed) => *target = parsed,
            None => warn!(
                "Config line {}: '{}' is not a boolean, keeping {}",
                index + 1,
                value,
                target
            ),
        }
    }

    config
}

fn strip_comment(line: &str) -> &str {
    match line.find([';', '#']) {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
