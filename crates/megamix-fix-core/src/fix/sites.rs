//! Code sites patched in the game executable.
//!
//! Patterns, hook offsets and register roles were worked out against the
//! Steam build of Project DIVA Mega Mix+. They can be replaced at runtime by a
//! JSON file with the same shape as [`SiteTable::builtin`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hook::Gpr;
use crate::process::{OperandKind, Pattern};

/// Site table file name, looked up next to the fix DLL
pub const SITES_FILE_NAME: &str = "MegaMixPlusFix.sites.json";

/// Number of XMM registers captured by a hook
const XMM_COUNT: usize = 16;

/// A pattern whose match (plus `hook_offset`) is a hook address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSite {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub hook_offset: i64,
}

impl HookSite {
    pub fn new(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            hook_offset: 0,
        }
    }

    pub fn with_offset(mut self, hook_offset: i64) -> Self {
        self.hook_offset = hook_offset;
        self
    }

    pub fn pattern(&self) -> Result<Pattern> {
        self.pattern.parse()
    }

    /// Hook address for a pattern match
    pub fn hook_address(&self, matched: u64) -> u64 {
        matched.wrapping_add_signed(self.hook_offset)
    }
}

/// Access to the [`HookSite`] embedded in each kind of site
pub trait Site {
    fn hook_site(&self) -> &HookSite;
}

/// A pattern whose match holds an operand pointing at data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerSite {
    pub name: String,
    pub pattern: String,
    pub operand_offset: usize,
    #[serde(default)]
    pub kind: OperandKind,
}

impl PointerSite {
    pub fn pattern(&self) -> Result<Pattern> {
        self.pattern.parse()
    }
}

/// Which resolution list a write goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Internal,
    Hud,
}

/// One width/height pair inside a resolution list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListWrite {
    pub list: ListKind,
    pub width_offset: u64,
    pub height_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionListSites {
    pub name: String,
    pub internal: PointerSite,
    pub hud: PointerSite,
    /// Entries overwritten with the live resolution
    pub writes: Vec<ListWrite>,
}

/// Force a register to a constant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOverride {
    #[serde(flatten)]
    pub site: HookSite,
    pub register: Gpr,
    pub value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCopy {
    pub from: Gpr,
    pub to: Gpr,
}

/// Replace the game's 16:9-fitted viewport with the full window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSite {
    #[serde(flatten)]
    pub site: HookSite,
    /// Viewport offset registers, cleared on every hit
    pub zero: Vec<Gpr>,
    /// Full window width into the viewport width register
    pub width: RegisterCopy,
    /// Full window height into the viewport height register
    pub height: RegisterCopy,
}

/// Clear a register that would start horizontal text scrolling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollSite {
    #[serde(flatten)]
    pub site: HookSite,
    pub register: Gpr,
}

/// An XMM register pair holding HUD width and height in lane 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HudScaleSite {
    #[serde(flatten)]
    pub site: HookSite,
    pub width_xmm: usize,
    pub height_xmm: usize,
}

impl Site for RegisterOverride {
    fn hook_site(&self) -> &HookSite {
        &self.site
    }
}

impl Site for ViewportSite {
    fn hook_site(&self) -> &HookSite {
        &self.site
    }
}

impl Site for ScrollSite {
    fn hook_site(&self) -> &HookSite {
        &self.site
    }
}

impl Site for HudScaleSite {
    fn hook_site(&self) -> &HookSite {
        &self.site
    }
}

/// Sites that are installed together or not at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookGroup<S> {
    pub name: String,
    pub sites: Vec<S>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteTable {
    /// Informational label for the game build the table was made for.
    /// Only logged; nothing is compared against it.
    pub version: String,
    pub resolution_lists: ResolutionListSites,
    pub resolution_index: HookGroup<RegisterOverride>,
    pub viewport_size: HookGroup<ViewportSite>,
    pub song_select_text: HookGroup<ScrollSite>,
    pub hud_width: HookGroup<HudScaleSite>,
}

impl SiteTable {
    pub fn builtin() -> Self {
        Self {
            version: "*".to_string(),
            resolution_lists: ResolutionListSites {
                name: "Resolution List".to_string(),
                internal: PointerSite {
                    name: "Resolution List: Internal".to_string(),
                    pattern: "4C 8D ?? ?? ?? ?? ?? 48 ?? ?? ?? 42 ?? ?? ?? 41 ?? ?? ?? 42 ?? ?? ?? ?? 41 ?? ?? ??".to_string(),
                    operand_offset: 0x3,
                    kind: OperandKind::RipRelative,
                },
                hud: PointerSite {
                    name: "Resolution List: HUD".to_string(),
                    pattern: "66 0F ?? ?? ?? ?? ?? ?? F3 0F ?? ?? ?? 41 ?? 03 00 00 00 45 ?? ?? 8B ??".to_string(),
                    operand_offset: 0x4,
                    kind: OperandKind::RipRelative,
                },
                // The 3840x2160 entries
                writes: vec![
                    ListWrite {
                        list: ListKind::Internal,
                        width_offset: 0x1A4,
                        height_offset: 0x1A8,
                    },
                    ListWrite {
                        list: ListKind::Internal,
                        width_offset: 0x1B8,
                        height_offset: 0x1BC,
                    },
                    ListWrite {
                        list: ListKind::Hud,
                        width_offset: 0x8,
                        height_offset: 0xC,
                    },
                ],
            },
            resolution_index: HookGroup {
                name: "Resolution Index".to_string(),
                sites: vec![
                    RegisterOverride {
                        site: HookSite::new(
                            "Resolution Index (Startup)",
                            "41 ?? ?? 7E ?? FF ?? 48 FF ?? 48 83 ?? ?? 7C ?? EB ??",
                        ),
                        register: Gpr::Rcx,
                        value: 2160,
                    },
                    RegisterOverride {
                        site: HookSite::new(
                            "Resolution Index",
                            "8B ?? ?? ?? 8B ?? ?? ?? C6 44 ?? ?? 00 C6 44 ?? ?? 00",
                        ),
                        register: Gpr::Rax,
                        value: 3,
                    },
                ],
            },
            viewport_size: HookGroup {
                name: "Viewport Size".to_string(),
                sites: vec![
                    ViewportSite {
                        site: HookSite::new(
                            "Viewport Size (Startup)",
                            "45 ?? ?? ?? 41 ?? ?? ?? 45 ?? ?? ?? 45 ?? ?? ?? 66 0F ?? ?? ?? ?? ?? ?? F3 0F ?? ?? ??",
                        ),
                        zero: vec![Gpr::R10, Gpr::R9],
                        width: RegisterCopy {
                            from: Gpr::Rbx,
                            to: Gpr::R8,
                        },
                        height: RegisterCopy {
                            from: Gpr::Rdi,
                            to: Gpr::Rcx,
                        },
                    },
                    ViewportSite {
                        site: HookSite::new(
                            "Viewport Size",
                            "89 ?? ?? 48 8B ?? ?? ?? 89 ?? ?? 48 8B ?? ?? ?? 44 ?? ?? ?? 44 ?? ?? ?? 5F C3",
                        ),
                        zero: vec![Gpr::Rbx, Gpr::Rsi],
                        width: RegisterCopy {
                            from: Gpr::R10,
                            to: Gpr::R11,
                        },
                        height: RegisterCopy {
                            from: Gpr::R8,
                            to: Gpr::R9,
                        },
                    },
                ],
            },
            song_select_text: HookGroup {
                name: "HUD: Song Selection Text".to_string(),
                sites: vec![ScrollSite {
                    // The pattern is shared by similar code, so the hook sits well before it
                    site: HookSite::new(
                        "HUD: Song Selection Text",
                        "E8 ?? ?? ?? ?? C7 84 ?? ?? ?? ?? ?? 0D 00 00 00 C7 44 ?? ?? ?? ?? ?? ??",
                    )
                    .with_offset(-0x5D),
                    register: Gpr::Rax,
                }],
            },
            hud_width: HookGroup {
                name: "HUD: Width".to_string(),
                sites: vec![
                    HudScaleSite {
                        site: HookSite::new(
                            "HUD: Width: 1",
                            "F3 45 ?? ?? ?? F3 45 ?? ?? ?? F3 41 ?? ?? ?? F3 45 ?? ?? ?? E8 ?? ?? ?? ??",
                        ),
                        width_xmm: 11,
                        height_xmm: 9,
                    },
                    HudScaleSite {
                        site: HookSite::new(
                            "HUD: Width: 2",
                            "F3 0F ?? ?? F3 0F ?? ?? F3 0F ?? ?? ?? F3 0F ?? ?? ?? 48 8B ?? ?? ?? 48 83 ?? ?? 5F C3",
                        ),
                        width_xmm: 0,
                        height_xmm: 1,
                    },
                ],
            },
        }
    }

    /// Check every pattern parses and every register index exists
    pub fn validate(&self) -> Result<()> {
        self.resolution_lists.internal.pattern()?;
        self.resolution_lists.hud.pattern()?;
        validate_group(&self.resolution_index)?;
        validate_group(&self.viewport_size)?;
        validate_group(&self.song_select_text)?;
        validate_group(&self.hud_width)?;

        for site in &self.hud_width.sites {
            if site.width_xmm >= XMM_COUNT || site.height_xmm >= XMM_COUNT {
                return Err(Error::ConfigParseError(format!(
                    "{}: xmm{}/xmm{} is not a register",
                    site.site.name, site.width_xmm, site.height_xmm
                )));
            }
        }

        Ok(())
    }
}

fn validate_group<S: Site>(group: &HookGroup<S>) -> Result<()> {
    if group.sites.is_empty() {
        return Err(Error::ConfigParseError(format!("{}: no sites", group.name)));
    }
    for site in &group.sites {
        site.hook_site().pattern()?;
    }
    Ok(())
}

pub fn load_sites<P: AsRef<Path>>(path: P) -> Result<SiteTable> {
    let content = fs::read_to_string(&path)?;
    let sites: SiteTable = serde_json::from_str(&content)?;
    sites.validate()?;
    Ok(sites)
}

pub fn save_sites<P: AsRef<Path>>(path: P, sites: &SiteTable) -> Result<()> {
    let content = serde_json::to_string_pretty(sites)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_table_is_valid() {
        SiteTable::builtin().validate().unwrap();
    }

    #[test]
    fn test_builtin_pattern_lengths() {
        let sites = SiteTable::builtin();

        assert_eq!(sites.resolution_lists.internal.pattern().unwrap().len(), 28);
        assert_eq!(sites.resolution_lists.hud.pattern().unwrap().len(), 24);
        assert_eq!(sites.resolution_lists.writes.len(), 3);
        assert_eq!(sites.resolution_index.sites.len(), 2);
        assert_eq!(sites.viewport_size.sites.len(), 2);
        assert_eq!(sites.hud_width.sites.len(), 2);
    }

    #[test]
    fn test_hook_address_applies_offset() {
        let site = HookSite::new("test", "90").with_offset(-0x5D);
        assert_eq!(site.hook_address(0x1_4000_1000), 0x1_4000_1000 - 0x5D);
    }

    #[test]
    fn test_validate_rejects_bad_xmm_index() {
        let mut sites = SiteTable::builtin();
        sites.hud_width.sites[0].width_xmm = 16;

        assert!(matches!(sites.validate(), Err(Error::ConfigParseError(_))));
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let mut sites = SiteTable::builtin();
        sites.viewport_size.sites[1].site.pattern = "5F XX".to_string();

        assert!(matches!(sites.validate(), Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn test_save_and_load_sites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SITES_FILE_NAME);
        let sites = SiteTable::builtin();

        save_sites(&path, &sites).unwrap();
        let loaded = load_sites(&path).unwrap();

        assert_eq!(loaded, sites);
    }

    #[test]
    fn test_load_sites_defaults_offsets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SITES_FILE_NAME);

        let mut json = serde_json::to_value(SiteTable::builtin()).unwrap();
        let index = &mut json["resolution_index"]["sites"][0];
        index.as_object_mut().unwrap().remove("hook_offset");
        json["resolution_lists"]["hud"]
            .as_object_mut()
            .unwrap()
            .remove("kind");
        fs::write(&path, json.to_string()).unwrap();

        let loaded = load_sites(&path).unwrap();
        assert_eq!(loaded.resolution_index.sites[0].site.hook_offset, 0);
        assert_eq!(loaded.resolution_lists.hud.kind, OperandKind::RipRelative);
    }
}
