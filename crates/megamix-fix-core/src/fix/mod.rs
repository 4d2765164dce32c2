//! Scans the game for every patch site and installs the hooks.

mod context;
pub mod handlers;
pub mod sites;

pub use context::{FixContext, ResolutionLists};
pub use handlers::{ForceRegister, HudScale, SuppressTextScroll, ViewportSize};
pub use sites::{
    HookGroup, HookSite, HudScaleSite, ListKind, ListWrite, PointerSite, RegisterCopy,
    RegisterOverride, ResolutionListSites, SITES_FILE_NAME, ScrollSite, Site, SiteTable,
    ViewportSite, load_sites, save_sites,
};

use std::sync::Arc;

use tracing::{error, info};

use crate::config::FixConfig;
use crate::hook::{InstallHook, InterceptHandler};
use crate::process::{ModuleImage, ReadMemory, WriteMemory, resolve, scan};

/// A hook placed by [`Fixer::apply`]
#[derive(Debug)]
pub struct InstalledHook<H> {
    pub name: String,
    pub address: u64,
    pub hook: H,
}

/// Everything [`Fixer::apply`] set up. Dropping it removes the hooks.
#[derive(Debug)]
pub struct InstalledFix<H> {
    context: Arc<FixContext>,
    hooks: Vec<InstalledHook<H>>,
}

impl<H> InstalledFix<H> {
    pub fn context(&self) -> &Arc<FixContext> {
        &self.context
    }

    pub fn hooks(&self) -> &[InstalledHook<H>] {
        &self.hooks
    }

    pub fn hook(&self, name: &str) -> Option<&InstalledHook<H>> {
        self.hooks.iter().find(|hook| hook.name == name)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Applies the site table to one module image.
///
/// Every feature stands alone: a pattern that is not found is logged and
/// only that feature is skipped.
pub struct Fixer<'a, R, W, I> {
    reader: &'a R,
    writer: Arc<W>,
    installer: &'a I,
    module: &'a ModuleImage,
    sites: &'a SiteTable,
}

impl<'a, R, W, I> Fixer<'a, R, W, I>
where
    R: ReadMemory,
    W: WriteMemory + 'static,
    I: InstallHook,
{
    pub fn new(
        reader: &'a R,
        writer: Arc<W>,
        installer: &'a I,
        module: &'a ModuleImage,
        sites: &'a SiteTable,
    ) -> Self {
        Self {
            reader,
            writer,
            installer,
            module,
            sites,
        }
    }

    pub fn apply(&self, config: &FixConfig, context: Arc<FixContext>) -> InstalledFix<I::Hook> {
        let mut installed = InstalledFix {
            context,
            hooks: Vec::new(),
        };

        if config.fix_resolution {
            self.resolve_resolution_lists(&installed.context);
            self.install_resolution_index(&mut installed);
            self.install_viewport_size(&mut installed);
        }

        if !config.stretch_hud && config.fix_resolution {
            self.install_song_select_text(&mut installed);
        }

        if config.stretch_hud {
            self.install_hud_width(&mut installed);
        }

        info!("Installed {} hook(s)", installed.len());
        installed
    }

    fn resolve_resolution_lists(&self, context: &FixContext) {
        let sites = &self.sites.resolution_lists;

        let internal = self.find_pointer_site(sites, &sites.internal);
        let hud = self.find_pointer_site(sites, &sites.hud);
        let (Some(internal), Some(hud)) = (internal, hud) else {
            error!("{}: Pattern scan(s) failed.", sites.name);
            return;
        };

        info!("{}: Address is {}", sites.internal.name, self.module.describe(internal));
        info!("{}: Address is {}", sites.hud.name, self.module.describe(hud));

        let resolved = resolve(
            self.reader,
            internal,
            sites.internal.operand_offset,
            sites.internal.kind,
        )
        .and_then(|internal| {
            resolve(self.reader, hud, sites.hud.operand_offset, sites.hud.kind)
                .map(|hud| ResolutionLists { internal, hud })
        });

        match resolved {
            Ok(lists)
                if !self.module.contains(lists.internal) || !self.module.contains(lists.hud) =>
            {
                error!(
                    "{}: Resolved outside {} (internal {:#x}, HUD {:#x}), ignoring",
                    sites.name, self.module.name, lists.internal, lists.hud
                );
            }
            Ok(lists) => {
                if !context.set_resolution_lists(lists) {
                    error!("{}: Already resolved, keeping the first result", sites.name);
                }
            }
            Err(e) => error!("{}: {}", sites.name, e),
        }
    }

    fn find_pointer_site(&self, group: &ResolutionListSites, site: &PointerSite) -> Option<u64> {
        match site.pattern() {
            Ok(pattern) => scan(self.reader, self.module, &pattern),
            Err(e) => {
                error!("{}: {}", group.name, e);
                None
            }
        }
    }

    fn install_resolution_index(&self, installed: &mut InstalledFix<I::Hook>) {
        self.install_group(installed, &self.sites.resolution_index, |site| {
            Box::new(ForceRegister {
                register: site.register,
                value: site.value,
            })
        });
    }

    fn install_viewport_size(&self, installed: &mut InstalledFix<I::Hook>) {
        let context = installed.context.clone();
        let writes = &self.sites.resolution_lists.writes;
        self.install_group(installed, &self.sites.viewport_size, |site| {
            Box::new(ViewportSize::new(
                context.clone(),
                self.writer.clone(),
                site.zero.clone(),
                site.width,
                site.height,
                writes.clone(),
            ))
        });
    }

    fn install_song_select_text(&self, installed: &mut InstalledFix<I::Hook>) {
        let context = installed.context.clone();
        self.install_group(installed, &self.sites.song_select_text, |site| {
            Box::new(SuppressTextScroll::new(context.clone(), site.register))
        });
    }

    fn install_hud_width(&self, installed: &mut InstalledFix<I::Hook>) {
        let context = installed.context.clone();
        self.install_group(installed, &self.sites.hud_width, |site| {
            Box::new(HudScale::new(
                context.clone(),
                site.width_xmm,
                site.height_xmm,
            ))
        });
    }

    /// Scan every site of a group and hook them only if all were found.
    fn install_group<S, F>(
        &self,
        installed: &mut InstalledFix<I::Hook>,
        group: &HookGroup<S>,
        make_handler: F,
    ) where
        S: Site,
        F: Fn(&S) -> Box<dyn InterceptHandler>,
    {
        let mut matches = Vec::with_capacity(group.sites.len());
        for site in &group.sites {
            let found = match site.hook_site().pattern() {
                Ok(pattern) => scan(self.reader, self.module, &pattern),
                Err(e) => {
                    error!("{}: {}", site.hook_site().name, e);
                    None
                }
            };
            matches.push(found);
        }

        if matches.is_empty() || matches.iter().any(Option::is_none) {
            if group.sites.len() == 1 {
                error!("{}: Pattern scan failed.", group.name);
            } else {
                error!("{}: Pattern scan(s) failed.", group.name);
            }
            return;
        }

        for (site, found) in group.sites.iter().zip(matches.into_iter().flatten()) {
            let hook_site = site.hook_site();
            info!("{}: Address is {}", hook_site.name, self.module.describe(found));

            let address = hook_site.hook_address(found);
            if installed.hooks.iter().any(|hook| hook.address == address) {
                error!(
                    "{}: {} is already hooked, skipping",
                    hook_site.name,
                    self.module.describe(address)
                );
                continue;
            }

            match self.installer.install(address, make_handler(site)) {
                Ok(hook) => installed.hooks.push(InstalledHook {
                    name: hook_site.name.clone(),
                    address,
                    hook,
                }),
                Err(e) => error!("{}: {}", hook_site.name, e),
            }
        }
    }
}
