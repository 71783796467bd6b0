//! Public entry point.
//!
//! `Engine` owns the device, the surface repository and every resource. Operations borrow the
//! shared state as a [`Ctx`] and the resource map separately, so two-resource operations can
//! touch the source and then the destination (which may be the same resource) in turn.

use hashbrown::HashMap;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::desktop::Desktop;
use crate::device::{
    BltArgs, ColorFillArgs, CreateResourceArgs, Device, LockArgs, LockedRect, Palette, ResourceFlags, ResourceHandle,
    SysMemPtr, UnlockArgs,
};
use crate::error::{ResourceError, Result};
use crate::format::D3dFormat;
use crate::present::PresentationState;
use crate::rect::{Rect, Size};
use crate::repository::{RepositoryOpts, RepositoryStats, SurfaceRepository};
use crate::resource::{AuxSurfaces, Resource};
use crate::stats::{EngineStats, EngineStatsSnapshot};
use crate::tracker::{Representation, ValidFlags};

/// Once-per-engine diagnostics that have already been emitted.
#[derive(Debug, Default)]
pub(crate) struct Warnings {
    pub depth_resolve: bool,
    pub copy_failure: bool,
}

/// Shared engine state for one operation.
pub(crate) struct Ctx<'a, D: Device> {
    pub device: &'a mut D,
    pub repo: &'a mut SurfaceRepository,
    pub config: &'a Config,
    pub desktop: &'a dyn Desktop,
    pub palettes: &'a mut HashMap<u32, Palette>,
    pub presentation: &'a mut PresentationState,
    pub stats: &'a EngineStats,
    pub warnings: &'a mut Warnings,
}

pub struct Engine<D: Device> {
    device: D,
    repo: SurfaceRepository,
    config: Config,
    desktop: Box<dyn Desktop + Send>,
    resources: HashMap<ResourceHandle, Resource>,
    palettes: HashMap<u32, Palette>,
    presentation: PresentationState,
    primary: Option<ResourceHandle>,
    stats: EngineStats,
    warnings: Warnings,
}

impl<D: Device> Engine<D> {
    pub fn new(device: D, config: Config, desktop: impl Desktop + Send + 'static) -> Self {
        Self::with_repository_opts(device, config, desktop, RepositoryOpts::default())
    }

    pub fn with_repository_opts(
        device: D,
        config: Config,
        desktop: impl Desktop + Send + 'static,
        opts: RepositoryOpts,
    ) -> Self {
        Self {
            device,
            repo: SurfaceRepository::new(opts),
            config,
            desktop: Box::new(desktop),
            resources: HashMap::new(),
            palettes: HashMap::new(),
            presentation: PresentationState::default(),
            primary: None,
            stats: EngineStats::new(),
            warnings: Warnings::default(),
        }
    }

    fn split(&mut self) -> (Ctx<'_, D>, &mut HashMap<ResourceHandle, Resource>) {
        (
            Ctx {
                device: &mut self.device,
                repo: &mut self.repo,
                config: &self.config,
                desktop: &*self.desktop,
                palettes: &mut self.palettes,
                presentation: &mut self.presentation,
                stats: &self.stats,
                warnings: &mut self.warnings,
            },
            &mut self.resources,
        )
    }

    fn with_resource<T>(
        &mut self,
        handle: ResourceHandle,
        f: impl FnOnce(&mut Ctx<'_, D>, &mut Resource) -> Result<T>,
    ) -> Result<T> {
        let (mut ctx, resources) = self.split();
        let res = resources
            .get_mut(&handle)
            .ok_or(ResourceError::UnknownResource(handle))?;
        f(&mut ctx, res)
    }

    fn resource(&self, handle: ResourceHandle) -> Result<&Resource> {
        self.resources
            .get(&handle)
            .ok_or(ResourceError::UnknownResource(handle))
    }

    pub fn create_resource(&mut self, args: &CreateResourceArgs) -> Result<ResourceHandle> {
        debug!(
            format = ?args.format,
            pool = ?args.pool,
            flags = ?args.flags,
            surfaces = args.surface_count(),
            "create resource"
        );
        let (mut ctx, resources) = self.split();
        let res = ctx.construct(args)?;
        let handle = res.handle;
        let match_gdi = res.has(ResourceFlags::MATCH_GDI_PRIMARY);
        let size = res.size(0);
        resources.insert(handle, res);
        if match_gdi {
            ctx.set_fullscreen_mode(size, true);
        }
        Ok(handle)
    }

    pub fn destroy_resource(&mut self, handle: ResourceHandle) -> Result<()> {
        let res = self
            .resources
            .remove(&handle)
            .ok_or(ResourceError::UnknownResource(handle))?;
        for other in self.resources.values_mut() {
            if other.palettized_texture == Some(handle) {
                other.palettized_texture = None;
            }
        }
        if self.primary == Some(handle) {
            self.primary = None;
        }

        let match_gdi = res.has(ResourceFlags::MATCH_GDI_PRIMARY);
        let size = res.size(0);
        let (mut ctx, _) = self.split();
        if match_gdi {
            ctx.set_fullscreen_mode(size, false);
        }
        ctx.destroy(res)
    }

    pub fn lock(&mut self, args: &LockArgs) -> Result<LockedRect> {
        self.with_resource(args.resource, |ctx, res| ctx.lock(res, args))
    }

    pub fn unlock(&mut self, args: &UnlockArgs) -> Result<()> {
        self.with_resource(args.resource, |ctx, res| {
            res.check_sub_resource(args.sub_resource)?;
            ctx.unlock(res, args)
        })
    }

    pub fn blt(&mut self, args: &BltArgs) -> Result<()> {
        let (mut ctx, resources) = self.split();
        ctx.blt(resources, args)
    }

    pub fn color_fill(&mut self, args: &ColorFillArgs) -> Result<()> {
        self.with_resource(args.resource, |ctx, res| ctx.color_fill(res, args))
    }

    pub fn load_sys_mem_resource(&mut self, handle: ResourceHandle, sub_resource: u32) -> Result<()> {
        self.with_resource(handle, |ctx, res| {
            res.check_sub_resource(sub_resource)?;
            ctx.load_sys_mem(res, sub_resource)
        })
    }

    pub fn load_vid_mem_resource(&mut self, handle: ResourceHandle, sub_resource: u32) -> Result<()> {
        self.with_resource(handle, |ctx, res| {
            res.check_sub_resource(sub_resource)?;
            ctx.load_vid_mem(res, sub_resource)
        })
    }

    pub fn load_msaa_resource(&mut self, handle: ResourceHandle, sub_resource: u32) -> Result<()> {
        self.with_resource(handle, |ctx, res| {
            res.check_sub_resource(sub_resource)?;
            ctx.load_msaa(res, sub_resource)
        })
    }

    pub fn load_msaa_resolved_resource(&mut self, handle: ResourceHandle, sub_resource: u32) -> Result<()> {
        self.with_resource(handle, |ctx, res| {
            res.check_sub_resource(sub_resource)?;
            ctx.load_msaa_resolved(res, sub_resource)
        })
    }

    pub fn load_from_lock_ref_resource(&mut self, handle: ResourceHandle, sub_resource: u32) -> Result<()> {
        self.with_resource(handle, |ctx, res| {
            res.check_sub_resource(sub_resource)?;
            ctx.load_from_lock_ref(res, sub_resource)
        })
    }

    /// Makes the representation a draw call samples current and returns its handle.
    pub fn prepare_for_gpu_read(&mut self, handle: ResourceHandle, sub_resource: u32) -> Result<ResourceHandle> {
        self.with_resource(handle, |ctx, res| {
            res.check_sub_resource(sub_resource)?;
            ctx.prepare_for_gpu_read(res, sub_resource)
        })
    }

    /// Makes the representation a draw call renders into current and exclusively valid, and
    /// returns its handle.
    pub fn prepare_for_gpu_write(&mut self, handle: ResourceHandle, sub_resource: u32) -> Result<ResourceHandle> {
        self.with_resource(handle, |ctx, res| {
            res.check_sub_resource(sub_resource)?;
            ctx.prepare_for_gpu_write(res, sub_resource)
        })
    }

    /// Marks `handle` as the primary surface and reconfigures it.
    pub fn set_as_primary(&mut self, handle: ResourceHandle) -> Result<()> {
        self.with_resource(handle, |ctx, res| {
            res.is_primary = true;
            ctx.update_config(res)
        })?;
        self.primary = Some(handle);
        Ok(())
    }

    pub fn set_fullscreen_mode(&mut self, fullscreen: bool) {
        let size = match self.primary.and_then(|h| self.resources.get(&h)) {
            Some(primary) => primary.size(0),
            None => self.desktop.monitor_rect().size(),
        };
        let (mut ctx, _) = self.split();
        ctx.set_fullscreen_mode(size, fullscreen);
    }

    /// Presentation rectangle; empty outside fullscreen mode.
    pub fn presentation_rect(&self) -> Rect {
        self.presentation.rect
    }

    pub fn presentation_state(&self) -> PresentationState {
        self.presentation
    }

    /// Recomputes the fullscreen presentation rectangle for the new monitor geometry.
    pub fn on_display_mode_changed(&mut self) {
        if !self.presentation.is_fullscreen() {
            return;
        }
        self.set_fullscreen_mode(false);
        self.set_fullscreen_mode(true);
        debug!(rect = ?self.presentation.rect, "display mode changed");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replaces the configuration and reconfigures every resource.
    pub fn set_config(&mut self, config: Config) -> Result<()> {
        if self.config == config {
            return Ok(());
        }
        self.config = config;
        self.update_config()
    }

    /// Re-runs reconfiguration on every resource. Continues past failures and returns the first.
    pub fn update_config(&mut self) -> Result<()> {
        let mut handles: Vec<ResourceHandle> = self.resources.keys().copied().collect();
        handles.sort_unstable();

        let mut first_err = None;
        for handle in handles {
            if let Err(err) = self.with_resource(handle, |ctx, res| ctx.update_config(res)) {
                warn!(?handle, %err, "reconfiguration failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Stores palette contents and invalidates every palettized texture that uses it.
    pub fn set_palette(&mut self, palette_handle: u32, entries: &Palette) {
        self.palettes.insert(palette_handle, *entries);
        for res in self.resources.values_mut() {
            if res.palette_handle == palette_handle {
                res.is_palettized_texture_up_to_date = false;
            }
        }
    }

    pub fn set_palette_handle(&mut self, handle: ResourceHandle, palette_handle: u32) -> Result<()> {
        self.with_resource(handle, |_, res| {
            res.palette_handle = palette_handle;
            res.is_palettized_texture_up_to_date = false;
            Ok(())
        })
    }

    /// Links the `rgba` conversion texture to its 8-bit indexed `source`. A source feeds at most
    /// one conversion texture; linking a new one unlinks the previous.
    pub fn set_palettized_texture(&mut self, rgba: ResourceHandle, source: ResourceHandle) -> Result<()> {
        if !self.config.palettized_textures {
            return Err(ResourceError::Unsupported("palettized textures are disabled"));
        }
        let src = self.resource(source)?;
        if src.orig.format != D3dFormat::P8 {
            return Err(ResourceError::InvalidCall("palettized texture source must be P8"));
        }
        self.resource(rgba)?;

        for res in self.resources.values_mut() {
            if res.palettized_texture == Some(source) {
                res.palettized_texture = None;
            }
        }
        if let Some(res) = self.resources.get_mut(&rgba) {
            res.palettized_texture = Some(source);
            res.palette_color_key_index = None;
        }
        if let Some(src) = self.resources.get_mut(&source) {
            src.is_palettized_texture_up_to_date = false;
        }
        trace!(?rgba, ?source, "linked palettized texture");
        Ok(())
    }

    pub fn update_palettized_texture(&mut self, rgba: ResourceHandle, color_key_index: Option<u8>) -> Result<()> {
        let (mut ctx, resources) = self.split();
        ctx.update_palettized_texture(resources, rgba, color_key_index)
    }

    pub fn is_valid(&self, handle: ResourceHandle, sub_resource: u32, repr: Representation) -> Result<bool> {
        Ok(self.valid_flags(handle, sub_resource)?.contains(repr.flag()))
    }

    pub fn valid_flags(&self, handle: ResourceHandle, sub_resource: u32) -> Result<ValidFlags> {
        let res = self.resource(handle)?;
        res.check_sub_resource(sub_resource)?;
        Ok(res.tracker.valid(sub_resource))
    }

    pub fn resource_size(&self, handle: ResourceHandle, sub_resource: u32) -> Result<Size> {
        let res = self.resource(handle)?;
        res.check_sub_resource(sub_resource)?;
        Ok(res.size(sub_resource))
    }

    pub fn is_oversized(&self, handle: ResourceHandle) -> Result<bool> {
        Ok(self.resource(handle)?.is_oversized)
    }

    /// System-memory pointer of the sub-resource's mirror, when it has one.
    pub fn lock_ptr(&self, handle: ResourceHandle, sub_resource: u32) -> Result<Option<SysMemPtr>> {
        let res = self.resource(handle)?;
        res.check_sub_resource(sub_resource)?;
        Ok(res.lock_ptr(sub_resource))
    }

    pub fn aux_surfaces(&self, handle: ResourceHandle) -> Result<AuxSurfaces> {
        Ok(self.resource(handle)?.aux_surfaces())
    }

    pub fn resource_info(&self, handle: ResourceHandle) -> Option<&Resource> {
        self.resources.get(&handle)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn repository_stats(&self) -> RepositoryStats {
        self.repo.stats()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Destroys every resource, flushing as on destroy, and empties the repository.
    pub fn shutdown(&mut self) {
        let mut handles: Vec<ResourceHandle> = self.resources.keys().copied().collect();
        handles.sort_unstable();
        for handle in handles {
            if let Err(err) = self.destroy_resource(handle) {
                warn!(?handle, %err, "failed to destroy resource during shutdown");
            }
        }
        self.repo.clear(&mut self.device);
    }
}

impl<D: Device> Drop for Engine<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
