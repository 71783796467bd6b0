//! The `Resource` entity: construction, lock strategy and reconfiguration.
//!
//! A resource owns its driver handle, the original and fixed creation requests, one
//! [`LockEntry`](crate::tracker::LockEntry) per sub-resource and up to four leased auxiliary
//! surfaces (multisample, resolved, null stand-in, lock reference). Auxiliary surfaces exist
//! exactly when the active multisample/format/scale configuration needs them; reconfiguration
//! pulls anything held only there back into video memory before returning them.

use tracing::{debug, trace, warn};

use crate::config::Antialiasing;
use crate::device::{
    CreateResourceArgs, Device, LockArgs, LockFlags, LockedRect, MultisampleConfig, Pool,
    ResourceFlags, ResourceHandle, SurfaceInfo, SysMemPtr, UnlockArgs,
};
use crate::engine::Ctx;
use crate::error::{ResourceError, Result};
use crate::fixup::{check_create_args, fix_resource_data, format_config, ConstructionContext};
use crate::format::{format_info, D3dFormat, FormatInfo};
use crate::rect::{Rect, Size};
use crate::repository::{Surface, SurfaceCaps, SurfaceDesc};
use crate::tracker::{LockEntry, Representation, Tracker, ValidFlags};

const LOCK_BUFFER_ALIGNMENT: usize = 32;

/// Zeroed staging memory shared by every sub-resource of one resource.
#[derive(Debug)]
struct LockBuffer {
    storage: Vec<u8>,
    base: usize,
}

impl LockBuffer {
    fn new(size: usize) -> Self {
        let storage = vec![0u8; size + LOCK_BUFFER_ALIGNMENT];
        let base = storage.as_ptr().align_offset(LOCK_BUFFER_ALIGNMENT);
        Self { storage, base }
    }

    fn ptr_at(&mut self, offset: usize) -> Option<SysMemPtr> {
        let start = self.base + offset;
        SysMemPtr::new(self.storage.get_mut(start..)?.as_mut_ptr())
    }
}

/// Handles of the auxiliary surfaces a resource currently leases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuxSurfaces {
    pub msaa: Option<ResourceHandle>,
    pub msaa_resolved: Option<ResourceHandle>,
    pub null: Option<ResourceHandle>,
    pub lock_ref: Option<ResourceHandle>,
}

#[derive(Debug)]
pub struct Resource {
    pub(crate) handle: ResourceHandle,
    pub(crate) orig: CreateResourceArgs,
    pub(crate) fixed: CreateResourceArgs,
    pub(crate) format_info: FormatInfo,
    pub(crate) tracker: Tracker,

    pub(crate) lock_resource: Option<ResourceHandle>,
    lock_buffer: Option<LockBuffer>,

    pub(crate) msaa: Option<Surface>,
    pub(crate) msaa_resolved: Option<Surface>,
    pub(crate) null_surface: Option<Surface>,
    pub(crate) lock_ref: Option<Surface>,

    pub(crate) format_config: D3dFormat,
    pub(crate) multisample_config: MultisampleConfig,
    pub(crate) scaled_size: Size,

    pub(crate) palettized_texture: Option<ResourceHandle>,
    pub(crate) palette_handle: u32,
    pub(crate) palette_color_key_index: Option<u8>,
    pub(crate) is_palettized_texture_up_to_date: bool,

    pub(crate) is_oversized: bool,
    pub(crate) is_primary: bool,
}

impl Resource {
    fn new(handle: ResourceHandle, orig: CreateResourceArgs, fixed: CreateResourceArgs, is_oversized: bool) -> Self {
        let format_info = format_info(fixed.format);
        let size = fixed.surfaces.first().map(SurfaceInfo::size).unwrap_or_default();
        Self {
            handle,
            format_config: fixed.format,
            orig,
            fixed,
            format_info,
            tracker: Tracker::default(),
            lock_resource: None,
            lock_buffer: None,
            msaa: None,
            msaa_resolved: None,
            null_surface: None,
            lock_ref: None,
            multisample_config: MultisampleConfig::NONE,
            scaled_size: size,
            palettized_texture: None,
            palette_handle: 0,
            palette_color_key_index: None,
            is_palettized_texture_up_to_date: false,
            is_oversized,
            is_primary: false,
        }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn orig_args(&self) -> &CreateResourceArgs {
        &self.orig
    }

    pub fn fixed_args(&self) -> &CreateResourceArgs {
        &self.fixed
    }

    pub fn format(&self) -> D3dFormat {
        self.fixed.format
    }

    pub fn pool(&self) -> Pool {
        self.fixed.pool
    }

    pub fn flags(&self) -> ResourceFlags {
        self.fixed.flags
    }

    pub fn is_oversized(&self) -> bool {
        self.is_oversized
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn scaled_size(&self) -> Size {
        self.scaled_size
    }

    pub fn multisample_config(&self) -> MultisampleConfig {
        self.multisample_config
    }

    pub fn has_mirror(&self) -> bool {
        self.lock_resource.is_some()
    }

    pub fn aux_surfaces(&self) -> AuxSurfaces {
        AuxSurfaces {
            msaa: self.msaa.as_ref().map(Surface::handle),
            msaa_resolved: self.msaa_resolved.as_ref().map(Surface::handle),
            null: self.null_surface.as_ref().map(Surface::handle),
            lock_ref: self.lock_ref.as_ref().map(Surface::handle),
        }
    }

    pub fn surface_count(&self) -> u32 {
        self.fixed.surface_count()
    }

    /// Logical size of `sub_resource`.
    pub fn size(&self, sub_resource: u32) -> Size {
        self.fixed
            .surfaces
            .get(sub_resource as usize)
            .map(SurfaceInfo::size)
            .unwrap_or_default()
    }

    pub fn rect(&self, sub_resource: u32) -> Rect {
        Rect::from_size(self.size(sub_resource))
    }

    pub fn is_valid_rect(&self, sub_resource: u32, rect: &Rect) -> bool {
        (sub_resource as usize) < self.fixed.surfaces.len() && rect.is_valid_within(self.size(sub_resource))
    }

    pub fn lock_ptr(&self, sub_resource: u32) -> Option<SysMemPtr> {
        self.tracker.entry(sub_resource).ok().and_then(|e| e.data)
    }

    pub(crate) fn has(&self, flag: ResourceFlags) -> bool {
        self.fixed.flags.contains(flag)
    }

    pub(crate) fn check_sub_resource(&self, sub_resource: u32) -> Result<()> {
        let count = self.surface_count();
        if sub_resource < count {
            Ok(())
        } else {
            Err(ResourceError::InvalidSubResource {
                index: sub_resource,
                count,
            })
        }
    }

    pub(crate) fn is_valid(&self, sub_resource: u32, repr: Representation) -> bool {
        self.tracker.is_valid(sub_resource, repr)
    }

    fn logical_size(&self) -> Size {
        self.size(0)
    }

    pub(crate) fn is_scaled(&self) -> bool {
        self.logical_size() != self.scaled_size
    }

    /// Maps a logical rectangle onto the active physical size.
    pub(crate) fn scale_rect(&self, rect: Rect) -> Rect {
        rect.scaled(self.logical_size(), self.scaled_size)
    }

    pub(crate) fn is_vid_mem_depth_buffer(&self) -> bool {
        self.fixed.pool != Pool::SystemMemory && self.orig.flags.contains(ResourceFlags::ZBUFFER)
    }

    /// Whether the engine keeps representation state for this resource beyond its native pool.
    pub(crate) fn is_tracked(&self) -> bool {
        self.lock_resource.is_some() || self.msaa_resolved.is_some()
    }
}

impl<D: Device> Ctx<'_, D> {
    /// Builds a resource. All-or-nothing: on failure nothing created here stays alive.
    pub(crate) fn construct(&mut self, orig: &CreateResourceArgs) -> Result<Resource> {
        check_create_args(orig)?;
        let fixed = fix_resource_data(
            orig,
            &ConstructionContext::none(),
            self.device.adapter_info(),
            self.desktop.real_monitor_rect(),
        );

        let handle = self.device.create_resource(&fixed.args)?;
        let mut res = Resource::new(handle, orig.clone(), fixed.args, fixed.is_oversized);

        // Depth buffers start with every tier they have valid, so their tracker is built once
        // the auxiliary surfaces exist. Everything else needs its mirror before reconfiguring.
        let vid_mem_depth = res.is_vid_mem_depth_buffer();
        if !vid_mem_depth {
            self.init_lock_data(&mut res);
        }
        if let Err(err) = self.update_config(&mut res) {
            let _ = self.teardown(&mut res);
            return Err(err);
        }
        if vid_mem_depth {
            self.init_lock_data(&mut res);
        }

        debug!(
            ?handle,
            format = ?res.fixed.format,
            pool = ?res.fixed.pool,
            oversized = res.is_oversized,
            mirror = res.lock_resource.is_some(),
            "created resource"
        );
        Ok(res)
    }

    /// Flushes anything only the auxiliary surfaces hold into the system mirror, then returns
    /// every surface and destroys the driver resources.
    pub(crate) fn destroy(&mut self, mut res: Resource) -> Result<()> {
        if res.lock_resource.is_some() {
            for sub in 0..res.tracker.len() {
                let valid = res.tracker.valid(sub);
                if !valid.contains(ValidFlags::SYS_MEM)
                    && valid.intersects(ValidFlags::MSAA | ValidFlags::MSAA_RESOLVED)
                {
                    if let Err(err) = self.load_sys_mem(&mut res, sub) {
                        warn!(handle = ?res.handle, sub_resource = sub, %err, "flush on destroy failed");
                    }
                }
            }
        }
        debug!(handle = ?res.handle, "destroying resource");
        self.teardown(&mut res)
    }

    fn teardown(&mut self, res: &mut Resource) -> Result<()> {
        self.release_aux(res);
        if let Some(lock) = res.lock_resource.take() {
            let _ = self.device.destroy_resource(lock);
        }
        res.lock_buffer = None;
        res.tracker.clear();
        self.device.destroy_resource(res.handle)
    }

    fn release_aux(&mut self, res: &mut Resource) {
        for surface in [
            res.msaa.take(),
            res.msaa_resolved.take(),
            res.null_surface.take(),
            res.lock_ref.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.repo.release(self.device, surface);
        }
    }

    fn init_lock_data(&mut self, res: &mut Resource) {
        let count = res.surface_count();
        if res.is_vid_mem_depth_buffer() {
            let mut valid = ValidFlags::SYS_MEM | ValidFlags::VID_MEM;
            if res.msaa.is_some() {
                valid |= ValidFlags::MSAA;
            }
            if res.msaa_resolved.is_some() {
                valid |= ValidFlags::MSAA_RESOLVED;
            }
            res.tracker = Tracker::new(count, valid);
        } else if res.fixed.pool == Pool::SystemMemory && res.format_info.bytes_per_pixel != 0 {
            res.tracker = Tracker::new(count, ValidFlags::SYS_MEM);
            for (entry, surface) in res.tracker.entries_mut().iter_mut().zip(&res.orig.surfaces) {
                entry.data = surface.sys_mem;
                entry.pitch = surface.sys_mem_pitch;
            }
        } else {
            self.create_lock_resource(res);
            if res.lock_resource.is_none() {
                let native = match res.fixed.pool {
                    Pool::SystemMemory => ValidFlags::SYS_MEM,
                    Pool::VideoMemory => ValidFlags::VID_MEM,
                };
                res.tracker = Tracker::new(count, native);
            }
        }
    }

    /// Allocates the aligned staging buffer for the whole sub-resource chain and wraps it in a
    /// system-memory driver resource. Leaves the resource without a mirror on failure.
    fn create_lock_resource(&mut self, res: &mut Resource) {
        let excluded = ResourceFlags::resource_type_flags() - ResourceFlags::RENDER_TARGET;
        let bpp = usize::from(res.format_info.bytes_per_pixel);
        if res.fixed.pool == Pool::SystemMemory || bpp == 0 || res.fixed.flags.intersects(excluded) {
            return;
        }

        let mut layout = Vec::with_capacity(res.fixed.surfaces.len());
        let mut offset = 0usize;
        for (i, s) in res.fixed.surfaces.iter().enumerate() {
            let pitch = (s.width as usize * bpp + 3) & !3;
            if i != 0 {
                let (prev_offset, prev_pitch, prev_height): (usize, usize, usize) = layout[i - 1];
                let prev_len = prev_pitch * prev_height;
                offset = prev_offset + prev_len.div_ceil(LOCK_BUFFER_ALIGNMENT) * LOCK_BUFFER_ALIGNMENT;
            }
            layout.push((offset, pitch, s.height as usize));
        }
        let size = layout
            .last()
            .map(|&(offset, pitch, height)| offset + pitch * height)
            .unwrap_or(0);

        let mut buffer = LockBuffer::new(size);
        let surfaces = res
            .fixed
            .surfaces
            .iter()
            .zip(&layout)
            .map(|(s, &(offset, pitch, _))| SurfaceInfo {
                width: s.width,
                height: s.height,
                depth: 0,
                sys_mem: buffer.ptr_at(offset),
                sys_mem_pitch: pitch as u32,
            })
            .collect::<Vec<_>>();

        let args = CreateResourceArgs {
            format: res.fixed.format,
            pool: Pool::SystemMemory,
            flags: ResourceFlags::empty(),
            multisample: MultisampleConfig::NONE,
            surfaces,
        };
        match self.device.create_resource(&args) {
            Ok(lock) => {
                trace!(handle = ?res.handle, ?lock, size, "created lock resource");
                let valid = ValidFlags::SYS_MEM | ValidFlags::VID_MEM;
                res.tracker = Tracker::new(args.surface_count(), valid);
                for (entry, s) in res.tracker.entries_mut().iter_mut().zip(&args.surfaces) {
                    *entry = LockEntry {
                        data: s.sys_mem,
                        pitch: s.sys_mem_pitch,
                        valid,
                        ref_locked: false,
                    };
                }
                res.lock_resource = Some(lock);
                res.lock_buffer = Some(buffer);
            }
            Err(err) => {
                debug!(handle = ?res.handle, %err, "lock resource creation failed");
            }
        }
    }

    fn wanted_multisample_config(&self, res: &Resource) -> MultisampleConfig {
        if self.config.antialiasing == Antialiasing::On
            && !res.has(ResourceFlags::TEXTURE)
            && (!res.is_primary || res.has(ResourceFlags::RENDER_TARGET))
        {
            self.device.multisample_config(res.fixed.format)
        } else {
            MultisampleConfig::NONE
        }
    }

    fn wanted_scaled_size(&self, res: &Resource) -> Size {
        let size = res.size(0);
        if res.has(ResourceFlags::TEXTURE) {
            size
        } else {
            self.device.scaled_size(size)
        }
    }

    /// Rebuilds the auxiliary surfaces when the multisample mode, render format or scale the
    /// resource should use has changed.
    pub(crate) fn update_config(&mut self, res: &mut Resource) -> Result<()> {
        if res.fixed.pool == Pool::SystemMemory
            || res.fixed.format == D3dFormat::P8
            || res.has(ResourceFlags::MATCH_GDI_PRIMARY)
            || (!res.is_primary && !res.has(ResourceFlags::RENDER_TARGET) && !res.has(ResourceFlags::ZBUFFER))
            || (!res.has(ResourceFlags::ZBUFFER) && res.lock_resource.is_none())
        {
            return Ok(());
        }

        let msaa = self.wanted_multisample_config(res);
        let format = format_config(res.fixed.format, self.config.render_color_depth);
        let scaled_size = self.wanted_scaled_size(res);
        if res.multisample_config == msaa && res.format_config == format && res.scaled_size == scaled_size {
            return Ok(());
        }

        if res.msaa.is_some() || res.msaa_resolved.is_some() {
            for sub in 0..res.tracker.len() {
                if res.is_valid(sub, Representation::Msaa) || res.is_valid(sub, Representation::MsaaResolved) {
                    self.load_vid_mem(res, sub)?;
                    if !res.tracker.any_valid(sub) {
                        res.tracker.add_valid(sub, Representation::VidMem);
                    }
                }
                res.tracker.invalidate(sub, Representation::Msaa);
                res.tracker.invalidate(sub, Representation::MsaaResolved);
                res.tracker.set_ref_locked(sub, false);
            }
        }

        // Anything that could not be flushed above is still video-memory only after this point.
        for sub in 0..res.tracker.len() {
            if !res.tracker.any_valid(sub) {
                res.tracker.add_valid(sub, Representation::VidMem);
            }
        }

        res.multisample_config = msaa;
        res.format_config = format;
        res.scaled_size = scaled_size;
        self.release_aux(res);
        self.stats.inc_reconfigurations();

        let is_scaled = res.is_scaled();
        if msaa.is_none() && res.fixed.format == format && !is_scaled {
            debug!(handle = ?res.handle, "reconfigured without auxiliary surfaces");
            return Ok(());
        }

        let zbuffer = res.has(ResourceFlags::ZBUFFER);
        let count = res.surface_count();
        let caps = if zbuffer {
            SurfaceCaps::ZBUFFER
        } else {
            SurfaceCaps::RENDER_TARGET
        } | SurfaceCaps::VIDEO_MEMORY;
        let desc = |format, caps| {
            SurfaceDesc::new(scaled_size.width, scaled_size.height, format, caps).with_surface_count(count)
        };

        if !msaa.is_none() {
            res.msaa = self.repo.get_surface(
                self.device,
                desc(format, caps),
                &ConstructionContext::none().with_msaa(msaa),
            );
        }

        let mut resolved_ctx = ConstructionContext::none();
        if zbuffer && res.msaa.is_some() && self.device.adapter_info().msaa_depth_resolve_supported {
            res.null_surface = self.repo.get_surface(
                self.device,
                desc(
                    D3dFormat::X8R8G8B8,
                    SurfaceCaps::RENDER_TARGET | SurfaceCaps::VIDEO_MEMORY,
                ),
                &ConstructionContext::none()
                    .with_format(D3dFormat::Null)
                    .with_msaa(msaa),
            );
            if res.null_surface.is_some() {
                resolved_ctx = resolved_ctx.with_format(D3dFormat::Intz);
            }
        }

        let (resolved_format, resolved_caps) = if zbuffer || !is_scaled {
            (format, caps)
        } else {
            (D3dFormat::A8R8G8B8, caps | SurfaceCaps::TEXTURE)
        };
        res.msaa_resolved = self
            .repo
            .get_surface(self.device, desc(resolved_format, resolved_caps), &resolved_ctx);

        if res.msaa_resolved.is_none() {
            if let Some(msaa_surface) = res.msaa.take() {
                self.repo.release(self.device, msaa_surface);
                res.msaa_resolved = self.repo.get_surface(
                    self.device,
                    desc(resolved_format, resolved_caps),
                    &ConstructionContext::none(),
                );
            }
        }

        if !zbuffer && res.msaa_resolved.is_some() {
            let logical = res.size(0);
            res.lock_ref = self.repo.get_surface(
                self.device,
                SurfaceDesc::new(
                    logical.width,
                    logical.height,
                    res.fixed.format,
                    SurfaceCaps::TEXTURE | SurfaceCaps::VIDEO_MEMORY,
                )
                .with_surface_count(count),
                &ConstructionContext::none(),
            );

            if is_scaled {
                self.prewarm_downscale_chain(res)?;
            }
        }

        debug!(
            handle = ?res.handle,
            ?msaa,
            ?format,
            width = scaled_size.width,
            height = scaled_size.height,
            aux = ?res.aux_surfaces(),
            "reconfigured resource"
        );
        Ok(())
    }

    pub(crate) fn lock(&mut self, res: &mut Resource, args: &LockArgs) -> Result<LockedRect> {
        trace!(handle = ?res.handle, sub_resource = args.sub_resource, flags = ?args.flags, "lock");
        if !res.fixed.multisample.is_none() {
            return Err(ResourceError::InvalidCall("multisampled resources cannot be locked"));
        }
        res.check_sub_resource(args.sub_resource)?;
        if !args.flags.contains(LockFlags::READ_ONLY) {
            res.is_palettized_texture_up_to_date = false;
        }

        if res.lock_resource.is_some() || res.is_oversized {
            return self.blt_lock(res, args);
        }

        if res.has(ResourceFlags::ZBUFFER) && res.msaa_resolved.is_some() {
            self.load_vid_mem(res, 0)?;
            if !args.flags.contains(LockFlags::READ_ONLY) {
                res.tracker.invalidate(0, Representation::Msaa);
                res.tracker.invalidate(0, Representation::MsaaResolved);
                if !res.tracker.any_valid(0) {
                    res.tracker.mark_valid(0, Representation::VidMem);
                }
            }
        }
        Ok(self.device.lock(args)?)
    }

    fn blt_lock(&mut self, res: &mut Resource, args: &LockArgs) -> Result<LockedRect> {
        let area_valid = args.flags.contains(LockFlags::AREA_VALID);
        if area_valid && !res.is_valid_rect(args.sub_resource, &args.area) {
            return Err(ResourceError::InvalidCall("lock area outside the sub-resource"));
        }
        if res.lock_resource.is_some() {
            if args.flags.contains(LockFlags::READ_ONLY) {
                self.prepare_for_cpu_read(res, args.sub_resource)?;
            } else {
                self.prepare_for_cpu_write(res, args.sub_resource)?;
            }
        }

        let entry = res.tracker.entry(args.sub_resource)?;
        let mut data = entry.data;
        if area_valid {
            let bpp = usize::from(res.format_info.bytes_per_pixel);
            let offset = args.area.top as usize * entry.pitch as usize + args.area.left as usize * bpp;
            // SAFETY: the area was checked against the sub-resource above, and the backing memory
            // spans `pitch * height` bytes.
            data = data.map(|p| unsafe { p.add(offset) });
        }
        Ok(LockedRect {
            data,
            pitch: entry.pitch,
        })
    }

    pub(crate) fn unlock(&mut self, res: &mut Resource, args: &UnlockArgs) -> Result<()> {
        trace!(handle = ?res.handle, sub_resource = args.sub_resource, "unlock");
        if res.lock_resource.is_some() || res.is_oversized {
            return Ok(());
        }
        Ok(self.device.unlock(args)?)
    }

    /// Issues a notify-only lock/unlock pair on the system-memory driver resource that backs
    /// `res`, after the engine touched its memory behind the driver's back.
    pub(crate) fn notify_lock(&mut self, res: &Resource, sub_resource: u32) -> Result<()> {
        let handle = match res.fixed.pool {
            Pool::SystemMemory => Some(res.handle),
            Pool::VideoMemory => res.lock_resource,
        };
        match handle {
            Some(handle) => self.notify_lock_handle(handle, sub_resource),
            None => Ok(()),
        }
    }

    pub(crate) fn notify_lock_handle(&mut self, handle: ResourceHandle, sub_resource: u32) -> Result<()> {
        self.device
            .lock(&LockArgs::new(handle, sub_resource, LockFlags::NOTIFY_ONLY))?;
        self.device.unlock(&UnlockArgs {
            resource: handle,
            sub_resource,
            notify_only: true,
        })?;
        Ok(())
    }
}
