//! Surface repository: leases auxiliary surfaces and hands out temporary staging surfaces.
//!
//! Leased surfaces live in an arena of slots addressed by `index + generation`; a lease owns no
//! memory. Released surfaces are retained in `(size, format, caps, multisample)` buckets for
//! reuse, bounded by [`RepositoryOpts`]; past the byte cap the least recently released surfaces
//! are destroyed. Temporary render targets, textures and system-memory surfaces are
//! repository-owned slots that grow to the largest size requested so far.

use std::collections::VecDeque;

use bitflags::bitflags;
use hashbrown::HashMap;
use tracing::{debug, trace};

use crate::device::{
    CreateResourceArgs, Device, MultisampleConfig, Pool, ResourceFlags, ResourceHandle,
    SurfaceInfo,
};
use crate::fixup::{fix_resource_data, ConstructionContext};
use crate::format::{format_info, D3dFormat};
use crate::rect::{Rect, Size};

bitflags! {
    /// Capabilities requested for a repository surface.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SurfaceCaps: u32 {
        const RENDER_TARGET = 1 << 0;
        const ZBUFFER = 1 << 1;
        const TEXTURE = 1 << 2;
        const VIDEO_MEMORY = 1 << 3;
        const SYSTEM_MEMORY = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RepositoryOpts {
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum number of retained surfaces per bucket.
    pub max_surfaces_per_bucket: usize,
    /// Maximum number of simultaneously leased surfaces.
    pub max_leases: usize,
}

impl Default for RepositoryOpts {
    fn default() -> Self {
        Self {
            max_pool_bytes: 256 * 1024 * 1024,
            max_surfaces_per_bucket: 4,
            max_leases: 1024,
        }
    }
}

/// Creation parameters of a repository surface after construction overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub format: D3dFormat,
    pub caps: SurfaceCaps,
    pub surface_count: u32,
    pub multisample: MultisampleConfig,
}

impl SurfaceDesc {
    pub fn new(width: u32, height: u32, format: D3dFormat, caps: SurfaceCaps) -> Self {
        Self {
            width,
            height,
            format,
            caps,
            surface_count: 1,
            multisample: MultisampleConfig::NONE,
        }
    }

    pub fn with_surface_count(mut self, surface_count: u32) -> Self {
        self.surface_count = surface_count.max(1);
        self
    }

    fn byte_len(&self) -> usize {
        let bpp = usize::from(format_info(self.format).bytes_per_pixel);
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(bpp)
            .saturating_mul(self.surface_count as usize)
            .saturating_mul(self.multisample.samples.max(1) as usize)
    }

    fn to_create_args(self) -> CreateResourceArgs {
        let mut flags = ResourceFlags::empty();
        if self.caps.contains(SurfaceCaps::RENDER_TARGET) {
            flags |= ResourceFlags::RENDER_TARGET;
        }
        if self.caps.contains(SurfaceCaps::ZBUFFER) {
            flags |= ResourceFlags::ZBUFFER;
        }
        if self.caps.contains(SurfaceCaps::TEXTURE) {
            flags |= ResourceFlags::TEXTURE;
        }
        let pool = if self.caps.contains(SurfaceCaps::SYSTEM_MEMORY) {
            Pool::SystemMemory
        } else {
            Pool::VideoMemory
        };
        CreateResourceArgs {
            format: self.format,
            pool,
            flags,
            multisample: self.multisample,
            surfaces: vec![SurfaceInfo::new(self.width, self.height); self.surface_count as usize],
        }
    }

    fn from_create_args(args: &CreateResourceArgs, caps: SurfaceCaps) -> Self {
        let first = args.surfaces.first().copied().unwrap_or_default();
        Self {
            width: first.width,
            height: first.height,
            format: args.format,
            caps,
            surface_count: args.surface_count(),
            multisample: args.multisample,
        }
    }
}

/// Arena address of a leased surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceLease {
    index: u32,
    generation: u32,
}

/// A surface leased from the repository. Not `Clone`: exactly one owner returns it through
/// [`SurfaceRepository::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct Surface {
    lease: SurfaceLease,
    resource: ResourceHandle,
    desc: SurfaceDesc,
}

impl Surface {
    pub fn handle(&self) -> ResourceHandle {
        self.resource
    }

    pub fn lease(&self) -> SurfaceLease {
        self.lease
    }

    pub fn desc(&self) -> &SurfaceDesc {
        &self.desc
    }

    pub fn size(&self) -> Size {
        Size::new(self.desc.width, self.desc.height)
    }

    pub fn rect(&self) -> Rect {
        Rect::from_size(self.size())
    }
}

/// Repository-owned staging surface, valid until the next request for the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempSurface {
    pub resource: ResourceHandle,
    pub width: u32,
    pub height: u32,
    pub format: D3dFormat,
}

impl TempSurface {
    pub fn rect(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    pub leased_surfaces: usize,
    pub retained_surfaces: usize,
    pub retained_bytes: usize,
    pub created_surfaces: u64,
    pub reused_surfaces: u64,
    pub evicted_surfaces: u64,
    pub dropped_on_release: u64,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    leased: Option<ResourceHandle>,
}

/// Least-recently-released ordering of retained surfaces.
#[derive(Debug, Default)]
struct ReleaseOrder {
    order: VecDeque<ResourceHandle>,
}

impl ReleaseOrder {
    fn touch(&mut self, handle: ResourceHandle) {
        self.remove(handle);
        self.order.push_back(handle);
    }

    fn pop_oldest(&mut self) -> Option<ResourceHandle> {
        self.order.pop_front()
    }

    fn remove(&mut self, handle: ResourceHandle) -> bool {
        match self.order.iter().position(|h| *h == handle) {
            Some(pos) => {
                self.order.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct SurfaceRepository {
    opts: RepositoryOpts,
    stats: RepositoryStats,

    slots: Vec<Slot>,
    free_slots: Vec<u32>,

    /// Retained surfaces per descriptor, most recently released last. Never holds empty lists.
    buckets: HashMap<SurfaceDesc, Vec<ResourceHandle>>,
    retained: HashMap<ResourceHandle, SurfaceDesc>,
    release_order: ReleaseOrder,

    temp_render_targets: [Option<TempSurface>; 2],
    temp_textures: HashMap<D3dFormat, TempSurface>,
    temp_sys_mem: Option<TempSurface>,
}

impl SurfaceRepository {
    pub fn new(opts: RepositoryOpts) -> Self {
        Self {
            opts,
            ..Self::default()
        }
    }

    pub fn opts(&self) -> RepositoryOpts {
        self.opts
    }

    pub fn stats(&self) -> RepositoryStats {
        self.stats
    }

    /// Leases a surface matching `desc` after `ctx` overrides. `None` signals exhaustion (lease
    /// capacity or driver refusal), never an error.
    pub fn get_surface<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        desc: SurfaceDesc,
        ctx: &ConstructionContext,
    ) -> Option<Surface> {
        if self.stats.leased_surfaces >= self.opts.max_leases {
            debug!(leased = self.stats.leased_surfaces, "surface lease capacity exhausted");
            return None;
        }

        let fixed = fix_resource_data(
            &desc.to_create_args(),
            ctx,
            device.adapter_info(),
            Rect::default(),
        );
        let key = SurfaceDesc::from_create_args(&fixed.args, desc.caps);

        let resource = match self.take_retained(&key) {
            Some(handle) => {
                self.stats.reused_surfaces += 1;
                handle
            }
            None => match device.create_resource(&fixed.args) {
                Ok(handle) => {
                    self.stats.created_surfaces += 1;
                    handle
                }
                Err(err) => {
                    debug!(?key, %err, "repository surface creation failed");
                    return None;
                }
            },
        };

        let lease = self.alloc_slot(resource);
        trace!(?resource, ?key, "leased surface");
        Some(Surface {
            lease,
            resource,
            desc: key,
        })
    }

    /// Returns a lease. The surface is retained for reuse while the pool caps allow it and
    /// destroyed otherwise.
    pub fn release<D: Device + ?Sized>(&mut self, device: &mut D, surface: Surface) {
        let Some(slot) = self.slots.get_mut(surface.lease.index as usize) else {
            return;
        };
        if slot.generation != surface.lease.generation || slot.leased != Some(surface.resource) {
            debug!(lease = ?surface.lease, "stale surface lease released");
            return;
        }
        slot.leased = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(surface.lease.index);
        self.stats.leased_surfaces = self.stats.leased_surfaces.saturating_sub(1);

        self.retain(device, surface.resource, surface.desc);
    }

    /// Temporary `A8R8G8B8` render target; `index` selects one of two alternating slots.
    pub fn get_temp_render_target<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        index: usize,
    ) -> Option<TempSurface> {
        let caps = SurfaceCaps::RENDER_TARGET | SurfaceCaps::VIDEO_MEMORY;
        let slot = self.temp_render_targets.get_mut(index)?;
        Self::get_temp(device, slot, width, height, D3dFormat::A8R8G8B8, caps)
    }

    /// Handle currently held by a temporary render-target slot, without growing it.
    pub fn temp_render_target_handle(&self, index: usize) -> Option<ResourceHandle> {
        self.temp_render_targets
            .get(index)
            .copied()
            .flatten()
            .map(|s| s.resource)
    }

    pub fn get_temp_texture<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        format: D3dFormat,
    ) -> Option<TempSurface> {
        let caps = SurfaceCaps::TEXTURE | SurfaceCaps::VIDEO_MEMORY;
        let mut slot = self.temp_textures.get(&format).copied();
        let surface = Self::get_temp(device, &mut slot, width, height, format, caps);
        match slot {
            Some(s) => {
                self.temp_textures.insert(format, s);
            }
            None => {
                self.temp_textures.remove(&format);
            }
        }
        surface
    }

    /// Temporary `A8R8G8B8` system-memory surface.
    pub fn get_temp_sys_mem_surface<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
    ) -> Option<TempSurface> {
        let caps = SurfaceCaps::SYSTEM_MEMORY;
        Self::get_temp(
            device,
            &mut self.temp_sys_mem,
            width,
            height,
            D3dFormat::A8R8G8B8,
            caps,
        )
    }

    /// Destroys every retained and temporary surface. Outstanding leases stay valid handles for
    /// their owners to release.
    pub fn clear<D: Device + ?Sized>(&mut self, device: &mut D) {
        for (handle, _) in self.retained.drain() {
            let _ = device.destroy_resource(handle);
        }
        self.buckets.clear();
        self.release_order = ReleaseOrder::default();
        self.stats.retained_surfaces = 0;
        self.stats.retained_bytes = 0;

        let temps = self
            .temp_render_targets
            .iter_mut()
            .filter_map(Option::take)
            .chain(self.temp_textures.drain().map(|(_, s)| s))
            .chain(self.temp_sys_mem.take())
            .collect::<Vec<_>>();
        for temp in temps {
            let _ = device.destroy_resource(temp.resource);
        }
    }

    fn get_temp<D: Device + ?Sized>(
        device: &mut D,
        slot: &mut Option<TempSurface>,
        width: u32,
        height: u32,
        format: D3dFormat,
        caps: SurfaceCaps,
    ) -> Option<TempSurface> {
        if width == 0 || height == 0 {
            return None;
        }
        if let Some(existing) = *slot {
            if existing.width >= width && existing.height >= height {
                return Some(existing);
            }
        }

        let (width, height) = match *slot {
            Some(existing) => (existing.width.max(width), existing.height.max(height)),
            None => (width, height),
        };
        if let Some(existing) = slot.take() {
            let _ = device.destroy_resource(existing.resource);
        }

        let args = SurfaceDesc::new(width, height, format, caps).to_create_args();
        match device.create_resource(&args) {
            Ok(resource) => {
                trace!(?resource, width, height, ?format, "created temporary surface");
                *slot = Some(TempSurface {
                    resource,
                    width,
                    height,
                    format,
                });
                *slot
            }
            Err(err) => {
                debug!(width, height, ?format, %err, "temporary surface creation failed");
                None
            }
        }
    }

    fn alloc_slot(&mut self, resource: ResourceHandle) -> SurfaceLease {
        self.stats.leased_surfaces += 1;
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.leased = Some(resource);
            return SurfaceLease {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            leased: Some(resource),
        });
        SurfaceLease {
            index,
            generation: 0,
        }
    }

    fn take_retained(&mut self, key: &SurfaceDesc) -> Option<ResourceHandle> {
        let bucket = self.buckets.get_mut(key)?;
        let handle = bucket.pop()?;
        if bucket.is_empty() {
            self.buckets.remove(key);
        }
        self.retained.remove(&handle);
        self.release_order.remove(handle);
        self.stats.retained_surfaces = self.stats.retained_surfaces.saturating_sub(1);
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(key.byte_len());
        Some(handle)
    }

    fn retain<D: Device + ?Sized>(&mut self, device: &mut D, handle: ResourceHandle, key: SurfaceDesc) {
        let bytes = key.byte_len();
        if self.opts.max_surfaces_per_bucket == 0 || bytes > self.opts.max_pool_bytes {
            self.drop_on_release(device, handle);
            return;
        }

        while self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_pool_bytes {
            let Some(oldest) = self.release_order.pop_oldest() else {
                break;
            };
            self.evict(device, oldest);
        }

        let retained = self.buckets.get(&key).map_or(0, Vec::len);
        if retained >= self.opts.max_surfaces_per_bucket {
            self.drop_on_release(device, handle);
            return;
        }

        self.buckets.entry(key).or_default().push(handle);
        self.retained.insert(handle, key);
        self.release_order.touch(handle);
        self.stats.retained_surfaces += 1;
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(bytes);
    }

    fn evict<D: Device + ?Sized>(&mut self, device: &mut D, handle: ResourceHandle) {
        let Some(key) = self.retained.remove(&handle) else {
            return;
        };
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|h| *h != handle);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        self.stats.retained_surfaces = self.stats.retained_surfaces.saturating_sub(1);
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(key.byte_len());
        self.stats.evicted_surfaces += 1;
        trace!(?handle, "evicted retained surface");
        let _ = device.destroy_resource(handle);
    }

    fn drop_on_release<D: Device + ?Sized>(&mut self, device: &mut D, handle: ResourceHandle) {
        self.stats.dropped_on_release += 1;
        let _ = device.destroy_resource(handle);
    }
}
