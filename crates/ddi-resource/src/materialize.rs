//! Materialization: producing a requested representation from whichever copy is current.
//!
//! Each loader is idempotent; a representation the tracker already reports valid is never
//! copied again. Resolution always walks multisample -> resolved -> video -> system and never
//! reads a tier that is itself stale. A loader that cannot produce its tier (unsupported depth
//! resolve) returns without marking it.

use tracing::{trace, warn};

use crate::blit::BltSource;
use crate::config::ResolutionScaleFilter;
use crate::device::{BltArgs, Device, Pool, ResourceFlags, ResourceHandle, TextureBlt, TextureFilter};
use crate::engine::Ctx;
use crate::error::Result;
use crate::rect::Rect;
use crate::resource::Resource;
use crate::tracker::Representation;

/// Where a blit destination write actually lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BltTarget {
    pub handle: ResourceHandle,
    pub rect: Rect,
    pub repr: Representation,
}

impl<D: Device> Ctx<'_, D> {
    pub(crate) fn copy_sub_resource_region(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_sub_resource: u32,
        src_rect: Rect,
    ) -> Result<()> {
        trace!(?dst, dst_sub_resource, ?dst_rect, ?src, src_sub_resource, ?src_rect, "copy");
        let args = BltArgs::copy(dst, dst_sub_resource, dst_rect, src, src_sub_resource, src_rect);
        if let Err(err) = self.device.blt(&args) {
            if !self.warnings.copy_failure {
                self.warnings.copy_failure = true;
                warn!(code = %err.hresult(), "sub-resource copy failed");
            }
            return Err(err);
        }
        Ok(())
    }

    /// System mirror is current. Used before every CPU read.
    pub(crate) fn load_sys_mem(&mut self, res: &mut Resource, sub: u32) -> Result<()> {
        if res.is_valid(sub, Representation::SysMem) {
            return Ok(());
        }
        let Some(lock) = res.lock_resource else {
            return Ok(());
        };

        self.load_vid_mem(res, sub)?;
        if !res.is_valid(sub, Representation::VidMem) {
            return Ok(());
        }

        let rect = res.rect(sub);
        self.copy_sub_resource_region(lock, sub, rect, res.handle, sub, rect)?;
        self.notify_lock(res, sub)?;
        res.tracker.add_valid(sub, Representation::SysMem);
        self.stats.inc_sys_mem_loads();
        Ok(())
    }

    /// Video memory is current, sourced from the resolved, multisample or system copy.
    pub(crate) fn load_vid_mem(&mut self, res: &mut Resource, sub: u32) -> Result<()> {
        if res.is_valid(sub, Representation::VidMem) {
            return Ok(());
        }

        if res.is_valid(sub, Representation::Msaa) || res.is_valid(sub, Representation::MsaaResolved) {
            self.load_msaa_resolved(res, sub)?;
            if !res.is_valid(sub, Representation::MsaaResolved) {
                return Ok(());
            }
            let Some((resolved, resolved_rect)) = res.msaa_resolved.as_ref().map(|s| (s.handle(), s.rect()))
            else {
                return Ok(());
            };
            let dst_rect = res.rect(sub);

            if !res.has(ResourceFlags::RENDER_TARGET)
                || self.config.resolution_scale_filter == ResolutionScaleFilter::Point
            {
                if res.has(ResourceFlags::ZBUFFER) || !res.is_scaled() {
                    self.copy_sub_resource_region(res.handle, sub, dst_rect, resolved, sub, resolved_rect)?;
                } else {
                    let src = res
                        .msaa_resolved
                        .as_ref()
                        .map(|s| BltSource::of_surface(s, sub, resolved_rect, res.format_info));
                    if let Some(src) = src {
                        self.textured_copy(res, (res.handle, sub, dst_rect), src)?;
                    }
                }
            } else {
                self.filtered_downscale(res, sub, resolved, resolved_rect, dst_rect)?;
            }
        } else {
            let Some(lock) = res.lock_resource else {
                return Ok(());
            };
            let rect = res.rect(sub);
            self.copy_sub_resource_region(res.handle, sub, rect, lock, sub, rect)?;
            self.notify_lock(res, sub)?;
            res.tracker.set_ref_locked(sub, false);
        }

        res.tracker.add_valid(sub, Representation::VidMem);
        self.stats.inc_vid_mem_loads();
        Ok(())
    }

    /// Resolved surface is current.
    pub(crate) fn load_msaa_resolved(&mut self, res: &mut Resource, sub: u32) -> Result<()> {
        self.load_from_lock_ref(res, sub)?;
        if res.is_valid(sub, Representation::MsaaResolved) {
            return Ok(());
        }
        let Some((resolved, resolved_rect)) = res.msaa_resolved.as_ref().map(|s| (s.handle(), s.rect()))
        else {
            return Ok(());
        };

        if res.is_valid(sub, Representation::Msaa) {
            let Some((msaa, msaa_rect)) = res.msaa.as_ref().map(|s| (s.handle(), s.rect())) else {
                return Ok(());
            };
            if res.has(ResourceFlags::ZBUFFER) {
                if !self.device.adapter_info().msaa_depth_resolve_supported {
                    self.warn_unsupported_depth_resolve();
                    return Ok(());
                }
                self.device.resolve_msaa_depth(msaa, resolved)?;
            } else {
                self.copy_sub_resource_region(resolved, sub, resolved_rect, msaa, sub, msaa_rect)?;
            }
        } else {
            self.load_vid_mem(res, sub)?;
            if !res.is_valid(sub, Representation::VidMem) {
                return Ok(());
            }
            let src_rect = res.rect(sub);
            if res.has(ResourceFlags::ZBUFFER) || !res.is_scaled() {
                self.copy_sub_resource_region(resolved, sub, resolved_rect, res.handle, sub, src_rect)?;
            } else {
                let src = BltSource::of_resource(res, sub, src_rect);
                self.textured_copy(res, (resolved, sub, resolved_rect), src)?;
            }
        }

        res.tracker.add_valid(sub, Representation::MsaaResolved);
        self.stats.inc_msaa_resolved_loads();
        Ok(())
    }

    /// Multisample surface is current.
    pub(crate) fn load_msaa(&mut self, res: &mut Resource, sub: u32) -> Result<()> {
        if res.is_valid(sub, Representation::Msaa) {
            return Ok(());
        }
        let Some((msaa, msaa_rect)) = res.msaa.as_ref().map(|s| (s.handle(), s.rect())) else {
            return Ok(());
        };

        if let Some((resolved, resolved_rect)) = res.msaa_resolved.as_ref().map(|s| (s.handle(), s.rect())) {
            self.load_msaa_resolved(res, sub)?;
            if !res.is_valid(sub, Representation::MsaaResolved) {
                return Ok(());
            }
            if res.has(ResourceFlags::ZBUFFER) {
                if let Some(null) = res.null_surface.as_ref().map(|s| s.handle()) {
                    self.device
                        .depth_blt(msaa, resolved_rect, resolved, resolved_rect, Some(null))?;
                }
            } else {
                self.copy_sub_resource_region(msaa, sub, msaa_rect, resolved, sub, resolved_rect)?;
            }
        } else {
            self.load_vid_mem(res, sub)?;
            if !res.is_valid(sub, Representation::VidMem) {
                return Ok(());
            }
            let rect = res.rect(sub);
            self.copy_sub_resource_region(msaa, sub, msaa_rect, res.handle, sub, rect)?;
        }

        res.tracker.add_valid(sub, Representation::Msaa);
        self.stats.inc_msaa_loads();
        Ok(())
    }

    /// Applies a deferred CPU write to the resolved surface: only texels that differ from the
    /// lock reference taken before the write are copied over.
    pub(crate) fn load_from_lock_ref(&mut self, res: &mut Resource, sub: u32) -> Result<()> {
        if !res.tracker.is_ref_locked(sub) {
            return Ok(());
        }
        res.tracker.set_ref_locked(sub, false);
        self.load_vid_mem(res, sub)?;

        let (Some(resolved), Some(lock_ref)) = (
            res.msaa_resolved.as_ref().map(|s| (s.handle(), s.rect())),
            res.lock_ref.as_ref().map(|s| s.handle()),
        ) else {
            return Ok(());
        };

        let size = res.size(sub);
        let src_rect = res.rect(sub);
        let mut src = (res.handle, sub);
        if !res.has(ResourceFlags::TEXTURE) {
            let Some(texture) = self
                .repo
                .get_temp_texture(self.device, size.width, size.height, res.fixed.format)
            else {
                return Ok(());
            };
            self.copy_sub_resource_region(texture.resource, 0, src_rect, res.handle, sub, src_rect)?;
            src = (texture.resource, 0);
        }

        self.device.lock_ref_blt(
            resolved.0,
            sub,
            resolved.1,
            src.0,
            src.1,
            src_rect,
            lock_ref,
        )?;
        res.tracker.add_valid(sub, Representation::MsaaResolved);
        self.stats.inc_lock_ref_reconciliations();
        Ok(())
    }

    pub(crate) fn prepare_for_blt_src(&mut self, res: &mut Resource, sub: u32) -> Result<()> {
        if res.is_tracked() {
            self.load_vid_mem(res, sub)?;
        }
        Ok(())
    }

    /// Routes a write to the tier that currently holds the sub-resource and makes it the only
    /// valid copy. `rect` is in logical coordinates; the returned rectangle addresses the
    /// returned surface.
    pub(crate) fn prepare_for_blt_dst(&mut self, res: &mut Resource, sub: u32, rect: Rect) -> Result<BltTarget> {
        res.is_palettized_texture_up_to_date = false;
        if res.is_tracked() {
            self.load_from_lock_ref(res, sub)?;
            if res.is_valid(sub, Representation::Msaa) {
                if let Some(msaa) = res.msaa.as_ref().map(|s| s.handle()) {
                    res.tracker.mark_valid(sub, Representation::Msaa);
                    return Ok(BltTarget {
                        handle: msaa,
                        rect: res.scale_rect(rect),
                        repr: Representation::Msaa,
                    });
                }
            }
            if res.is_valid(sub, Representation::MsaaResolved) {
                if let Some(resolved) = res.msaa_resolved.as_ref().map(|s| s.handle()) {
                    res.tracker.mark_valid(sub, Representation::MsaaResolved);
                    return Ok(BltTarget {
                        handle: resolved,
                        rect: res.scale_rect(rect),
                        repr: Representation::MsaaResolved,
                    });
                }
            }
            self.load_vid_mem(res, sub)?;
            res.tracker.mark_valid(sub, Representation::VidMem);
        }
        Ok(BltTarget {
            handle: res.handle,
            rect,
            repr: match res.fixed.pool {
                Pool::SystemMemory => Representation::SysMem,
                Pool::VideoMemory => Representation::VidMem,
            },
        })
    }

    pub(crate) fn prepare_for_cpu_read(&mut self, res: &mut Resource, sub: u32) -> Result<()> {
        if res.lock_resource.is_some() {
            self.load_sys_mem(res, sub)?;
        }
        Ok(())
    }

    /// Makes the mirror the only valid copy. When the resolved or multisample surface is
    /// current, the pre-write image is kept in the lock reference so the resolved surface can
    /// later pick up just the texels the CPU changed.
    pub(crate) fn prepare_for_cpu_write(&mut self, res: &mut Resource, sub: u32) -> Result<()> {
        if res.lock_resource.is_none() {
            return Ok(());
        }
        if let Some(lock_ref) = res.lock_ref.as_ref().map(|s| s.handle()) {
            if res.is_valid(sub, Representation::MsaaResolved) || res.is_valid(sub, Representation::Msaa) {
                self.load_vid_mem(res, sub)?;
                let rect = res.rect(sub);
                self.copy_sub_resource_region(lock_ref, sub, rect, res.handle, sub, rect)?;
                res.tracker.set_ref_locked(sub, true);
            }
        }
        self.load_sys_mem(res, sub)?;
        res.tracker.mark_valid(sub, Representation::SysMem);
        Ok(())
    }

    /// Handle a draw call should sample from.
    pub(crate) fn prepare_for_gpu_read(&mut self, res: &mut Resource, sub: u32) -> Result<ResourceHandle> {
        if res.lock_resource.is_some() {
            self.load_from_lock_ref(res, sub)?;
            if let Some(resolved) = res.msaa_resolved.as_ref().map(|s| s.handle()) {
                self.load_msaa_resolved(res, sub)?;
                return Ok(resolved);
            }
            self.load_vid_mem(res, sub)?;
        }
        Ok(res.handle)
    }

    /// Handle a draw call should render into; that tier becomes the only valid copy.
    pub(crate) fn prepare_for_gpu_write(&mut self, res: &mut Resource, sub: u32) -> Result<ResourceHandle> {
        if !res.is_tracked() {
            return Ok(res.handle);
        }
        if let Some(msaa) = res.msaa.as_ref().map(|s| s.handle()) {
            self.load_msaa(res, sub)?;
            res.tracker.mark_valid(sub, Representation::Msaa);
            Ok(msaa)
        } else if let Some(resolved) = res.msaa_resolved.as_ref().map(|s| s.handle()) {
            self.load_msaa_resolved(res, sub)?;
            res.tracker.mark_valid(sub, Representation::MsaaResolved);
            Ok(resolved)
        } else {
            self.load_vid_mem(res, sub)?;
            res.tracker.mark_valid(sub, Representation::VidMem);
            Ok(res.handle)
        }
    }

    /// Linear-filtered transfer from the resolved surface into video memory, shrinking through
    /// the downscale chain first.
    fn filtered_downscale(
        &mut self,
        res: &Resource,
        sub: u32,
        resolved: ResourceHandle,
        resolved_rect: Rect,
        dst_rect: Rect,
    ) -> Result<()> {
        let start = (resolved, sub);
        let ((mut src, mut src_sub), mut src_rect) =
            self.downscale(start, resolved_rect, dst_rect.width(), dst_rect.height(), false)?;

        if dst_rect != src_rect && !self.device.adapter_info().supports_srgb_write(res.fixed.format) {
            if let Some(next) = self.next_render_target(src, dst_rect.width() as u32, dst_rect.height() as u32) {
                self.device.texture_blt(&TextureBlt::new(
                    next.resource,
                    0,
                    dst_rect,
                    src,
                    src_sub,
                    src_rect,
                    TextureFilter::Linear,
                ))?;
                src = next.resource;
                src_sub = 0;
                src_rect = dst_rect;
            }
        }

        if dst_rect == src_rect {
            self.copy_sub_resource_region(res.handle, sub, dst_rect, src, src_sub, src_rect)
        } else {
            self.device.texture_blt(&TextureBlt::new(
                res.handle,
                sub,
                dst_rect,
                src,
                src_sub,
                src_rect,
                TextureFilter::Linear,
            ))
        }
    }

    pub(crate) fn warn_unsupported_depth_resolve(&mut self) {
        if !self.warnings.depth_resolve {
            self.warnings.depth_resolve = true;
            self.stats.inc_unsupported_depth_resolves();
            warn!(
                "resolving multisampled depth buffers is not supported by the GPU; \
                 disable antialiasing if experiencing visual glitches"
            );
        }
    }
}
