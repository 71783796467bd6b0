//! Blit routing.
//!
//! A transfer between two sub-resources goes, in order of preference, to the native driver blit
//! (both sides in system memory, or nothing to convert), the CPU scanline blitter (same
//! non-palettized format with an oversized side the driver cannot represent) or the shader
//! blitter (everything else). Multi-step work stages through repository surfaces.

use hashbrown::HashMap;
use tracing::{debug, trace};

use crate::config::BltFilter;
use crate::cpu_blit::{self, CpuBltOptions, Span};
use crate::device::{
    BltArgs, BltFlags, ColorFillArgs, Device, LockArgs, LockFlags, LockedRect, Palette, Pool, ResourceFlags,
    ResourceHandle, TextureBlt, TextureFilter, UnlockArgs,
};
use crate::engine::Ctx;
use crate::error::{ResourceError, Result};
use crate::format::{color_key_to_rgb, convert_from_32bit, D3dFormat, FormatInfo};
use crate::rect::Rect;
use crate::repository::{Surface, SurfaceCaps, TempSurface};
use crate::resource::Resource;
use crate::tracker::Representation;

/// Source side of a transfer after preparation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BltSource {
    pub handle: ResourceHandle,
    pub sub: u32,
    pub rect: Rect,
    pub is_texture: bool,
    pub pool: Pool,
    /// Format of `handle`, used for staging copies.
    pub format: D3dFormat,
    /// Format the caller's colour key is expressed in.
    pub key_format: FormatInfo,
}

impl BltSource {
    pub(crate) fn of_resource(res: &Resource, sub: u32, rect: Rect) -> Self {
        Self {
            handle: res.handle,
            sub,
            rect,
            is_texture: res.has(ResourceFlags::TEXTURE),
            pool: res.fixed.pool,
            format: res.fixed.format,
            key_format: res.format_info,
        }
    }

    pub(crate) fn of_surface(surface: &Surface, sub: u32, rect: Rect, key_format: FormatInfo) -> Self {
        let desc = surface.desc();
        Self {
            handle: surface.handle(),
            sub,
            rect,
            is_texture: desc.caps.contains(SurfaceCaps::TEXTURE),
            pool: if desc.caps.contains(SurfaceCaps::SYSTEM_MEMORY) {
                Pool::SystemMemory
            } else {
                Pool::VideoMemory
            },
            format: desc.format,
            key_format,
        }
    }
}

fn resource<'r>(resources: &'r HashMap<ResourceHandle, Resource>, handle: ResourceHandle) -> Result<&'r Resource> {
    resources
        .get(&handle)
        .ok_or(ResourceError::UnknownResource(handle))
}

fn resource_mut<'r>(
    resources: &'r mut HashMap<ResourceHandle, Resource>,
    handle: ResourceHandle,
) -> Result<&'r mut Resource> {
    resources
        .get_mut(&handle)
        .ok_or(ResourceError::UnknownResource(handle))
}

impl<D: Device> Ctx<'_, D> {
    pub(crate) fn blt(&mut self, resources: &mut HashMap<ResourceHandle, Resource>, args: &BltArgs) -> Result<()> {
        debug!(
            src = ?args.src,
            src_sub_resource = args.src_sub_resource,
            src_rect = ?args.src_rect,
            dst = ?args.dst,
            dst_sub_resource = args.dst_sub_resource,
            dst_rect = ?args.dst_rect,
            flags = ?args.flags,
            "blt"
        );
        let dst = resource(resources, args.dst)?;
        if dst.has(ResourceFlags::ZBUFFER)
            && dst.msaa.is_some()
            && !self.device.adapter_info().msaa_depth_resolve_supported
        {
            self.warn_unsupported_depth_resolve();
            return Ok(());
        }
        if !dst.is_valid_rect(args.dst_sub_resource, &args.dst_rect) {
            return Ok(());
        }

        let Some(src) = resources.get(&args.src) else {
            let dst = resource_mut(resources, args.dst)?;
            let target = self.prepare_for_blt_dst(dst, args.dst_sub_resource, args.dst_rect)?;
            let native = BltArgs {
                dst: target.handle,
                dst_rect: target.rect,
                ..*args
            };
            self.device.blt(&native)?;
            self.stats.inc_native_blts();
            return Ok(());
        };
        if !src.is_valid_rect(args.src_sub_resource, &args.src_rect) {
            return Ok(());
        }

        if dst.fixed.pool == Pool::SystemMemory && src.fixed.pool == Pool::SystemMemory {
            self.device.blt(args)?;
            self.stats.inc_native_blts();
            return Ok(());
        }

        if dst.has(ResourceFlags::MATCH_GDI_PRIMARY) {
            return self.presentation_blt(resources, args);
        }

        if is_cpu_blt_eligible(dst, src) {
            return self.blt_via_cpu(resources, args);
        }

        self.blt_via_gpu(resources, args)
    }

    fn blt_via_cpu(&mut self, resources: &mut HashMap<ResourceHandle, Resource>, args: &BltArgs) -> Result<()> {
        trace!("routing blt through the CPU");
        let src_lock = {
            let src = resource_mut(resources, args.src)?;
            let lock = if src.fixed.pool == Pool::SystemMemory {
                LockArgs::new(args.src, args.src_sub_resource, LockFlags::NOTIFY_ONLY)
            } else {
                LockArgs::new(args.src, args.src_sub_resource, LockFlags::READ_ONLY).with_area(args.src_rect)
            };
            let locked = self.lock(src, &lock)?;
            (lock, sys_mem_view(src, args.src_sub_resource, &args.src_rect).unwrap_or(locked))
        };

        let result = self.cpu_copy_into_dst(resources, args, src_lock.1);

        let src = resource_mut(resources, args.src)?;
        let unlock = UnlockArgs {
            resource: args.src,
            sub_resource: args.src_sub_resource,
            notify_only: src_lock.0.flags.contains(LockFlags::NOTIFY_ONLY),
        };
        self.unlock(src, &unlock)?;
        result?;
        self.stats.inc_cpu_blts();
        Ok(())
    }

    fn cpu_copy_into_dst(
        &mut self,
        resources: &mut HashMap<ResourceHandle, Resource>,
        args: &BltArgs,
        src_locked: LockedRect,
    ) -> Result<()> {
        let dst = resource_mut(resources, args.dst)?;
        let bpp = usize::from(dst.format_info.bytes_per_pixel);
        let lock = if dst.fixed.pool == Pool::SystemMemory {
            LockArgs::new(args.dst, args.dst_sub_resource, LockFlags::NOTIFY_ONLY)
        } else {
            LockArgs::new(args.dst, args.dst_sub_resource, LockFlags::empty()).with_area(args.dst_rect)
        };
        let locked = self.lock(dst, &lock)?;
        let dst_locked = sys_mem_view(dst, args.dst_sub_resource, &args.dst_rect).unwrap_or(locked);

        let copied = match (src_locked.data, dst_locked.data) {
            (Some(src_ptr), Some(dst_ptr)) => {
                let src_span = Span::new(src_locked.pitch, args.src_rect.width(), args.src_rect.height());
                let dst_span = Span::new(dst_locked.pitch, args.dst_rect.width(), args.dst_rect.height());
                // SAFETY: both pointers address locked rectangles of their sub-resources and the
                // spans stay inside them. The source is copied out before the destination slice
                // exists, so a self-blit never aliases.
                let src_pixels = unsafe { src_ptr.as_slice(src_span.byte_len(bpp)) }.to_vec();
                let dst_pixels = unsafe { dst_ptr.as_mut_slice(dst_span.byte_len(bpp)) };
                let opts = CpuBltOptions {
                    mirror_left_right: args.flags.contains(BltFlags::MIRROR_LEFT_RIGHT),
                    mirror_up_down: args.flags.contains(BltFlags::MIRROR_UP_DOWN),
                    dst_color_key: args.flags.contains(BltFlags::DST_COLOR_KEY).then_some(args.color_key),
                    src_color_key: args.flags.contains(BltFlags::SRC_COLOR_KEY).then_some(args.color_key),
                };
                cpu_blit::blt(dst_pixels, dst_span, &src_pixels, src_span, bpp, &opts);
                Ok(())
            }
            _ => Err(ResourceError::InvalidCall("lock returned no system-memory pointer")),
        };

        let unlock = UnlockArgs {
            resource: args.dst,
            sub_resource: args.dst_sub_resource,
            notify_only: lock.flags.contains(LockFlags::NOTIFY_ONLY),
        };
        self.unlock(dst, &unlock)?;
        copied
    }

    fn blt_via_gpu(&mut self, resources: &mut HashMap<ResourceHandle, Resource>, args: &BltArgs) -> Result<()> {
        let dst_has_resolved = resource(resources, args.dst)?.msaa_resolved.is_some();

        let (source, src_pool) = {
            let src = resource_mut(resources, args.src)?;
            let sub = args.src_sub_resource;
            if src.lock_resource.is_some() {
                self.load_from_lock_ref(src, sub)?;
            }
            let use_resolved = dst_has_resolved
                && src.msaa_resolved.is_some()
                && (src.is_valid(sub, Representation::MsaaResolved) || src.is_valid(sub, Representation::Msaa));
            let source = if use_resolved {
                self.load_msaa_resolved(src, sub)?;
                let rect = src.scale_rect(args.src_rect);
                src.msaa_resolved
                    .as_ref()
                    .map(|s| BltSource::of_surface(s, sub, rect, src.format_info))
            } else {
                None
            };
            let source = match source {
                Some(source) => source,
                None => {
                    self.prepare_for_blt_src(src, sub)?;
                    BltSource::of_resource(src, sub, args.src_rect)
                }
            };
            (source, src.fixed.pool)
        };
        let use_resolved = source.handle != args.src;

        let dst = resource_mut(resources, args.dst)?;
        let sub = args.dst_sub_resource;
        if use_resolved && !dst.is_valid(sub, Representation::Msaa) {
            self.load_msaa_resolved(dst, sub)?;
        }
        let target = self.prepare_for_blt_dst(dst, sub, args.dst_rect)?;

        let zbuffer = dst.has(ResourceFlags::ZBUFFER);
        let mut flags = args.flags;
        if !zbuffer {
            if dst.fixed.pool != Pool::SystemMemory
                && src_pool != Pool::SystemMemory
                && self.config.blt_filter == BltFilter::Bilinear
            {
                flags |= BltFlags::LINEAR;
            } else {
                flags |= BltFlags::POINT;
            }
        }

        let resized = target.rect.width() != source.rect.width() || target.rect.height() != source.rect.height();
        let wants_shader = dst.fixed.pool != Pool::SystemMemory
            && ((zbuffer && target.repr == Representation::Msaa && dst.null_surface.is_some())
                || dst.has(ResourceFlags::RENDER_TARGET)
                || (!zbuffer
                    && (flags.intersects(
                        BltFlags::SRC_COLOR_KEY | BltFlags::MIRROR_LEFT_RIGHT | BltFlags::MIRROR_UP_DOWN,
                    ) || resized)));
        if wants_shader {
            match self.shader_blt(dst, (target.handle, sub, target.rect), &source, flags, args.color_key) {
                Ok(()) => {
                    self.stats.inc_gpu_blts();
                    return Ok(());
                }
                Err(err) => debug!(%err, "shader blit failed, falling back to the driver blit"),
            }
        }

        let mut native = BltArgs {
            src: source.handle,
            src_sub_resource: source.sub,
            src_rect: source.rect,
            dst: target.handle,
            dst_sub_resource: sub,
            dst_rect: target.rect,
            flags,
            color_key: args.color_key,
        };
        if target.handle != dst.handle && source.pool == Pool::SystemMemory {
            let r = Rect::new(0, 0, source.rect.width(), source.rect.height());
            self.copy_sub_resource_region(dst.handle, sub, r, source.handle, source.sub, source.rect)?;
            native.src = dst.handle;
            native.src_sub_resource = sub;
            native.src_rect = r;
        }

        let result = self.device.blt(&native);
        if dst.fixed.pool == Pool::SystemMemory {
            self.notify_lock(dst, sub)?;
        } else if src_pool == Pool::SystemMemory {
            let src = resource(resources, args.src)?;
            self.notify_lock(src, args.src_sub_resource)?;
        }
        result?;
        self.stats.inc_native_blts();
        Ok(())
    }

    /// Shader transfer into `dst` on behalf of `res`. Non-texture or system-memory sources are
    /// staged through a temporary texture; destinations that cannot be rendered to are staged
    /// through a temporary render target and copied back.
    pub(crate) fn shader_blt(
        &mut self,
        res: &Resource,
        dst: (ResourceHandle, u32, Rect),
        src: &BltSource,
        flags: BltFlags,
        color_key: u32,
    ) -> Result<()> {
        trace!(dst = ?dst.0, src = ?src.handle, ?flags, "shader blt");
        let zbuffer = res.has(ResourceFlags::ZBUFFER);

        let (mut src_handle, mut src_sub, mut src_rect) = (src.handle, src.sub, src.rect);
        if !src.is_texture || src.pool == Pool::SystemMemory {
            let width = src.rect.width().max(0) as u32;
            let height = src.rect.height().max(0) as u32;
            let texture = if zbuffer {
                res.msaa_resolved.as_ref().map(Surface::handle)
            } else {
                self.repo
                    .get_temp_texture(self.device, width, height, src.format)
                    .map(|t| t.resource)
            };
            let texture = texture.ok_or(ResourceError::OutOfMemory)?;

            let staged = Rect::new(0, 0, width as i32, height as i32);
            self.copy_sub_resource_region(texture, 0, staged, src.handle, src.sub, src.rect)?;
            if src.pool == Pool::SystemMemory {
                self.notify_lock_handle(src.handle, src.sub)?;
            }
            src_handle = texture;
            src_sub = 0;
            src_rect = staged;
        }

        let staged_dst = !res.has(ResourceFlags::RENDER_TARGET);
        let (mut dst_handle, mut dst_sub, mut dst_rect) = dst;
        if staged_dst {
            let width = dst.2.width().max(0) as u32;
            let height = dst.2.height().max(0) as u32;
            let rt = self
                .repo
                .get_temp_render_target(self.device, width, height, 0)
                .ok_or(ResourceError::OutOfMemory)?;
            dst_handle = rt.resource;
            dst_sub = 0;
            dst_rect = Rect::new(0, 0, width as i32, height as i32);

            if flags.contains(BltFlags::SRC_COLOR_KEY) {
                self.copy_sub_resource_region(dst_handle, dst_sub, dst_rect, dst.0, dst.1, dst.2)?;
            }
        }

        if flags.contains(BltFlags::MIRROR_LEFT_RIGHT) {
            std::mem::swap(&mut src_rect.left, &mut src_rect.right);
        }
        if flags.contains(BltFlags::MIRROR_UP_DOWN) {
            std::mem::swap(&mut src_rect.top, &mut src_rect.bottom);
        }

        if zbuffer {
            let null = res.null_surface.as_ref().map(Surface::handle);
            self.device
                .depth_blt(dst_handle, dst_rect, src_handle, src_rect, null)?;
        } else {
            let mut blt = TextureBlt::new(
                dst_handle,
                dst_sub,
                dst_rect,
                src_handle,
                src_sub,
                src_rect,
                if flags.contains(BltFlags::LINEAR) {
                    TextureFilter::Linear
                } else {
                    TextureFilter::Point
                },
            );
            if flags.contains(BltFlags::SRC_COLOR_KEY) {
                blt.color_key = Some(color_key_to_rgb(&src.key_format, color_key));
            }
            self.device.texture_blt(&blt)?;
        }

        if staged_dst {
            self.copy_sub_resource_region(dst.0, dst.1, dst.2, dst_handle, dst_sub, dst_rect)?;
        }
        Ok(())
    }

    /// Point-sampled shader copy between two representations of `res`.
    pub(crate) fn textured_copy(&mut self, res: &Resource, dst: (ResourceHandle, u32, Rect), src: BltSource) -> Result<()> {
        self.shader_blt(res, dst, &src, BltFlags::POINT, 0)
    }

    /// Halves the source through alternating temporary render targets until it is within 2x of
    /// the destination size. Returns the last surface written and its rectangle. In a dry run
    /// the targets are only allocated.
    pub(crate) fn downscale(
        &mut self,
        start: (ResourceHandle, u32),
        src_rect: Rect,
        dst_width: i32,
        dst_height: i32,
        dry_run: bool,
    ) -> Result<((ResourceHandle, u32), Rect)> {
        let mut rt = start;
        let mut rect = src_rect;
        if dst_width <= 0 || dst_height <= 0 {
            return Ok((rt, rect));
        }

        while rect.width() > 2 * dst_width || rect.height() > 2 * dst_height {
            let width = dst_width.max((rect.width() + 1) / 2);
            let height = dst_height.max((rect.height() + 1) / 2);
            let Some(next) = self.next_render_target(rt.0, width as u32, height as u32) else {
                break;
            };
            let next_rect = Rect::new(0, 0, width, height);
            if !dry_run {
                self.device.texture_blt(&TextureBlt::new(
                    next.resource,
                    0,
                    next_rect,
                    rt.0,
                    rt.1,
                    rect,
                    TextureFilter::Linear,
                ))?;
                self.stats.inc_downscale_steps();
            }
            rt = (next.resource, 0);
            rect = next_rect;
        }
        Ok((rt, rect))
    }

    /// Temporary render target that is not `current`.
    pub(crate) fn next_render_target(&mut self, current: ResourceHandle, width: u32, height: u32) -> Option<TempSurface> {
        let index = usize::from(self.repo.temp_render_target_handle(0) == Some(current));
        self.repo
            .get_temp_render_target(self.device, width, height, index)
    }

    /// Allocates the temporary render targets a scaled resolve will need.
    pub(crate) fn prewarm_downscale_chain(&mut self, res: &Resource) -> Result<()> {
        let Some((resolved, resolved_rect)) = res.msaa_resolved.as_ref().map(|s| (s.handle(), s.rect())) else {
            return Ok(());
        };
        let dst = res.rect(0);
        let ((rt, _), rect) = self.downscale((resolved, 0), resolved_rect, dst.width(), dst.height(), true)?;
        if dst != rect && !self.device.adapter_info().supports_srgb_write(res.fixed.format) {
            let _ = self.next_render_target(rt, dst.width() as u32, dst.height() as u32);
        }
        Ok(())
    }

    pub(crate) fn color_fill(&mut self, res: &mut Resource, args: &ColorFillArgs) -> Result<()> {
        debug!(handle = ?res.handle, sub_resource = args.sub_resource, rect = ?args.rect, color = args.color, "color fill");
        res.check_sub_resource(args.sub_resource)?;
        let sub = args.sub_resource;
        let rect = args.rect.clipped_to(res.size(sub));
        if rect.is_empty() {
            return Ok(());
        }

        if res.lock_resource.is_some()
            && res.is_valid(sub, Representation::SysMem)
            && !res.is_valid(sub, Representation::VidMem)
        {
            let entry = *res.tracker.entry(sub)?;
            let bpp = usize::from(res.format_info.bytes_per_pixel);
            if let Some(base) = entry.data {
                let value = if res.fixed.format == D3dFormat::P8 {
                    args.color & 0xff
                } else {
                    convert_from_32bit(&res.format_info, args.color)
                };
                let span = Span::new(entry.pitch, rect.width(), rect.height());
                let offset = rect.top as usize * entry.pitch as usize + rect.left as usize * bpp;
                // SAFETY: `rect` was clipped to the sub-resource, which the mirror fully covers.
                let dst = unsafe { base.add(offset).as_mut_slice(span.byte_len(bpp)) };
                cpu_blit::color_fill(dst, span, bpp, value);
                res.tracker.mark_valid(sub, Representation::SysMem);
                res.is_palettized_texture_up_to_date = false;
                self.stats.inc_color_fills();
                return Ok(());
            }
        }

        let color = if res.fixed.format == D3dFormat::P8 {
            args.color << 16
        } else {
            args.color
        };
        let target = self.prepare_for_blt_dst(res, sub, rect)?;
        self.device.color_fill(&ColorFillArgs {
            resource: target.handle,
            sub_resource: sub,
            rect: target.rect,
            color,
        })?;
        self.stats.inc_color_fills();
        Ok(())
    }

    /// Re-runs the palette conversion from the linked 8-bit source into `rgba` when the palette
    /// changed or a new colour-key index is active.
    pub(crate) fn update_palettized_texture(
        &mut self,
        resources: &mut HashMap<ResourceHandle, Resource>,
        rgba: ResourceHandle,
        color_key_index: Option<u8>,
    ) -> Result<()> {
        let (source, current_key) = {
            let rgba = resource(resources, rgba)?;
            (rgba.palettized_texture, rgba.palette_color_key_index)
        };
        let Some(source) = source else {
            return Ok(());
        };

        let (src_handle, palette_handle) = {
            let src = resource_mut(resources, source)?;
            if src.is_palettized_texture_up_to_date && (color_key_index.is_none() || color_key_index == current_key) {
                return Ok(());
            }
            (self.prepare_for_gpu_read(src, 0)?, src.palette_handle)
        };

        let mut palette: Palette = self
            .palettes
            .get(&palette_handle)
            .copied()
            .unwrap_or([Default::default(); 256]);
        if let Some(key) = color_key_index {
            nudge_color_key_duplicates(&mut palette, key);
        }

        let src_rect = resource(resources, source)?.rect(0);
        let dst = resource_mut(resources, rgba)?;
        let rect = dst.rect(0);
        let target = self.prepare_for_blt_dst(dst, 0, rect)?;
        self.device
            .palettized_blt(target.handle, 0, target.rect, src_handle, 0, src_rect, &palette)?;

        resource_mut(resources, source)?.is_palettized_texture_up_to_date = true;
        resource_mut(resources, rgba)?.palette_color_key_index = color_key_index;
        trace!(?rgba, ?source, ?color_key_index, "palettized texture updated");
        Ok(())
    }
}

/// CPU scanline path: same non-palettized format and at least one side too large for a single
/// driver resource.
fn is_cpu_blt_eligible(dst: &Resource, src: &Resource) -> bool {
    dst.fixed.format == src.fixed.format
        && dst.format_info.bytes_per_pixel != 0
        && dst.fixed.format != D3dFormat::P8
        && (dst.is_oversized || src.is_oversized)
}

/// System-memory resources are addressed through their mirror entry rather than the lock
/// result, which is notify-only for them.
fn sys_mem_view(res: &Resource, sub: u32, rect: &Rect) -> Option<LockedRect> {
    if res.fixed.pool != Pool::SystemMemory {
        return None;
    }
    let entry = res.tracker.entry(sub).ok()?;
    let bpp = usize::from(res.format_info.bytes_per_pixel);
    let offset = rect.top.max(0) as usize * entry.pitch as usize + rect.left.max(0) as usize * bpp;
    Some(LockedRect {
        // SAFETY: `rect` was validated against the sub-resource the entry describes.
        data: entry.data.map(|p| unsafe { p.add(offset) }),
        pitch: entry.pitch,
    })
}

/// Entries sharing the key entry's colour get their blue channel moved by one so an exact-match
/// colour-key test only hits the key index.
pub(crate) fn nudge_color_key_duplicates(palette: &mut Palette, key: u8) {
    let key_entry = palette[usize::from(key)];
    for (i, entry) in palette.iter_mut().enumerate() {
        if i != usize::from(key) && entry.same_color(&key_entry) {
            entry.blue = if entry.blue == 0xff { 0xfe } else { entry.blue + 1 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PaletteEntry;

    #[test]
    fn palette_nudge_only_touches_duplicates_of_the_key() {
        let mut palette = [PaletteEntry::rgb(1, 2, 3); 256];
        palette[7] = PaletteEntry::rgb(9, 9, 0xff);
        palette[8] = PaletteEntry::rgb(9, 9, 0xff);
        palette[9] = PaletteEntry::rgb(1, 2, 3);

        nudge_color_key_duplicates(&mut palette, 7);
        assert_eq!(palette[7], PaletteEntry::rgb(9, 9, 0xff));
        assert_eq!(palette[8], PaletteEntry::rgb(9, 9, 0xfe));
        assert_eq!(palette[9], PaletteEntry::rgb(1, 2, 3));

        nudge_color_key_duplicates(&mut palette, 9);
        assert_eq!(palette[10], PaletteEntry::rgb(1, 2, 4));
        assert_eq!(palette[9], PaletteEntry::rgb(1, 2, 3));
    }
}
