//! Presentation compositor.
//!
//! Turns the primary's current contents into the visible frame: optional letterbox/pillarbox
//! rectangle, layered-window overlays, emulated cursor, downscale chain, display filter and
//! gamma correction, then black borders outside the presentation rectangle.

use hashbrown::HashMap;
use tracing::{debug, trace, warn};

use crate::config::DisplayFilter;
use crate::device::{
    surface_span, BltArgs, ColorFillArgs, Device, LockArgs, LockFlags, Pool, ResourceFlags, ResourceHandle,
    TextureBlt, TextureFilter, UnlockArgs,
};
use crate::engine::Ctx;
use crate::error::{ResourceError, Result};
use crate::format::{color_key_to_rgb, format_info, D3dFormat};
use crate::rect::{calculate_scaled_rect, Rect, Size};
use crate::resource::Resource;
use crate::tracker::Representation;

/// Fullscreen presentation state shared by every primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentationState {
    /// Area of the primary the frame is presented into; empty outside fullscreen mode.
    pub rect: Rect,
    /// The cursor is drawn by the compositor because the frame is letterboxed.
    pub cursor_emulated: bool,
    /// Emulated cursor is confined to this monitor rectangle.
    pub cursor_clip: Rect,
}

impl PresentationState {
    pub fn is_fullscreen(&self) -> bool {
        !self.rect.is_empty()
    }
}

impl<D: Device> Ctx<'_, D> {
    /// Enters or leaves fullscreen presentation for a primary of `primary_size`. Idempotent.
    pub(crate) fn set_fullscreen_mode(&mut self, primary_size: Size, fullscreen: bool) {
        if self.presentation.is_fullscreen() == fullscreen {
            return;
        }

        if fullscreen {
            let monitor = self.desktop.monitor_rect();
            let rect = calculate_scaled_rect(&monitor, &self.desktop.real_monitor_rect());
            *self.presentation = PresentationState {
                rect,
                cursor_emulated: rect != Rect::from_size(primary_size),
                cursor_clip: monitor,
            };
        } else {
            *self.presentation = PresentationState::default();
        }
        debug!(presentation = ?self.presentation, "fullscreen mode changed");
    }

    /// Presents `args.src` onto the desktop-mirroring primary `args.dst`.
    pub(crate) fn presentation_blt(
        &mut self,
        resources: &mut HashMap<ResourceHandle, Resource>,
        args: &BltArgs,
    ) -> Result<()> {
        trace!(src = ?args.src, dst = ?args.dst, presentation = ?self.presentation.rect, "presentation blt");

        let (src_handle, src_size, src_pool, src_format, is_palettized) = {
            let src = resources
                .get_mut(&args.src)
                .ok_or(ResourceError::UnknownResource(args.src))?;
            let sub = args.src_sub_resource;
            let mut view = (
                src.handle,
                src.size(sub),
                src.fixed.pool,
                src.fixed.format,
                src.orig.format == D3dFormat::P8,
            );
            if src.lock_resource.is_some() {
                if src.is_valid(sub, Representation::SysMem) && !src.has(ResourceFlags::RENDER_TARGET) {
                    src.tracker.invalidate(sub, Representation::VidMem);
                    src.tracker.invalidate(sub, Representation::MsaaResolved);
                }
                let handle = self.prepare_for_gpu_read(src, sub)?;
                if handle != src.handle {
                    if let Some(resolved) = src.msaa_resolved.as_ref() {
                        view = (handle, resolved.size(), Pool::VideoMemory, resolved.desc().format, false);
                    }
                }
            }
            view
        };

        let (dst_handle, dst_size) = {
            let dst = resources
                .get(&args.dst)
                .ok_or(ResourceError::UnknownResource(args.dst))?;
            (dst.handle, dst.size(args.dst_sub_resource))
        };
        let dst_rect = if self.presentation.is_fullscreen() {
            self.presentation.rect
        } else {
            args.dst_rect
        };

        let src_rect = Rect::from_size(src_size);
        let rt = self
            .repo
            .get_temp_render_target(self.device, src_size.width as u32, src_size.height as u32, 0);
        let (rt_handle, rt_sub, rt_rect) = match rt {
            Some(rt) => (rt.resource, 0, src_rect),
            None => (dst_handle, args.dst_sub_resource, dst_rect),
        };

        let (mut frame, mut frame_sub) = (src_handle, args.src_sub_resource);
        if src_pool == Pool::SystemMemory {
            let texture = self
                .repo
                .get_temp_texture(self.device, src_size.width as u32, src_size.height as u32, src_format)
                .ok_or(ResourceError::OutOfMemory)?;
            self.copy_sub_resource_region(texture.resource, 0, src_rect, src_handle, frame_sub, src_rect)?;
            frame = texture.resource;
            frame_sub = 0;
        }

        if is_palettized {
            let palette = self.desktop.hardware_palette();
            self.device
                .palettized_blt(rt_handle, rt_sub, rt_rect, frame, frame_sub, src_rect, &palette)?;
        } else {
            self.copy_sub_resource_region(rt_handle, rt_sub, rt_rect, frame, frame_sub, src_rect)?;
        }

        if self.presentation.is_fullscreen() {
            self.present_layered_windows(rt_handle, rt_sub, rt_rect)?;
        }

        if self.presentation.cursor_emulated {
            if let Some(cursor) = self.desktop.emulated_cursor() {
                let position = self.presentation.cursor_clip.clamp_point(cursor.position);
                self.device
                    .cursor_blt(rt_handle, rt_sub, rt_rect, cursor.cursor, position)?;
            }
        }
        self.stats.inc_presentation_blts();

        if rt.is_none() {
            return Ok(());
        }

        let ((scaled, scaled_sub), scaled_rect) =
            self.downscale((rt_handle, 0), src_rect, dst_rect.width(), dst_rect.height(), false)?;

        let ramp = self.desktop.gamma_ramp();
        let gamma_rt = if ramp.is_default() {
            None
        } else {
            self.next_render_target(scaled, dst_rect.width() as u32, dst_rect.height() as u32)
        };
        let (next, next_sub, next_rect) = match gamma_rt {
            Some(g) => (g.resource, 0, Rect::new(0, 0, dst_rect.width(), dst_rect.height())),
            None => (dst_handle, args.dst_sub_resource, dst_rect),
        };

        match self.config.display_filter {
            DisplayFilter::Bilinear { blur } => {
                self.device
                    .bilinear_blt(next, next_sub, next_rect, scaled, scaled_rect, blur)?;
            }
            DisplayFilter::Point => {
                self.device.blt(&BltArgs::copy(
                    next,
                    next_sub,
                    next_rect,
                    scaled,
                    scaled_sub,
                    scaled_rect,
                ))?;
            }
        }

        if gamma_rt.is_some() {
            self.device
                .gamma_blt(dst_handle, args.dst_sub_resource, dst_rect, next, next_rect, &ramp)?;
        }

        self.clear_rect_exterior(dst_handle, args.dst_sub_resource, dst_size, dst_rect)
    }

    /// Captures every visible layered window and blends it over the frame in `dst`.
    fn present_layered_windows(&mut self, dst: ResourceHandle, dst_sub: u32, dst_rect: Rect) -> Result<()> {
        let windows = self.desktop.visible_layered_windows();
        if windows.is_empty() {
            return Ok(());
        }

        let monitor = self.desktop.monitor_rect();
        let ck_format = format_info(D3dFormat::X8B8G8R8);
        for window in windows {
            let visible = window.rect.intersect(&monitor);
            if visible.is_empty() {
                continue;
            }
            let width = visible.width() as u32;
            let height = visible.height() as u32;

            let (Some(texture), Some(sys_mem)) = (
                self.repo
                    .get_temp_texture(self.device, width, height, D3dFormat::A8R8G8B8),
                self.repo.get_temp_sys_mem_surface(self.device, width, height),
            ) else {
                warn!(window = ?window.id, width, height, "no staging surface for layered window");
                continue;
            };

            let locked = self
                .device
                .lock(&LockArgs::new(sys_mem.resource, 0, LockFlags::empty()))?;
            let captured = match locked.data {
                Some(ptr) => {
                    let len = surface_span(locked.pitch, width as usize * 4, height);
                    // SAFETY: the driver lock maps the whole temporary surface.
                    let pixels = unsafe { ptr.as_mut_slice(len) };
                    let area = visible.offset(-window.rect.left, -window.rect.top);
                    self.desktop
                        .capture_window(window.id, area, pixels, locked.pitch)
                }
                None => false,
            };
            self.device
                .unlock(&UnlockArgs::new(sys_mem.resource, 0))?;
            if !captured {
                trace!(window = ?window.id, "layered window could not be captured");
                continue;
            }

            let src_rect = Rect::new(0, 0, visible.width(), visible.height());
            self.copy_sub_resource_region(texture.resource, 0, src_rect, sys_mem.resource, 0, src_rect)?;

            let region: Option<Vec<Rect>> = window.region.as_ref().map(|rects| {
                rects
                    .iter()
                    .map(|r| r.intersect(&visible).offset(-visible.left, -visible.top))
                    .filter(|r| !r.is_empty())
                    .collect()
            });

            let mut blt = TextureBlt::new(
                dst,
                dst_sub,
                visible.transform(&monitor, &dst_rect),
                texture.resource,
                0,
                src_rect,
                TextureFilter::Point,
            );
            blt.color_key = window.color_key.map(|ck| color_key_to_rgb(&ck_format, ck));
            blt.alpha = window.alpha;
            blt.region = region.as_deref();
            self.device.texture_blt(&blt)?;
        }
        Ok(())
    }

    /// Fills everything in the `size` surface outside `rect` with black.
    fn clear_rect_exterior(&mut self, dst: ResourceHandle, sub: u32, size: Size, rect: Rect) -> Result<()> {
        let full = Rect::from_size(size);
        let bands = [
            Rect::new(full.left, full.top, full.right, rect.top),
            Rect::new(full.left, rect.bottom, full.right, full.bottom),
            Rect::new(full.left, rect.top, rect.left, rect.bottom),
            Rect::new(rect.right, rect.top, full.right, rect.bottom),
        ];
        for band in bands.into_iter().map(|b| b.intersect(&full)).filter(|b| !b.is_empty()) {
            self.device.color_fill(&ColorFillArgs {
                resource: dst,
                sub_resource: sub,
                rect: band,
                color: 0,
            })?;
        }
        Ok(())
    }
}
