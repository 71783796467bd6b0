//! Software reference driver.
//!
//! `SoftDevice` executes every [`Device`] and [`ShaderBlitter`] primitive on the CPU over plain
//! byte storage. It counts calls per primitive and can be told to fail upcoming calls, which is
//! what the engine's tests assert against. Multisampled resources are stored single-sampled.

use hashbrown::HashMap;
use tracing::trace;

use crate::device::{
    surface_span, AdapterInfo, BltArgs, BltFlags, ColorFillArgs, CreateResourceArgs, CursorHandle, Device,
    GammaRamp, LockArgs, LockFlags, LockedRect, MultisampleConfig, Palette, Pool, ResourceHandle, ShaderBlitter,
    SysMemPtr, TextureBlt, TextureFilter, UnlockArgs,
};
use crate::error::{HResult, ResourceError, Result};
use crate::format::{format_info, read_pixel, write_pixel, D3dFormat, FormatInfo};
use crate::rect::{Point, Rect, Size};

/// Driver primitive, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    CreateResource,
    DestroyResource,
    Lock,
    Unlock,
    Blt,
    ColorFill,
    TextureBlt,
    DepthBlt,
    PalettizedBlt,
    CursorBlt,
    GammaBlt,
    BilinearBlt,
    LockRefBlt,
    ResolveMsaaDepth,
}

/// Calls made so far, per primitive. Notify-only locks are counted apart from pointer locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SoftCalls {
    pub create_resource: u64,
    pub destroy_resource: u64,
    pub lock: u64,
    pub notify_lock: u64,
    pub unlock: u64,
    pub blt: u64,
    pub color_fill: u64,
    pub texture_blt: u64,
    pub depth_blt: u64,
    pub palettized_blt: u64,
    pub cursor_blt: u64,
    pub gamma_blt: u64,
    pub bilinear_blt: u64,
    pub lock_ref_blt: u64,
    pub resolve_msaa_depth: u64,
}

impl SoftCalls {
    fn bump(&mut self, primitive: Primitive) {
        let counter = match primitive {
            Primitive::CreateResource => &mut self.create_resource,
            Primitive::DestroyResource => &mut self.destroy_resource,
            Primitive::Lock => &mut self.lock,
            Primitive::Unlock => &mut self.unlock,
            Primitive::Blt => &mut self.blt,
            Primitive::ColorFill => &mut self.color_fill,
            Primitive::TextureBlt => &mut self.texture_blt,
            Primitive::DepthBlt => &mut self.depth_blt,
            Primitive::PalettizedBlt => &mut self.palettized_blt,
            Primitive::CursorBlt => &mut self.cursor_blt,
            Primitive::GammaBlt => &mut self.gamma_blt,
            Primitive::BilinearBlt => &mut self.bilinear_blt,
            Primitive::LockRefBlt => &mut self.lock_ref_blt,
            Primitive::ResolveMsaaDepth => &mut self.resolve_msaa_depth,
        };
        *counter += 1;
    }
}

#[derive(Debug)]
enum Storage {
    Owned(Vec<u8>),
    /// Caller-provided system memory (`SurfaceInfo::sys_mem`).
    External(SysMemPtr),
}

#[derive(Debug)]
struct SoftSurface {
    width: u32,
    height: u32,
    pitch: u32,
    storage: Storage,
}

impl SoftSurface {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    fn byte_len(&self, bpp: usize) -> usize {
        surface_span(self.pitch, self.width as usize * bpp, self.height)
    }

    fn bytes(&self, bpp: usize) -> &[u8] {
        match &self.storage {
            Storage::Owned(bytes) => bytes.as_slice(),
            // SAFETY: the creator of a system-memory resource keeps its memory alive and
            // unaliased for the resource's lifetime.
            Storage::External(ptr) => unsafe { ptr.as_slice(self.byte_len(bpp)) },
        }
    }

    fn bytes_mut(&mut self, bpp: usize) -> &mut [u8] {
        let len = self.byte_len(bpp);
        match &mut self.storage {
            Storage::Owned(bytes) => bytes.as_mut_slice(),
            // SAFETY: as in `bytes`.
            Storage::External(ptr) => unsafe { ptr.as_mut_slice(len) },
        }
    }

    fn base_ptr(&mut self) -> Option<SysMemPtr> {
        match &mut self.storage {
            Storage::Owned(bytes) if !bytes.is_empty() => SysMemPtr::new(bytes.as_mut_ptr()),
            Storage::Owned(_) => None,
            Storage::External(ptr) => Some(*ptr),
        }
    }
}

#[derive(Debug)]
struct SoftResource {
    args: CreateResourceArgs,
    info: FormatInfo,
    surfaces: Vec<SoftSurface>,
}

/// Raw texels of one rectangle, row-major.
struct Texels {
    width: usize,
    height: usize,
    origin: Point,
    raw: Vec<u32>,
    info: FormatInfo,
}

impl Texels {
    fn raw_at(&self, x: usize, y: usize) -> u32 {
        self.raw[y * self.width + x]
    }

    fn argb_at(&self, x: usize, y: usize) -> u32 {
        self.info.decode_argb(self.raw_at(x, y))
    }
}

/// Maps destination pixels onto source texels for a stretch of `texels` over `dst_w x dst_h`.
struct Sampler<'a> {
    texels: &'a Texels,
    dst_width: usize,
    dst_height: usize,
    flip_x: bool,
    flip_y: bool,
}

impl Sampler<'_> {
    fn point(&self, x: usize, y: usize) -> (usize, usize) {
        let mut sx = x * self.texels.width / self.dst_width;
        let mut sy = y * self.texels.height / self.dst_height;
        if self.flip_x {
            sx = self.texels.width - 1 - sx;
        }
        if self.flip_y {
            sy = self.texels.height - 1 - sy;
        }
        (sx, sy)
    }

    fn linear_argb(&self, x: usize, y: usize) -> u32 {
        let t = self.texels;
        let coord = |d: usize, dst: usize, src: usize, flip: bool| {
            let c = ((d as f32 + 0.5) * src as f32 / dst as f32 - 0.5).clamp(0.0, (src - 1) as f32);
            if flip {
                (src - 1) as f32 - c
            } else {
                c
            }
        };
        let u = coord(x, self.dst_width, t.width, self.flip_x);
        let v = coord(y, self.dst_height, t.height, self.flip_y);
        let (x0, y0) = (u.floor() as usize, v.floor() as usize);
        let (x1, y1) = ((x0 + 1).min(t.width - 1), (y0 + 1).min(t.height - 1));
        let (fx, fy) = (u - x0 as f32, v - y0 as f32);

        let texels = [t.argb_at(x0, y0), t.argb_at(x1, y0), t.argb_at(x0, y1), t.argb_at(x1, y1)];
        let mut out = 0u32;
        for shift in [0u32, 8, 16, 24] {
            let c = |p: u32| ((p >> shift) & 0xff) as f32;
            let top = c(texels[0]) * (1.0 - fx) + c(texels[1]) * fx;
            let bottom = c(texels[2]) * (1.0 - fx) + c(texels[3]) * fx;
            let value = (top * (1.0 - fy) + bottom * fy).round() as u32;
            out |= value.min(0xff) << shift;
        }
        out
    }
}

fn invalid_arg() -> ResourceError {
    ResourceError::Driver(HResult::E_INVALIDARG)
}

/// Normalizes a possibly mirrored rectangle (left > right or top > bottom).
fn normalize(rect: Rect) -> (Rect, bool, bool) {
    let flip_x = rect.left > rect.right;
    let flip_y = rect.top > rect.bottom;
    let normalized = Rect::new(
        rect.left.min(rect.right),
        rect.top.min(rect.bottom),
        rect.left.max(rect.right),
        rect.top.max(rect.bottom),
    );
    (normalized, flip_x, flip_y)
}

/// Blends `src` over `dst` with constant alpha `alpha`; the result is opaque.
fn blend(src: u32, dst: u32, alpha: u8) -> u32 {
    let a = u32::from(alpha);
    let mut out = 0xff00_0000;
    for shift in [0u32, 8, 16] {
        let s = (src >> shift) & 0xff;
        let d = (dst >> shift) & 0xff;
        out |= ((s * a + d * (255 - a) + 127) / 255) << shift;
    }
    out
}

fn apply_gamma(argb: u32, ramp: &GammaRamp) -> u32 {
    let channel = |table: &[u16; 256], shift: u32| u32::from(table[((argb >> shift) & 0xff) as usize] >> 8) << shift;
    (argb & 0xff00_0000) | channel(&ramp.red, 16) | channel(&ramp.green, 8) | channel(&ramp.blue, 0)
}

/// A registered cursor image: `A8R8G8B8` texels, transparent where alpha is zero.
#[derive(Debug, Clone)]
struct CursorImage {
    width: usize,
    height: usize,
    argb: Vec<u32>,
}

#[derive(Debug)]
pub struct SoftDevice {
    adapter: AdapterInfo,
    multisample: MultisampleConfig,
    resolution_scale: u32,
    next_handle: u64,
    resources: HashMap<ResourceHandle, SoftResource>,
    cursors: HashMap<CursorHandle, CursorImage>,
    calls: SoftCalls,
    failures: HashMap<Primitive, u32>,
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftDevice {
    /// 8192x8192 texture limit, hardware depth resolve, sRGB writes for the 32-bit RGB formats,
    /// no multisampling and no resolution scaling.
    pub fn new() -> Self {
        Self::with_adapter(AdapterInfo {
            max_texture_width: 8192,
            max_texture_height: 8192,
            msaa_depth_resolve_supported: true,
            srgb_write_formats: vec![D3dFormat::A8R8G8B8, D3dFormat::X8R8G8B8],
        })
    }

    pub fn with_adapter(adapter: AdapterInfo) -> Self {
        Self {
            adapter,
            multisample: MultisampleConfig::NONE,
            resolution_scale: 1,
            next_handle: 1,
            resources: HashMap::new(),
            cursors: HashMap::new(),
            calls: SoftCalls::default(),
            failures: HashMap::new(),
        }
    }

    /// Multisample configuration reported for every format.
    pub fn with_multisample(mut self, config: MultisampleConfig) -> Self {
        self.multisample = config;
        self
    }

    /// Integer factor applied by [`Device::scaled_size`].
    pub fn with_resolution_scale(mut self, factor: u32) -> Self {
        self.resolution_scale = factor.max(1);
        self
    }

    pub fn adapter_mut(&mut self) -> &mut AdapterInfo {
        &mut self.adapter
    }

    pub fn calls(&self) -> SoftCalls {
        self.calls
    }

    pub fn reset_calls(&mut self) {
        self.calls = SoftCalls::default();
    }

    /// Makes the next `count` calls of `primitive` fail with `E_FAIL`.
    pub fn fail_next(&mut self, primitive: Primitive, count: u32) {
        self.failures.insert(primitive, count);
    }

    pub fn is_live(&self, handle: ResourceHandle) -> bool {
        self.resources.contains_key(&handle)
    }

    pub fn live_resources(&self) -> usize {
        self.resources.len()
    }

    /// Creation request the driver received for `handle`.
    pub fn resource_args(&self, handle: ResourceHandle) -> Option<&CreateResourceArgs> {
        self.resources.get(&handle).map(|r| &r.args)
    }

    pub fn register_cursor(&mut self, cursor: CursorHandle, width: usize, height: usize, argb: Vec<u32>) {
        debug_assert_eq!(argb.len(), width * height);
        self.cursors.insert(cursor, CursorImage { width, height, argb });
    }

    /// Raw pixel value at `(x, y)`.
    pub fn pixel(&self, handle: ResourceHandle, sub_resource: u32, x: u32, y: u32) -> Option<u32> {
        let res = self.resources.get(&handle)?;
        let bpp = usize::from(res.info.bytes_per_pixel);
        let surface = res.surfaces.get(sub_resource as usize)?;
        if bpp == 0 || x >= surface.width || y >= surface.height {
            return None;
        }
        let offset = y as usize * surface.pitch as usize + x as usize * bpp;
        Some(read_pixel(&surface.bytes(bpp)[offset..], bpp))
    }

    /// Writes a raw pixel directly, as rendering by the GPU would.
    pub fn set_pixel(&mut self, handle: ResourceHandle, sub_resource: u32, x: u32, y: u32, value: u32) -> Result<()> {
        let rect = Rect::new(x as i32, y as i32, x as i32 + 1, y as i32 + 1);
        self.write_with(handle, sub_resource, rect, |_, _, _| Some(value))
    }

    /// Fills the whole sub-resource with a raw value, as rendering by the GPU would.
    pub fn fill(&mut self, handle: ResourceHandle, sub_resource: u32, value: u32) -> Result<()> {
        let rect = Rect::from_size(self.surface_size(handle, sub_resource)?);
        self.write_with(handle, sub_resource, rect, |_, _, _| Some(value))
    }

    pub fn surface_size(&self, handle: ResourceHandle, sub_resource: u32) -> Result<Size> {
        self.resources
            .get(&handle)
            .and_then(|r| r.surfaces.get(sub_resource as usize))
            .map(SoftSurface::size)
            .ok_or_else(invalid_arg)
    }

    fn enter(&mut self, primitive: Primitive) -> Result<()> {
        self.calls.bump(primitive);
        if let Some(remaining) = self.failures.get_mut(&primitive) {
            if *remaining > 0 {
                *remaining -= 1;
                trace!(?primitive, "injected driver failure");
                return Err(ResourceError::Driver(HResult::E_FAIL));
            }
        }
        Ok(())
    }

    fn info(&self, handle: ResourceHandle) -> Result<FormatInfo> {
        self.resources
            .get(&handle)
            .map(|r| r.info)
            .ok_or_else(invalid_arg)
    }

    fn read_texels(&self, handle: ResourceHandle, sub_resource: u32, rect: Rect) -> Result<Texels> {
        let res = self.resources.get(&handle).ok_or_else(invalid_arg)?;
        let surface = res
            .surfaces
            .get(sub_resource as usize)
            .ok_or_else(invalid_arg)?;
        if !rect.is_valid_within(surface.size()) {
            return Err(invalid_arg());
        }

        let bpp = usize::from(res.info.bytes_per_pixel);
        let (width, height) = (rect.width() as usize, rect.height() as usize);
        let mut raw = vec![0u32; width * height];
        if bpp != 0 {
            let bytes = surface.bytes(bpp);
            let pitch = surface.pitch as usize;
            for y in 0..height {
                let row = (rect.top as usize + y) * pitch + rect.left as usize * bpp;
                for x in 0..width {
                    raw[y * width + x] = read_pixel(&bytes[row + x * bpp..], bpp);
                }
            }
        }
        Ok(Texels {
            width,
            height,
            origin: Point::new(rect.left, rect.top),
            raw,
            info: res.info,
        })
    }

    /// Visits every pixel of `rect`; `f(x, y, current)` returns the new raw value or `None` to
    /// leave the pixel alone. Coordinates are relative to `rect`.
    fn write_with(
        &mut self,
        handle: ResourceHandle,
        sub_resource: u32,
        rect: Rect,
        mut f: impl FnMut(usize, usize, u32) -> Option<u32>,
    ) -> Result<()> {
        let res = self.resources.get_mut(&handle).ok_or_else(invalid_arg)?;
        let bpp = usize::from(res.info.bytes_per_pixel);
        let surface = res
            .surfaces
            .get_mut(sub_resource as usize)
            .ok_or_else(invalid_arg)?;
        if !rect.is_valid_within(surface.size()) {
            return Err(invalid_arg());
        }
        if bpp == 0 {
            return Ok(());
        }

        let pitch = surface.pitch as usize;
        let bytes = surface.bytes_mut(bpp);
        for y in 0..rect.height() as usize {
            let row = (rect.top as usize + y) * pitch + rect.left as usize * bpp;
            for x in 0..rect.width() as usize {
                let px = &mut bytes[row + x * bpp..];
                if let Some(value) = f(x, y, read_pixel(px, bpp)) {
                    write_pixel(px, bpp, value);
                }
            }
        }
        Ok(())
    }

    /// Stretches `src_rect` of `src` over `dst_rect` of `dst`, converting formats through ARGB.
    /// Raw values pass through untouched between identical or channel-less formats.
    #[allow(clippy::too_many_arguments)]
    fn stretch(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_sub_resource: u32,
        src_rect: Rect,
        linear: bool,
        mut keep: impl FnMut(u32, u32) -> bool,
    ) -> Result<()> {
        let (src_rect, flip_x, flip_y) = normalize(src_rect);
        let texels = self.read_texels(src, src_sub_resource, src_rect)?;
        let dst_info = self.info(dst)?;
        let passthrough = texels.info.format == dst_info.format
            || !texels.info.has_color_channels()
            || !dst_info.has_color_channels();
        let linear = linear && !passthrough;
        let sampler = Sampler {
            texels: &texels,
            dst_width: dst_rect.width().max(1) as usize,
            dst_height: dst_rect.height().max(1) as usize,
            flip_x,
            flip_y,
        };

        self.write_with(dst, dst_sub_resource, dst_rect, |x, y, current| {
            let (sx, sy) = sampler.point(x, y);
            let raw = texels.raw_at(sx, sy);
            if !keep(raw, current) {
                return None;
            }
            Some(if linear {
                dst_info.encode_argb(sampler.linear_argb(x, y))
            } else if passthrough {
                raw
            } else {
                dst_info.encode_argb(texels.info.decode_argb(raw))
            })
        })
    }
}

impl ShaderBlitter for SoftDevice {
    fn texture_blt(&mut self, blt: &TextureBlt<'_>) -> Result<()> {
        self.enter(Primitive::TextureBlt)?;
        let (src_rect, flip_x, flip_y) = normalize(blt.src_rect);
        let texels = self.read_texels(blt.src, blt.src_sub_resource, src_rect)?;
        let dst_info = self.info(blt.dst)?;
        let sampler = Sampler {
            texels: &texels,
            dst_width: blt.dst_rect.width().max(1) as usize,
            dst_height: blt.dst_rect.height().max(1) as usize,
            flip_x,
            flip_y,
        };

        self.write_with(blt.dst, blt.dst_sub_resource, blt.dst_rect, |x, y, current| {
            let (sx, sy) = sampler.point(x, y);
            if let Some(region) = blt.region {
                let p = Point::new(texels.origin.x + sx as i32, texels.origin.y + sy as i32);
                if !region.iter().any(|r| r.contains(p)) {
                    return None;
                }
            }
            let texel = texels.argb_at(sx, sy);
            if blt.color_key.is_some_and(|key| texel & 0x00ff_ffff == key) {
                return None;
            }
            let mut argb = match blt.filter {
                TextureFilter::Point => texel,
                TextureFilter::Linear => sampler.linear_argb(x, y),
            };
            if let Some(alpha) = blt.alpha {
                argb = blend(argb, dst_info.decode_argb(current), alpha);
            }
            Some(dst_info.encode_argb(argb))
        })
    }

    fn depth_blt(
        &mut self,
        dst: ResourceHandle,
        dst_rect: Rect,
        src: ResourceHandle,
        src_rect: Rect,
        _null_surface: Option<ResourceHandle>,
    ) -> Result<()> {
        self.enter(Primitive::DepthBlt)?;
        self.stretch(dst, 0, dst_rect, src, 0, src_rect, false, |_, _| true)
    }

    fn palettized_blt(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_sub_resource: u32,
        src_rect: Rect,
        palette: &Palette,
    ) -> Result<()> {
        self.enter(Primitive::PalettizedBlt)?;
        let texels = self.read_texels(src, src_sub_resource, src_rect)?;
        let dst_info = self.info(dst)?;
        let sampler = Sampler {
            texels: &texels,
            dst_width: dst_rect.width().max(1) as usize,
            dst_height: dst_rect.height().max(1) as usize,
            flip_x: false,
            flip_y: false,
        };
        self.write_with(dst, dst_sub_resource, dst_rect, |x, y, _| {
            let (sx, sy) = sampler.point(x, y);
            let index = (texels.raw_at(sx, sy) & 0xff) as usize;
            Some(dst_info.encode_argb(palette[index].to_argb()))
        })
    }

    fn cursor_blt(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        cursor: CursorHandle,
        position: Point,
    ) -> Result<()> {
        self.enter(Primitive::CursorBlt)?;
        let Some(image) = self.cursors.get(&cursor).cloned() else {
            return Ok(());
        };
        let placed = Rect::new(
            dst_rect.left + position.x,
            dst_rect.top + position.y,
            dst_rect.left + position.x + image.width as i32,
            dst_rect.top + position.y + image.height as i32,
        );
        let visible = placed.intersect(&dst_rect);
        if visible.is_empty() {
            return Ok(());
        }
        let dst_info = self.info(dst)?;
        let (dx, dy) = ((visible.left - placed.left) as usize, (visible.top - placed.top) as usize);
        self.write_with(dst, dst_sub_resource, visible, |x, y, _| {
            let argb = image.argb[(y + dy) * image.width + x + dx];
            (argb >> 24 != 0).then(|| dst_info.encode_argb(argb))
        })
    }

    fn gamma_blt(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_rect: Rect,
        ramp: &GammaRamp,
    ) -> Result<()> {
        self.enter(Primitive::GammaBlt)?;
        let texels = self.read_texels(src, 0, src_rect)?;
        let dst_info = self.info(dst)?;
        let sampler = Sampler {
            texels: &texels,
            dst_width: dst_rect.width().max(1) as usize,
            dst_height: dst_rect.height().max(1) as usize,
            flip_x: false,
            flip_y: false,
        };
        self.write_with(dst, dst_sub_resource, dst_rect, |x, y, _| {
            let (sx, sy) = sampler.point(x, y);
            Some(dst_info.encode_argb(apply_gamma(texels.argb_at(sx, sy), ramp)))
        })
    }

    fn bilinear_blt(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_rect: Rect,
        _blur: u32,
    ) -> Result<()> {
        self.enter(Primitive::BilinearBlt)?;
        let texels = self.read_texels(src, 0, src_rect)?;
        let dst_info = self.info(dst)?;
        let sampler = Sampler {
            texels: &texels,
            dst_width: dst_rect.width().max(1) as usize,
            dst_height: dst_rect.height().max(1) as usize,
            flip_x: false,
            flip_y: false,
        };
        self.write_with(dst, dst_sub_resource, dst_rect, |x, y, _| {
            Some(dst_info.encode_argb(sampler.linear_argb(x, y)))
        })
    }

    fn lock_ref_blt(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_sub_resource: u32,
        src_rect: Rect,
        lock_ref: ResourceHandle,
    ) -> Result<()> {
        self.enter(Primitive::LockRefBlt)?;
        let texels = self.read_texels(src, src_sub_resource, src_rect)?;
        let reference = self.read_texels(lock_ref, dst_sub_resource, src_rect)?;
        let dst_info = self.info(dst)?;
        let sampler = Sampler {
            texels: &texels,
            dst_width: dst_rect.width().max(1) as usize,
            dst_height: dst_rect.height().max(1) as usize,
            flip_x: false,
            flip_y: false,
        };
        self.write_with(dst, dst_sub_resource, dst_rect, |x, y, _| {
            let (sx, sy) = sampler.point(x, y);
            let raw = texels.raw_at(sx, sy);
            (raw != reference.raw_at(sx, sy)).then(|| dst_info.encode_argb(texels.info.decode_argb(raw)))
        })
    }

    fn resolve_msaa_depth(&mut self, msaa: ResourceHandle, resolved: ResourceHandle) -> Result<()> {
        self.enter(Primitive::ResolveMsaaDepth)?;
        let count = {
            let a = self.resources.get(&msaa).ok_or_else(invalid_arg)?;
            let b = self.resources.get(&resolved).ok_or_else(invalid_arg)?;
            a.surfaces.len().min(b.surfaces.len()) as u32
        };
        for sub in 0..count {
            let src_rect = Rect::from_size(self.surface_size(msaa, sub)?);
            let dst_rect = Rect::from_size(self.surface_size(resolved, sub)?);
            self.stretch(resolved, sub, dst_rect, msaa, sub, src_rect, false, |_, _| true)?;
        }
        Ok(())
    }
}

impl Device for SoftDevice {
    fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn multisample_config(&self, _format: D3dFormat) -> MultisampleConfig {
        self.multisample
    }

    fn scaled_size(&self, size: Size) -> Size {
        Size::new(size.width * self.resolution_scale, size.height * self.resolution_scale)
    }

    fn create_resource(&mut self, args: &CreateResourceArgs) -> Result<ResourceHandle> {
        self.enter(Primitive::CreateResource)?;
        if args.surfaces.is_empty() {
            return Err(invalid_arg());
        }

        let info = format_info(args.format);
        let bpp = usize::from(info.bytes_per_pixel);
        let surfaces = args
            .surfaces
            .iter()
            .map(|s| match (args.pool, s.sys_mem) {
                (Pool::SystemMemory, Some(ptr)) => SoftSurface {
                    width: s.width,
                    height: s.height,
                    pitch: s.sys_mem_pitch,
                    storage: Storage::External(ptr),
                },
                _ => {
                    let pitch = s.width * bpp as u32;
                    SoftSurface {
                        width: s.width,
                        height: s.height,
                        pitch,
                        storage: Storage::Owned(vec![0u8; pitch as usize * s.height as usize]),
                    }
                }
            })
            .collect();

        let handle = ResourceHandle(self.next_handle);
        self.next_handle += 1;
        self.resources.insert(
            handle,
            SoftResource {
                args: args.clone(),
                info,
                surfaces,
            },
        );
        trace!(?handle, format = ?args.format, pool = ?args.pool, "soft resource created");
        Ok(handle)
    }

    fn destroy_resource(&mut self, handle: ResourceHandle) -> Result<()> {
        self.enter(Primitive::DestroyResource)?;
        self.resources
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(invalid_arg)
    }

    fn lock(&mut self, args: &LockArgs) -> Result<LockedRect> {
        if args.flags.contains(LockFlags::NOTIFY_ONLY) {
            self.calls.notify_lock += 1;
        } else {
            self.enter(Primitive::Lock)?;
        }

        let res = self.resources.get_mut(&args.resource).ok_or_else(invalid_arg)?;
        let bpp = usize::from(res.info.bytes_per_pixel);
        let surface = res
            .surfaces
            .get_mut(args.sub_resource as usize)
            .ok_or_else(invalid_arg)?;
        let pitch = surface.pitch;
        if args.flags.contains(LockFlags::NOTIFY_ONLY) {
            return Ok(LockedRect { data: None, pitch });
        }

        let mut offset = 0;
        if args.flags.contains(LockFlags::AREA_VALID) {
            if !args.area.is_valid_within(surface.size()) {
                return Err(invalid_arg());
            }
            offset = args.area.top as usize * pitch as usize + args.area.left as usize * bpp;
        }
        let base = surface
            .base_ptr()
            .ok_or(ResourceError::Driver(HResult::E_FAIL))?;
        Ok(LockedRect {
            // SAFETY: `offset` addresses a pixel inside the surface.
            data: Some(unsafe { base.add(offset) }),
            pitch,
        })
    }

    fn unlock(&mut self, args: &UnlockArgs) -> Result<()> {
        self.enter(Primitive::Unlock)?;
        if self.resources.contains_key(&args.resource) {
            Ok(())
        } else {
            Err(invalid_arg())
        }
    }

    fn blt(&mut self, args: &BltArgs) -> Result<()> {
        self.enter(Primitive::Blt)?;
        let mut src_rect = args.src_rect;
        if args.flags.contains(BltFlags::MIRROR_LEFT_RIGHT) {
            std::mem::swap(&mut src_rect.left, &mut src_rect.right);
        }
        if args.flags.contains(BltFlags::MIRROR_UP_DOWN) {
            std::mem::swap(&mut src_rect.top, &mut src_rect.bottom);
        }

        let src_mask = self.info(args.src)?.raw_mask();
        let dst_mask = self.info(args.dst)?.raw_mask();
        let src_key = args
            .flags
            .contains(BltFlags::SRC_COLOR_KEY)
            .then_some(args.color_key & src_mask);
        let dst_key = args
            .flags
            .contains(BltFlags::DST_COLOR_KEY)
            .then_some(args.color_key & dst_mask);
        self.stretch(
            args.dst,
            args.dst_sub_resource,
            args.dst_rect,
            args.src,
            args.src_sub_resource,
            src_rect,
            args.flags.contains(BltFlags::LINEAR),
            |raw, current| src_key != Some(raw) && dst_key.map_or(true, |key| current == key),
        )
    }

    fn color_fill(&mut self, args: &ColorFillArgs) -> Result<()> {
        self.enter(Primitive::ColorFill)?;
        let value = self.info(args.resource)?.encode_argb(args.color);
        self.write_with(args.resource, args.sub_resource, args.rect, |_, _, _| Some(value))
    }
}
