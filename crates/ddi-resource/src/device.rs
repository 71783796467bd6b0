//! Capability interface onto the native driver.
//!
//! [`Device`] mirrors the handful of driver-table entries the engine calls (create, destroy,
//! lock, unlock, blt, colour fill); [`ShaderBlitter`] is the programmable-pipeline façade used
//! whenever a transfer needs filtering, colour keying or format conversion the fixed-function
//! blit cannot do. Any concrete binding implements both; [`crate::soft::SoftDevice`] is the
//! in-tree software implementation.

use std::ptr::NonNull;

use bitflags::bitflags;

use crate::error::Result;
use crate::format::D3dFormat;
use crate::rect::{Point, Rect, Size};

/// Opaque driver handle for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pool {
    #[default]
    VideoMemory,
    SystemMemory,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u32 {
        const RENDER_TARGET = 1 << 0;
        const ZBUFFER = 1 << 1;
        const DMAP = 1 << 2;
        const POINTS = 1 << 3;
        const RT_PATCHES = 1 << 4;
        const N_PATCHES = 1 << 5;
        const VIDEO = 1 << 6;
        const CAPTURE_BUFFER = 1 << 7;
        const MATCH_GDI_PRIMARY = 1 << 8;
        const PRIMARY = 1 << 9;
        const TEXTURE = 1 << 10;
        const CUBE_MAP = 1 << 11;
        const VERTEX_BUFFER = 1 << 12;
        const INDEX_BUFFER = 1 << 13;
        const DECODE_RENDER_TARGET = 1 << 14;
        const DECODE_COMPRESSED_BUFFER = 1 << 15;
        const VIDEO_PROCESS_RENDER_TARGET = 1 << 16;
        const OVERLAY = 1 << 17;
        const TEXT_API = 1 << 18;
        const MIGHT_DRAW_FROM_LOCKED = 1 << 19;
        const DYNAMIC = 1 << 20;
    }
}

impl ResourceFlags {
    /// Flags that give a resource a dedicated type. Typed resources (other than plain render
    /// targets) never get a system-memory lock mirror.
    pub fn resource_type_flags() -> Self {
        Self::RENDER_TARGET
            | Self::ZBUFFER
            | Self::DMAP
            | Self::POINTS
            | Self::RT_PATCHES
            | Self::N_PATCHES
            | Self::VIDEO
            | Self::CAPTURE_BUFFER
            | Self::MATCH_GDI_PRIMARY
            | Self::PRIMARY
            | Self::TEXTURE
            | Self::CUBE_MAP
            | Self::VERTEX_BUFFER
            | Self::INDEX_BUFFER
            | Self::DECODE_RENDER_TARGET
            | Self::DECODE_COMPRESSED_BUFFER
            | Self::VIDEO_PROCESS_RENDER_TARGET
            | Self::OVERLAY
            | Self::TEXT_API
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MultisampleConfig {
    /// Zero means no multisampling.
    pub samples: u32,
    pub quality: u32,
}

impl MultisampleConfig {
    pub const NONE: MultisampleConfig = MultisampleConfig {
        samples: 0,
        quality: 0,
    };

    pub fn new(samples: u32, quality: u32) -> Self {
        Self { samples, quality }
    }

    pub fn is_none(&self) -> bool {
        self.samples == 0
    }
}

/// Pointer into CPU-addressable pixel memory (caller-owned system-memory surfaces or the
/// engine's lock buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SysMemPtr(NonNull<u8>);

// SAFETY: the pointer is only dereferenced while the process-wide critical section is held
// (see `crate::sync`), which serializes every access to the memory it points at.
unsafe impl Send for SysMemPtr {}
// SAFETY: as above.
unsafe impl Sync for SysMemPtr {}

impl SysMemPtr {
    pub fn new(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    /// Pointer `bytes` further into the same allocation.
    ///
    /// # Safety
    /// The result must stay within the allocation the pointer was derived from.
    pub unsafe fn add(self, bytes: usize) -> Self {
        // SAFETY: forwarded to the caller.
        Self(unsafe { NonNull::new_unchecked(self.0.as_ptr().add(bytes)) })
    }

    /// # Safety
    /// `len` bytes starting at the pointer must be valid for reads and not concurrently
    /// written for the lifetime of the slice.
    pub unsafe fn as_slice<'a>(self, len: usize) -> &'a [u8] {
        // SAFETY: forwarded to the caller.
        unsafe { std::slice::from_raw_parts(self.0.as_ptr(), len) }
    }

    /// # Safety
    /// `len` bytes starting at the pointer must be valid for writes and not aliased for the
    /// lifetime of the slice.
    pub unsafe fn as_mut_slice<'a>(self, len: usize) -> &'a mut [u8] {
        // SAFETY: forwarded to the caller.
        unsafe { std::slice::from_raw_parts_mut(self.0.as_ptr(), len) }
    }
}

/// Number of bytes spanned by `height` rows of `row_bytes` at `pitch`.
pub fn surface_span(pitch: u32, row_bytes: usize, height: u32) -> usize {
    if height == 0 {
        return 0;
    }
    pitch as usize * (height as usize - 1) + row_bytes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub sys_mem: Option<SysMemPtr>,
    pub sys_mem_pitch: u32,
}

impl SurfaceInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Resource creation request (`D3DDDIARG_CREATERESOURCE2` equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateResourceArgs {
    pub format: D3dFormat,
    pub pool: Pool,
    pub flags: ResourceFlags,
    pub multisample: MultisampleConfig,
    pub surfaces: Vec<SurfaceInfo>,
}

impl CreateResourceArgs {
    pub fn surface_count(&self) -> u32 {
        self.surfaces.len() as u32
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LockFlags: u32 {
        const READ_ONLY = 1 << 0;
        const AREA_VALID = 1 << 1;
        /// Tell the driver the CPU touched the memory; no pointer is requested.
        const NOTIFY_ONLY = 1 << 2;
        const DISCARD = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockArgs {
    pub resource: ResourceHandle,
    pub sub_resource: u32,
    pub area: Rect,
    pub flags: LockFlags,
}

impl LockArgs {
    pub fn new(resource: ResourceHandle, sub_resource: u32, flags: LockFlags) -> Self {
        Self {
            resource,
            sub_resource,
            area: Rect::default(),
            flags,
        }
    }

    pub fn with_area(mut self, area: Rect) -> Self {
        self.area = area;
        self.flags |= LockFlags::AREA_VALID;
        self
    }
}

/// Result of a successful lock. `data` is `None` for notify-only locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedRect {
    pub data: Option<SysMemPtr>,
    pub pitch: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockArgs {
    pub resource: ResourceHandle,
    pub sub_resource: u32,
    pub notify_only: bool,
}

impl UnlockArgs {
    pub fn new(resource: ResourceHandle, sub_resource: u32) -> Self {
        Self {
            resource,
            sub_resource,
            notify_only: false,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BltFlags: u32 {
        const MIRROR_LEFT_RIGHT = 1 << 0;
        const MIRROR_UP_DOWN = 1 << 1;
        const SRC_COLOR_KEY = 1 << 2;
        const DST_COLOR_KEY = 1 << 3;
        const POINT = 1 << 4;
        const LINEAR = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BltArgs {
    pub src: ResourceHandle,
    pub src_sub_resource: u32,
    pub src_rect: Rect,
    pub dst: ResourceHandle,
    pub dst_sub_resource: u32,
    pub dst_rect: Rect,
    pub flags: BltFlags,
    /// Raw pixel value in the source (or destination, for `DST_COLOR_KEY`) format.
    pub color_key: u32,
}

impl BltArgs {
    /// Point-filtered copy between two sub-resources.
    pub fn copy(
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_sub_resource: u32,
        src_rect: Rect,
    ) -> Self {
        Self {
            src,
            src_sub_resource,
            src_rect,
            dst,
            dst_sub_resource,
            dst_rect,
            flags: BltFlags::POINT,
            color_key: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorFillArgs {
    pub resource: ResourceHandle,
    pub sub_resource: u32,
    pub rect: Rect,
    /// `0xAARRGGBB`.
    pub color: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdapterInfo {
    pub max_texture_width: u32,
    pub max_texture_height: u32,
    pub msaa_depth_resolve_supported: bool,
    /// Formats the device can render to with sRGB write enabled.
    pub srgb_write_formats: Vec<D3dFormat>,
}

impl AdapterInfo {
    pub fn supports_srgb_write(&self, format: D3dFormat) -> bool {
        self.srgb_write_formats.contains(&format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFilter {
    #[default]
    Point,
    Linear,
}

/// RGB palette entry (`RGBQUAD` layout).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PaletteEntry {
    pub blue: u8,
    pub green: u8,
    pub red: u8,
    pub reserved: u8,
}

impl PaletteEntry {
    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self {
            blue,
            green,
            red,
            reserved: 0,
        }
    }

    pub fn to_argb(self) -> u32 {
        0xff00_0000 | (u32::from(self.red) << 16) | (u32::from(self.green) << 8) | u32::from(self.blue)
    }

    /// Colour equality, ignoring the reserved byte.
    pub fn same_color(&self, other: &PaletteEntry) -> bool {
        let mask = |e: &PaletteEntry| bytemuck::cast::<PaletteEntry, u32>(*e) & 0x00ff_ffff;
        mask(self) == mask(other)
    }
}

pub type Palette = [PaletteEntry; 256];

/// 256-entry-per-channel gamma ramp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GammaRamp {
    pub red: [u16; 256],
    pub green: [u16; 256],
    pub blue: [u16; 256],
}

impl GammaRamp {
    pub fn identity() -> Self {
        let mut ramp = [0u16; 256];
        for (i, v) in ramp.iter_mut().enumerate() {
            *v = (i as u16) * 0x101;
        }
        Self {
            red: ramp,
            green: ramp,
            blue: ramp,
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::identity()
    }
}

impl Default for GammaRamp {
    fn default() -> Self {
        Self::identity()
    }
}

/// Opaque cursor image handle understood by the shader blitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorHandle(pub u64);

/// Textured blit request for [`ShaderBlitter::texture_blt`].
#[derive(Debug, Clone, Copy)]
pub struct TextureBlt<'a> {
    pub dst: ResourceHandle,
    pub dst_sub_resource: u32,
    pub dst_rect: Rect,
    pub src: ResourceHandle,
    pub src_sub_resource: u32,
    /// Swapped left/right or top/bottom requests mirroring.
    pub src_rect: Rect,
    pub filter: TextureFilter,
    /// RGB (`0x00RRGGBB`) treated as transparent.
    pub color_key: Option<u32>,
    /// Constant source alpha blended over the destination.
    pub alpha: Option<u8>,
    /// Region mask in source coordinates; texels outside it are not written.
    pub region: Option<&'a [Rect]>,
}

impl<'a> TextureBlt<'a> {
    pub fn new(
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_sub_resource: u32,
        src_rect: Rect,
        filter: TextureFilter,
    ) -> Self {
        Self {
            dst,
            dst_sub_resource,
            dst_rect,
            src,
            src_sub_resource,
            src_rect,
            filter,
            color_key: None,
            alpha: None,
            region: None,
        }
    }
}

/// GPU blit façade.
pub trait ShaderBlitter {
    fn texture_blt(&mut self, blt: &TextureBlt<'_>) -> Result<()>;

    /// Depth copy through a pixel shader; `null_surface` is bound as the colour target.
    fn depth_blt(
        &mut self,
        dst: ResourceHandle,
        dst_rect: Rect,
        src: ResourceHandle,
        src_rect: Rect,
        null_surface: Option<ResourceHandle>,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn palettized_blt(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_sub_resource: u32,
        src_rect: Rect,
        palette: &Palette,
    ) -> Result<()>;

    fn cursor_blt(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        cursor: CursorHandle,
        position: Point,
    ) -> Result<()>;

    fn gamma_blt(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_rect: Rect,
        ramp: &GammaRamp,
    ) -> Result<()>;

    fn bilinear_blt(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_rect: Rect,
        blur: u32,
    ) -> Result<()>;

    /// Copies only the texels of `src` that differ from `lock_ref` into `dst`.
    #[allow(clippy::too_many_arguments)]
    fn lock_ref_blt(
        &mut self,
        dst: ResourceHandle,
        dst_sub_resource: u32,
        dst_rect: Rect,
        src: ResourceHandle,
        src_sub_resource: u32,
        src_rect: Rect,
        lock_ref: ResourceHandle,
    ) -> Result<()>;

    /// Vendor hardware resolve of a multisampled depth buffer into `resolved`.
    fn resolve_msaa_depth(&mut self, msaa: ResourceHandle, resolved: ResourceHandle) -> Result<()>;
}

/// Native driver function table plus adapter capabilities.
pub trait Device: ShaderBlitter {
    fn adapter_info(&self) -> &AdapterInfo;

    /// Multisample configuration the adapter would use for `format` when antialiasing is on.
    fn multisample_config(&self, format: D3dFormat) -> MultisampleConfig;

    /// Physical size for a logical render size under the current resolution scale.
    fn scaled_size(&self, size: Size) -> Size;

    fn create_resource(&mut self, args: &CreateResourceArgs) -> Result<ResourceHandle>;

    fn destroy_resource(&mut self, handle: ResourceHandle) -> Result<()>;

    fn lock(&mut self, args: &LockArgs) -> Result<LockedRect>;

    fn unlock(&mut self, args: &UnlockArgs) -> Result<()>;

    fn blt(&mut self, args: &BltArgs) -> Result<()>;

    fn color_fill(&mut self, args: &ColorFillArgs) -> Result<()>;
}
