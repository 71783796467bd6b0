//! Creation-parameter normalization.
//!
//! Turns the caller's creation request into the request actually sent to the driver. The
//! format and multisample overrides used while building auxiliary surfaces travel in an
//! explicit [`ConstructionContext`] that only lives for one creation call.

use tracing::debug;

use crate::config::RenderColorDepth;
use crate::device::{AdapterInfo, CreateResourceArgs, MultisampleConfig, Pool, ResourceFlags};
use crate::error::{ResourceError, Result};
use crate::format::{format_info, D3dFormat};
use crate::rect::Rect;

/// Overrides applied to the single resource being constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConstructionContext {
    pub format_override: Option<D3dFormat>,
    pub msaa_override: Option<MultisampleConfig>,
}

impl ConstructionContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: D3dFormat) -> Self {
        self.format_override = Some(format);
        self
    }

    /// `NONE` leaves the request untouched.
    pub fn with_msaa(mut self, msaa: MultisampleConfig) -> Self {
        self.msaa_override = (!msaa.is_none()).then_some(msaa);
        self
    }
}

/// Fixed request plus what fixup learned while producing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedResource {
    pub args: CreateResourceArgs,
    pub is_oversized: bool,
}

/// Rejects requests the engine refuses to construct.
pub fn check_create_args(args: &CreateResourceArgs) -> Result<()> {
    if args.surfaces.is_empty() {
        return Err(ResourceError::InvalidCall("resource without surfaces"));
    }
    if args.flags.contains(ResourceFlags::VERTEX_BUFFER | ResourceFlags::MIGHT_DRAW_FROM_LOCKED)
        && args.pool != Pool::SystemMemory
    {
        return Err(ResourceError::InvalidCall(
            "draw-from-locked vertex buffer outside system memory",
        ));
    }
    Ok(())
}

/// Produces the driver request for `orig`.
///
/// * desktop-matching resources take the real monitor size and `X8R8G8B8`;
/// * context overrides replace format and multisample mode (a depth buffer with a format
///   override also becomes a texture, so it can be sampled after a resolve);
/// * single-surface system-memory requests without depth are clamped to the adapter's
///   texture limits.
pub fn fix_resource_data(
    orig: &CreateResourceArgs,
    ctx: &ConstructionContext,
    adapter: &AdapterInfo,
    real_monitor_rect: Rect,
) -> FixedResource {
    let mut args = orig.clone();
    let mut is_oversized = false;

    if args.flags.contains(ResourceFlags::MATCH_GDI_PRIMARY) {
        if !real_monitor_rect.is_empty() {
            for surface in &mut args.surfaces {
                surface.width = real_monitor_rect.width() as u32;
                surface.height = real_monitor_rect.height() as u32;
            }
        }
        args.format = D3dFormat::X8R8G8B8;
    }

    if let Some(format) = ctx.format_override {
        args.format = format;
        if args.flags.contains(ResourceFlags::ZBUFFER) {
            args.flags |= ResourceFlags::TEXTURE;
        }
    }

    if let Some(msaa) = ctx.msaa_override {
        args.multisample = msaa;
    }

    if args.pool == Pool::SystemMemory
        && args.surfaces.len() == 1
        && args.surfaces[0].depth == 0
        && format_info(args.format).bytes_per_pixel != 0
    {
        let surface = &mut args.surfaces[0];
        if surface.width > adapter.max_texture_width {
            surface.width = adapter.max_texture_width;
            is_oversized = true;
        }
        if surface.height > adapter.max_texture_height {
            surface.height = adapter.max_texture_height;
            is_oversized = true;
        }
        if is_oversized {
            debug!(
                width = surface.width,
                height = surface.height,
                "clamped oversized system-memory surface"
            );
        }
    }

    FixedResource { args, is_oversized }
}

/// Render format selected by the colour-depth setting; only the two desktop formats follow it.
pub fn format_config(format: D3dFormat, depth: RenderColorDepth) -> D3dFormat {
    if matches!(format, D3dFormat::X8R8G8B8 | D3dFormat::R5G6B5) {
        match depth {
            RenderColorDepth::Bpp16 => return D3dFormat::R5G6B5,
            RenderColorDepth::Bpp32 => return D3dFormat::X8R8G8B8,
            RenderColorDepth::App => {}
        }
    }
    format
}
