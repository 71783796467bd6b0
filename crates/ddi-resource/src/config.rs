//! Read-only configuration inputs.
//!
//! Parsing lives with the host; the engine only consumes these plain values and re-runs
//! reconfiguration when they change (see [`crate::Engine::set_config`]).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderColorDepth {
    /// Keep whatever the application requested.
    #[default]
    App,
    Bpp16,
    Bpp32,
}

/// Scope of the multisample override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Antialiasing {
    #[default]
    Off,
    /// Render targets and depth buffers pick up the adapter's multisample configuration.
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BltFilter {
    Native,
    #[default]
    Point,
    Bilinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayFilter {
    #[default]
    Point,
    /// Bilinear upscale with a blur parameter forwarded to the shader.
    Bilinear { blur: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionScaleFilter {
    #[default]
    Point,
    Bilinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    pub render_color_depth: RenderColorDepth,
    pub antialiasing: Antialiasing,
    pub blt_filter: BltFilter,
    pub display_filter: DisplayFilter,
    pub resolution_scale_filter: ResolutionScaleFilter,
    pub palettized_textures: bool,
}
