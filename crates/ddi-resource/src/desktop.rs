//! Desktop-side collaborator queried by presentation and construction.

use crate::device::{CursorHandle, GammaRamp, Palette, PaletteEntry};
use crate::rect::{Point, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

/// A visible layered window overlapping the emulated display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayeredWindow {
    pub id: WindowId,
    /// Screen coordinates.
    pub rect: Rect,
    /// `COLORREF` (`0x00BBGGRR`) treated as transparent.
    pub color_key: Option<u32>,
    pub alpha: Option<u8>,
    /// Visible region in screen coordinates.
    pub region: Option<Vec<Rect>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorInfo {
    pub cursor: CursorHandle,
    pub position: Point,
}

pub trait Desktop {
    /// Monitor rectangle of the emulated display mode.
    fn monitor_rect(&self) -> Rect;

    /// Monitor rectangle of the real display.
    fn real_monitor_rect(&self) -> Rect;

    fn visible_layered_windows(&self) -> Vec<LayeredWindow>;

    /// Copies `area` (window-relative) of the window's backing pixels as `A8R8G8B8` rows of
    /// `pitch` bytes into `dst`. Returns `false` when the window can no longer be captured.
    fn capture_window(&self, window: WindowId, area: Rect, dst: &mut [u8], pitch: u32) -> bool;

    /// Cursor image to draw when the cursor is emulated and showing.
    fn emulated_cursor(&self) -> Option<CursorInfo>;

    fn hardware_palette(&self) -> Palette;

    fn gamma_ramp(&self) -> GammaRamp;
}

/// In-memory desktop with fixed monitor geometry and no overlays.
#[derive(Debug, Clone)]
pub struct FixedDesktop {
    pub monitor: Rect,
    pub real_monitor: Rect,
    pub layered_windows: Vec<(LayeredWindow, u32)>,
    pub cursor: Option<CursorInfo>,
    pub palette: Palette,
    pub gamma: GammaRamp,
}

impl FixedDesktop {
    pub fn new(monitor: Rect, real_monitor: Rect) -> Self {
        Self {
            monitor,
            real_monitor,
            layered_windows: Vec::new(),
            cursor: None,
            palette: [PaletteEntry::default(); 256],
            gamma: GammaRamp::identity(),
        }
    }

    /// Adds a layered window whose backing pixels are a solid `A8R8G8B8` colour.
    pub fn with_layered_window(mut self, window: LayeredWindow, argb: u32) -> Self {
        self.layered_windows.push((window, argb));
        self
    }
}

impl Default for FixedDesktop {
    fn default() -> Self {
        let r = Rect::new(0, 0, 1024, 768);
        Self::new(r, r)
    }
}

impl Desktop for FixedDesktop {
    fn monitor_rect(&self) -> Rect {
        self.monitor
    }

    fn real_monitor_rect(&self) -> Rect {
        self.real_monitor
    }

    fn visible_layered_windows(&self) -> Vec<LayeredWindow> {
        self.layered_windows.iter().map(|(w, _)| w.clone()).collect()
    }

    fn capture_window(&self, window: WindowId, area: Rect, dst: &mut [u8], pitch: u32) -> bool {
        let Some((_, argb)) = self.layered_windows.iter().find(|(w, _)| w.id == window) else {
            return false;
        };
        let bytes = argb.to_le_bytes();
        for y in 0..area.height().max(0) as usize {
            let Some(row) = dst.get_mut(y * pitch as usize..) else {
                break;
            };
            for px in row.chunks_exact_mut(4).take(area.width().max(0) as usize) {
                px.copy_from_slice(&bytes);
            }
        }
        true
    }

    fn emulated_cursor(&self) -> Option<CursorInfo> {
        self.cursor
    }

    fn hardware_palette(&self) -> Palette {
        self.palette
    }

    fn gamma_ramp(&self) -> GammaRamp {
        self.gamma.clone()
    }
}
