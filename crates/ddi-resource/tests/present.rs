mod common;

use anyhow::Result;
use ddi_resource::config::DisplayFilter;
use ddi_resource::desktop::CursorInfo;
use ddi_resource::device::{CursorHandle, GammaRamp};
use ddi_resource::{
    BltArgs, ColorFillArgs, Config, D3dFormat, Engine, FixedDesktop, LayeredWindow, Point, Pool, Rect,
    Primitive, ResourceFlags, ResourceHandle, SoftDevice, WindowId,
};
use pretty_assertions::assert_eq;

use common::*;

const RED: u32 = 0x00ff_0000;
const GREEN: u32 = 0x0000_ff00;

fn desktop() -> FixedDesktop {
    FixedDesktop::new(Rect::new(0, 0, 640, 480), Rect::new(0, 0, 1920, 1080))
}

/// Creates the desktop primary and a red 640x480 back buffer.
fn setup(engine: &mut Engine<SoftDevice>) -> Result<(ResourceHandle, ResourceHandle)> {
    let primary = engine.create_resource(&args(
        D3dFormat::X8R8G8B8,
        Pool::VideoMemory,
        ResourceFlags::MATCH_GDI_PRIMARY,
        640,
        480,
    ))?;
    let frame = engine.create_resource(&plain_surface(D3dFormat::X8R8G8B8, 640, 480))?;
    engine.color_fill(&ColorFillArgs {
        resource: frame,
        sub_resource: 0,
        rect: Rect::new(0, 0, 640, 480),
        color: 0xffff_0000,
    })?;
    Ok((primary, frame))
}

fn present(engine: &mut Engine<SoftDevice>, primary: ResourceHandle, frame: ResourceHandle) -> Result<()> {
    let r = Rect::new(0, 0, 640, 480);
    engine.blt(&BltArgs::copy(primary, 0, r, frame, 0, r))?;
    Ok(())
}

#[test]
fn desktop_primary_enters_pillarboxed_fullscreen() -> Result<()> {
    init_tracing();
    let mut engine = Engine::new(SoftDevice::new(), Config::default(), desktop());
    let (primary, _) = setup(&mut engine)?;

    assert_eq!(engine.resource_size(primary, 0)?, ddi_resource::Size::new(1920, 1080));
    let state = engine.presentation_state();
    assert_eq!(state.rect, Rect::new(240, 0, 1680, 1080));
    assert!(state.cursor_emulated);
    assert_eq!(state.cursor_clip, Rect::new(0, 0, 640, 480));

    engine.on_display_mode_changed();
    assert_eq!(engine.presentation_rect(), Rect::new(240, 0, 1680, 1080));

    engine.destroy_resource(primary)?;
    assert!(!engine.presentation_state().is_fullscreen());
    Ok(())
}

#[test]
fn presentation_scales_into_the_rect_and_blacks_out_the_rest() -> Result<()> {
    init_tracing();
    let mut engine = Engine::new(SoftDevice::new(), Config::default(), desktop());
    let (primary, frame) = setup(&mut engine)?;
    let fills = engine.device().calls().color_fill;

    present(&mut engine, primary, frame)?;

    assert_eq!(engine.stats().presentation_blts, 1);
    assert_eq!(engine.device().calls().color_fill - fills, 2);
    let device = engine.device();
    assert_eq!(device.pixel(primary, 0, 100, 500), Some(0));
    assert_eq!(device.pixel(primary, 0, 1800, 20), Some(0));
    assert_eq!(device.pixel(primary, 0, 240, 0), Some(RED));
    assert_eq!(device.pixel(primary, 0, 1000, 500), Some(RED));
    assert_eq!(device.pixel(primary, 0, 1679, 1079), Some(RED));
    Ok(())
}

#[test]
fn layered_windows_are_composited_over_the_frame() -> Result<()> {
    init_tracing();
    let window = LayeredWindow {
        id: WindowId(1),
        rect: Rect::new(0, 0, 64, 64),
        color_key: None,
        alpha: None,
        region: None,
    };
    let desktop = desktop().with_layered_window(window, 0xff00_ff00);
    let mut engine = Engine::new(SoftDevice::new(), Config::default(), desktop);
    let (primary, frame) = setup(&mut engine)?;

    present(&mut engine, primary, frame)?;

    let device = engine.device();
    assert_eq!(device.pixel(primary, 0, 300, 100), Some(GREEN));
    assert_eq!(device.pixel(primary, 0, 1000, 500), Some(RED));
    Ok(())
}

#[test]
fn layered_window_without_staging_memory_is_skipped() -> Result<()> {
    init_tracing();
    let blue_window = LayeredWindow {
        id: WindowId(1),
        rect: Rect::new(200, 200, 328, 328),
        color_key: None,
        alpha: None,
        region: None,
    };
    let green_window = LayeredWindow {
        id: WindowId(2),
        rect: Rect::new(0, 0, 64, 64),
        ..blue_window.clone()
    };
    let desktop = desktop()
        .with_layered_window(blue_window, 0xff00_00ff)
        .with_layered_window(green_window, 0xff00_ff00);
    let mut engine = Engine::new(SoftDevice::new(), Config::default(), desktop);
    let (primary, frame) = setup(&mut engine)?;

    // The temporary render target and the first window's texture cannot be created.
    engine.device_mut().fail_next(Primitive::CreateResource, 2);
    present(&mut engine, primary, frame)?;

    assert_eq!(engine.stats().presentation_blts, 1);
    let device = engine.device();
    assert_eq!(device.pixel(primary, 0, 300, 100), Some(GREEN));
    assert_eq!(device.pixel(primary, 0, 800, 600), Some(RED));
    Ok(())
}

#[test]
fn emulated_cursor_is_drawn_into_the_frame() -> Result<()> {
    init_tracing();
    let mut desktop = desktop();
    desktop.cursor = Some(CursorInfo {
        cursor: CursorHandle(1),
        position: Point::new(10, 10),
    });
    let mut device = SoftDevice::new();
    device.register_cursor(CursorHandle(1), 2, 2, vec![0xffff_ffff; 4]);
    let mut engine = Engine::new(device, Config::default(), desktop);
    let (primary, frame) = setup(&mut engine)?;

    present(&mut engine, primary, frame)?;

    assert_eq!(engine.device().calls().cursor_blt, 1);
    assert_eq!(engine.device().pixel(primary, 0, 264, 25), Some(0x00ff_ffff));
    assert_eq!(engine.device().pixel(primary, 0, 300, 100), Some(RED));
    Ok(())
}

#[test]
fn emulated_cursor_stays_inside_the_monitor_clip() -> Result<()> {
    init_tracing();
    let mut desktop = desktop();
    desktop.cursor = Some(CursorInfo {
        cursor: CursorHandle(1),
        position: Point::new(700, 10),
    });
    let mut device = SoftDevice::new();
    device.register_cursor(CursorHandle(1), 2, 2, vec![0xffff_ffff; 4]);
    let mut engine = Engine::new(device, Config::default(), desktop);
    let (primary, frame) = setup(&mut engine)?;

    present(&mut engine, primary, frame)?;

    assert_eq!(engine.device().calls().cursor_blt, 1);
    assert_eq!(engine.device().pixel(primary, 0, 1679, 25), Some(0x00ff_ffff));
    Ok(())
}

#[test]
fn cursor_is_left_to_the_system_when_the_frame_fills_the_monitor() -> Result<()> {
    init_tracing();
    let mut desktop = FixedDesktop::new(Rect::new(0, 0, 640, 480), Rect::new(0, 0, 640, 480));
    desktop.cursor = Some(CursorInfo {
        cursor: CursorHandle(1),
        position: Point::new(10, 10),
    });
    let mut device = SoftDevice::new();
    device.register_cursor(CursorHandle(1), 2, 2, vec![0xffff_ffff; 4]);
    let mut engine = Engine::new(device, Config::default(), desktop);
    let (primary, frame) = setup(&mut engine)?;
    assert!(!engine.presentation_state().cursor_emulated);

    present(&mut engine, primary, frame)?;

    assert_eq!(engine.stats().presentation_blts, 1);
    assert_eq!(engine.device().calls().cursor_blt, 0);
    assert_eq!(engine.device().pixel(primary, 0, 10, 10), Some(RED));
    Ok(())
}

#[test]
fn gamma_ramp_and_bilinear_filter_apply_on_the_way_out() -> Result<()> {
    init_tracing();
    let mut desktop = desktop();
    let mut gamma = GammaRamp::identity();
    gamma.red = [0; 256];
    gamma.green = [0xffff; 256];
    desktop.gamma = gamma;
    let config = Config {
        display_filter: DisplayFilter::Bilinear { blur: 0 },
        ..Config::default()
    };
    let mut engine = Engine::new(SoftDevice::new(), config, desktop);
    let (primary, frame) = setup(&mut engine)?;

    present(&mut engine, primary, frame)?;

    let calls = engine.device().calls();
    assert_eq!((calls.bilinear_blt, calls.gamma_blt), (1, 1));
    assert_eq!(engine.device().pixel(primary, 0, 1000, 500), Some(GREEN));
    assert_eq!(engine.device().pixel(primary, 0, 0, 0), Some(0));
    Ok(())
}
