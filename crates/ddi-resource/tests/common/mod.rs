#![allow(dead_code)]

use ddi_resource::device::surface_span;
use ddi_resource::format::{format_info, read_pixel, write_pixel};
use ddi_resource::{
    Config, CreateResourceArgs, D3dFormat, Engine, FixedDesktop, LockArgs, LockFlags, Pool, Rect, ResourceFlags,
    ResourceHandle, SoftDevice, SurfaceInfo, UnlockArgs, ValidFlags,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

pub fn engine(device: SoftDevice, config: Config) -> Engine<SoftDevice> {
    init_tracing();
    Engine::new(device, config, FixedDesktop::default())
}

pub fn args(format: D3dFormat, pool: Pool, flags: ResourceFlags, width: u32, height: u32) -> CreateResourceArgs {
    CreateResourceArgs {
        format,
        pool,
        flags,
        surfaces: vec![SurfaceInfo::new(width, height)],
        ..Default::default()
    }
}

/// Video-memory offscreen plain surface; gets a system-memory lock mirror.
pub fn plain_surface(format: D3dFormat, width: u32, height: u32) -> CreateResourceArgs {
    args(format, Pool::VideoMemory, ResourceFlags::empty(), width, height)
}

pub fn render_target(format: D3dFormat, width: u32, height: u32) -> CreateResourceArgs {
    args(format, Pool::VideoMemory, ResourceFlags::RENDER_TARGET, width, height)
}

pub fn texture(format: D3dFormat, width: u32, height: u32) -> CreateResourceArgs {
    args(format, Pool::VideoMemory, ResourceFlags::TEXTURE, width, height)
}

pub fn depth_buffer(format: D3dFormat, width: u32, height: u32) -> CreateResourceArgs {
    args(format, Pool::VideoMemory, ResourceFlags::ZBUFFER, width, height)
}

/// Writes `pixel(x, y)` over the whole sub-resource through a write lock.
pub fn write_pixels(
    engine: &mut Engine<SoftDevice>,
    handle: ResourceHandle,
    mut pixel: impl FnMut(u32, u32) -> u32,
) -> anyhow::Result<()> {
    let size = engine.resource_size(handle, 0)?;
    let bpp = usize::from(format_info(engine.resource_info(handle).unwrap().format()).bytes_per_pixel);
    let locked = engine.lock(&LockArgs::new(handle, 0, LockFlags::empty()))?;
    let ptr = locked.data.expect("write lock returns a pointer");
    let len = surface_span(locked.pitch, size.width as usize * bpp, size.height);
    // SAFETY: the lock maps the whole sub-resource until the unlock below.
    let bytes = unsafe { ptr.as_mut_slice(len) };
    for y in 0..size.height {
        for x in 0..size.width {
            let offset = y as usize * locked.pitch as usize + x as usize * bpp;
            write_pixel(&mut bytes[offset..], bpp, pixel(x, y));
        }
    }
    engine.unlock(&UnlockArgs::new(handle, 0))?;
    Ok(())
}

/// Reads `area` through a read-only lock, row-major.
pub fn read_area(engine: &mut Engine<SoftDevice>, handle: ResourceHandle, area: Rect) -> anyhow::Result<Vec<u32>> {
    let bpp = usize::from(format_info(engine.resource_info(handle).unwrap().format()).bytes_per_pixel);
    let locked = engine.lock(&LockArgs::new(handle, 0, LockFlags::READ_ONLY).with_area(area))?;
    let ptr = locked.data.expect("read lock returns a pointer");
    let len = surface_span(locked.pitch, area.width() as usize * bpp, area.height() as u32);
    // SAFETY: the lock maps `area` until the unlock below.
    let bytes = unsafe { ptr.as_slice(len) };
    let mut pixels = Vec::with_capacity((area.width() * area.height()) as usize);
    for y in 0..area.height() as usize {
        for x in 0..area.width() as usize {
            pixels.push(read_pixel(&bytes[y * locked.pitch as usize + x * bpp..], bpp));
        }
    }
    engine.unlock(&UnlockArgs::new(handle, 0))?;
    Ok(pixels)
}

pub fn read_pixels(engine: &mut Engine<SoftDevice>, handle: ResourceHandle) -> anyhow::Result<Vec<u32>> {
    let size = engine.resource_size(handle, 0)?;
    read_area(engine, handle, Rect::from_size(size))
}

/// At least one representation of every sub-resource is valid.
pub fn assert_some_copy_valid(engine: &Engine<SoftDevice>, handles: &[ResourceHandle]) {
    for &handle in handles {
        let count = engine.resource_info(handle).unwrap().surface_count();
        for sub in 0..count {
            let valid = engine.valid_flags(handle, sub).unwrap();
            assert!(!valid.is_empty(), "{handle:?}/{sub} has no valid representation");
        }
    }
}

pub fn assert_only_valid(engine: &Engine<SoftDevice>, handle: ResourceHandle, expected: ValidFlags) {
    assert_eq!(engine.valid_flags(handle, 0).unwrap(), expected, "{handle:?}");
}
