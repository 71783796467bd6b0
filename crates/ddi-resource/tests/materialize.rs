mod common;

use anyhow::Result;
use ddi_resource::config::{Antialiasing, ResolutionScaleFilter};
use ddi_resource::{Config, D3dFormat, MultisampleConfig, Rect, Representation, SoftDevice, ValidFlags};
use pretty_assertions::assert_eq;

use common::*;

fn pattern(x: u32, y: u32) -> u32 {
    (x * 0x0101_01 + y * 0x1_0000) & 0x00ff_ffff
}

#[test]
fn sys_mem_round_trip_through_video_memory_preserves_bytes() -> Result<()> {
    let mut engine = engine(SoftDevice::new(), Config::default());
    let handle = engine.create_resource(&plain_surface(D3dFormat::X8R8G8B8, 32, 16))?;

    write_pixels(&mut engine, handle, pattern)?;
    assert_only_valid(&engine, handle, ValidFlags::SYS_MEM);

    engine.load_vid_mem_resource(handle, 0)?;
    assert_only_valid(&engine, handle, ValidFlags::SYS_MEM | ValidFlags::VID_MEM);
    assert_eq!(engine.device().pixel(handle, 0, 5, 7), Some(pattern(5, 7)));

    // Video memory becomes the only current copy; scribble over the now-stale mirror.
    assert_eq!(engine.prepare_for_gpu_write(handle, 0)?, handle);
    assert_only_valid(&engine, handle, ValidFlags::VID_MEM);
    let mirror = engine.lock_ptr(handle, 0)?.expect("plain surfaces have a mirror");
    // SAFETY: the mirror spans 16 rows of 128 bytes and nothing else references it here.
    unsafe { mirror.as_mut_slice(16 * 128) }.fill(0xcc);

    engine.load_sys_mem_resource(handle, 0)?;
    let expected: Vec<u32> = (0..16).flat_map(|y| (0..32).map(move |x| pattern(x, y))).collect();
    assert_eq!(read_pixels(&mut engine, handle)?, expected);
    Ok(())
}

#[test]
fn loading_video_memory_twice_copies_once() -> Result<()> {
    let mut engine = engine(SoftDevice::new(), Config::default());
    let handle = engine.create_resource(&plain_surface(D3dFormat::R5G6B5, 16, 16))?;
    write_pixels(&mut engine, handle, |x, y| x ^ y)?;

    let before = engine.device().calls();
    engine.load_vid_mem_resource(handle, 0)?;
    engine.load_vid_mem_resource(handle, 0)?;
    let after = engine.device().calls();

    assert_eq!(after.blt - before.blt, 1);
    assert_eq!(after.notify_lock - before.notify_lock, 1);
    assert_eq!(engine.stats().vid_mem_loads, 1);
    Ok(())
}

#[test]
fn multisampled_render_target_walks_every_tier() -> Result<()> {
    let device = SoftDevice::new().with_multisample(MultisampleConfig::new(4, 0));
    let config = Config {
        antialiasing: Antialiasing::On,
        ..Config::default()
    };
    let mut engine = engine(device, config);
    let rt = engine.create_resource(&render_target(D3dFormat::X8R8G8B8, 8, 8))?;
    let aux = engine.aux_surfaces(rt)?;
    let msaa = aux.msaa.expect("antialiasing leases a multisample surface");
    let resolved = aux.msaa_resolved.expect("and a resolved surface");
    assert!(aux.lock_ref.is_some());
    assert_some_copy_valid(&engine, &[rt]);

    assert_eq!(engine.prepare_for_gpu_write(rt, 0)?, msaa);
    assert_only_valid(&engine, rt, ValidFlags::MSAA);
    engine.device_mut().fill(msaa, 0, 0x00ff_0000)?;

    assert_eq!(read_pixels(&mut engine, rt)?, vec![0x00ff_0000; 64]);
    assert_only_valid(
        &engine,
        rt,
        ValidFlags::MSAA | ValidFlags::MSAA_RESOLVED | ValidFlags::VID_MEM | ValidFlags::SYS_MEM,
    );

    // A CPU write while the resolved copy is current defers reconciliation to the next GPU read.
    write_pixels(&mut engine, rt, |x, y| if (x, y) == (3, 4) { 0x0000_00ff } else { 0x00ff_0000 })?;
    assert_only_valid(&engine, rt, ValidFlags::SYS_MEM);

    assert_eq!(engine.prepare_for_gpu_read(rt, 0)?, resolved);
    assert_eq!(engine.stats().lock_ref_reconciliations, 1);
    assert_eq!(engine.device().pixel(resolved, 0, 3, 4), Some(0x0000_00ff));
    assert_eq!(engine.device().pixel(resolved, 0, 4, 4), Some(0x00ff_0000));
    assert!(engine.is_valid(rt, 0, Representation::MsaaResolved)?);
    assert_some_copy_valid(&engine, &[rt]);
    Ok(())
}

#[test]
fn unsupported_depth_resolve_warns_once_and_stays_stale() -> Result<()> {
    let mut device = SoftDevice::new().with_multisample(MultisampleConfig::new(4, 0));
    device.adapter_mut().msaa_depth_resolve_supported = false;
    let config = Config {
        antialiasing: Antialiasing::On,
        ..Config::default()
    };
    let mut engine = engine(device, config);
    let depth = engine.create_resource(&depth_buffer(D3dFormat::D24S8, 16, 16))?;
    let aux = engine.aux_surfaces(depth)?;
    assert!(aux.msaa.is_some());
    assert!(aux.null.is_none());

    engine.prepare_for_gpu_write(depth, 0)?;
    assert_only_valid(&engine, depth, ValidFlags::MSAA);

    for _ in 0..3 {
        engine.load_msaa_resolved_resource(depth, 0)?;
    }
    assert!(!engine.is_valid(depth, 0, Representation::MsaaResolved)?);
    assert_eq!(engine.device().calls().resolve_msaa_depth, 0);

    let r = Rect::new(0, 0, 16, 16);
    engine.blt(&ddi_resource::BltArgs::copy(depth, 0, r, depth, 0, r))?;
    assert_eq!(engine.stats().unsupported_depth_resolves, 1);
    assert_only_valid(&engine, depth, ValidFlags::MSAA);
    Ok(())
}

#[test]
fn supported_depth_resolve_uses_the_hardware_path() -> Result<()> {
    let device = SoftDevice::new().with_multisample(MultisampleConfig::new(4, 0));
    let config = Config {
        antialiasing: Antialiasing::On,
        ..Config::default()
    };
    let mut engine = engine(device, config);
    let depth = engine.create_resource(&depth_buffer(D3dFormat::D24S8, 16, 16))?;
    let aux = engine.aux_surfaces(depth)?;
    let resolved = aux.msaa_resolved.unwrap();
    assert!(aux.null.is_some());
    assert_eq!(engine.device().resource_args(resolved).unwrap().format, D3dFormat::Intz);

    let msaa = engine.prepare_for_gpu_write(depth, 0)?;
    engine.device_mut().fill(msaa, 0, 0x0080_0000)?;
    engine.load_msaa_resolved_resource(depth, 0)?;

    assert_eq!(engine.device().calls().resolve_msaa_depth, 1);
    assert_eq!(engine.device().pixel(resolved, 0, 15, 15), Some(0x0080_0000));
    assert_eq!(engine.stats().unsupported_depth_resolves, 0);
    Ok(())
}

#[test]
fn scaled_render_target_resolves_through_the_downscale_chain() -> Result<()> {
    let device = SoftDevice::new().with_resolution_scale(4);
    let config = Config {
        resolution_scale_filter: ResolutionScaleFilter::Bilinear,
        ..Config::default()
    };
    let mut engine = engine(device, config);
    let rt = engine.create_resource(&render_target(D3dFormat::X8R8G8B8, 32, 32))?;
    let resolved = engine.aux_surfaces(rt)?.msaa_resolved.expect("scaled targets resolve");
    assert_eq!(engine.device().surface_size(resolved, 0)?, ddi_resource::Size::new(128, 128));

    assert_eq!(engine.prepare_for_gpu_write(rt, 0)?, resolved);
    engine.device_mut().fill(resolved, 0, 0xff00_ff00)?;

    assert_eq!(read_pixels(&mut engine, rt)?, vec![0x0000_ff00; 32 * 32]);
    assert_eq!(engine.stats().downscale_steps, 1);
    Ok(())
}
