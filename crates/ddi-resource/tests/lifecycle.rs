mod common;

use anyhow::Result;
use ddi_resource::config::Antialiasing;
use ddi_resource::{
    Config, D3dFormat, HResult, LockArgs, LockFlags, MultisampleConfig, Pool, Primitive, ResourceError, ResourceFlags,
    ResourceHandle, SoftDevice, ValidFlags,
};
use pretty_assertions::assert_eq;

use common::*;

fn antialiased() -> Config {
    Config {
        antialiasing: Antialiasing::On,
        ..Config::default()
    }
}

fn msaa_device() -> SoftDevice {
    SoftDevice::new().with_multisample(MultisampleConfig::new(4, 0))
}

#[test]
fn failed_driver_creation_leaves_nothing_behind() {
    let mut device = SoftDevice::new();
    device.fail_next(Primitive::CreateResource, 1);
    let mut engine = engine(device, Config::default());

    let err = engine
        .create_resource(&plain_surface(D3dFormat::X8R8G8B8, 8, 8))
        .unwrap_err();
    assert_eq!(err, ResourceError::Driver(HResult::E_FAIL));
    assert_eq!(engine.resource_count(), 0);
    assert_eq!(engine.device().live_resources(), 0);
}

#[test]
fn requests_the_engine_refuses() -> Result<()> {
    let mut engine = engine(SoftDevice::new(), Config::default());
    let draw_from_locked = ResourceFlags::VERTEX_BUFFER | ResourceFlags::MIGHT_DRAW_FROM_LOCKED;

    let err = engine
        .create_resource(&args(D3dFormat::X8R8G8B8, Pool::VideoMemory, draw_from_locked, 64, 1))
        .unwrap_err();
    assert_eq!(err.hresult(), HResult::E_FAIL);
    engine.create_resource(&args(D3dFormat::X8R8G8B8, Pool::SystemMemory, draw_from_locked, 64, 1))?;

    let mut no_surfaces = plain_surface(D3dFormat::X8R8G8B8, 1, 1);
    no_surfaces.surfaces.clear();
    assert!(matches!(engine.create_resource(&no_surfaces), Err(ResourceError::InvalidCall(_))));

    let mut multisampled = render_target(D3dFormat::X8R8G8B8, 8, 8);
    multisampled.multisample = MultisampleConfig::new(4, 0);
    let handle = engine.create_resource(&multisampled)?;
    let err = engine
        .lock(&LockArgs::new(handle, 0, LockFlags::empty()))
        .unwrap_err();
    assert_eq!(err.hresult(), HResult::E_FAIL);
    Ok(())
}

#[test]
fn bad_handles_and_sub_resources_are_reported() -> Result<()> {
    let mut engine = engine(SoftDevice::new(), Config::default());
    let surface = engine.create_resource(&plain_surface(D3dFormat::X8R8G8B8, 8, 8))?;

    assert_eq!(
        engine.lock(&LockArgs::new(surface, 3, LockFlags::READ_ONLY)).unwrap_err(),
        ResourceError::InvalidSubResource { index: 3, count: 1 }
    );
    let bogus = ResourceHandle(0xdead);
    assert_eq!(engine.destroy_resource(bogus).unwrap_err(), ResourceError::UnknownResource(bogus));
    assert_eq!(engine.prepare_for_gpu_read(bogus, 0).unwrap_err(), ResourceError::UnknownResource(bogus));
    Ok(())
}

#[test]
fn toggling_antialiasing_flushes_and_rebuilds_aux_surfaces() -> Result<()> {
    let mut engine = engine(msaa_device(), Config::default());
    let rt = engine.create_resource(&render_target(D3dFormat::X8R8G8B8, 8, 8))?;
    assert_eq!(engine.aux_surfaces(rt)?, Default::default());
    assert_eq!(engine.stats().reconfigurations, 0);

    engine.set_config(antialiased())?;
    engine.set_config(antialiased())?;
    assert_eq!(engine.stats().reconfigurations, 1);
    let msaa = engine.aux_surfaces(rt)?.msaa.expect("multisample surface after enabling");

    assert_eq!(engine.prepare_for_gpu_write(rt, 0)?, msaa);
    engine.device_mut().fill(msaa, 0, 0x0012_3456)?;

    engine.set_config(Config::default())?;
    assert_eq!(engine.stats().reconfigurations, 2);
    assert_eq!(engine.aux_surfaces(rt)?, Default::default());
    assert_only_valid(&engine, rt, ValidFlags::VID_MEM);
    assert_eq!(engine.device().pixel(rt, 0, 7, 7), Some(0x0012_3456));
    Ok(())
}

#[test]
fn destroying_flushes_gpu_only_contents_to_the_mirror() -> Result<()> {
    let mut engine = engine(msaa_device(), antialiased());
    let rt = engine.create_resource(&render_target(D3dFormat::X8R8G8B8, 8, 8))?;
    let msaa = engine.prepare_for_gpu_write(rt, 0)?;
    engine.device_mut().fill(msaa, 0, 0x00ab_cdef)?;

    engine.destroy_resource(rt)?;

    assert_eq!(engine.stats().sys_mem_loads, 1);
    assert_eq!(engine.resource_count(), 0);
    Ok(())
}

#[test]
fn shutdown_releases_every_driver_resource() -> Result<()> {
    let mut engine = engine(msaa_device(), antialiased());
    let rt = engine.create_resource(&render_target(D3dFormat::X8R8G8B8, 16, 16))?;
    engine.create_resource(&depth_buffer(D3dFormat::D24S8, 16, 16))?;
    engine.create_resource(&plain_surface(D3dFormat::R5G6B5, 16, 16))?;
    engine.prepare_for_gpu_read(rt, 0)?;
    assert!(engine.device().live_resources() > 3);

    engine.shutdown();

    assert_eq!(engine.resource_count(), 0);
    assert_eq!(engine.device().live_resources(), 0);
    Ok(())
}

#[test]
fn every_sub_resource_keeps_a_valid_copy() -> Result<()> {
    let mut engine = engine(msaa_device(), antialiased());
    let mut chain = render_target(D3dFormat::X8R8G8B8, 16, 16);
    chain.surfaces.push(ddi_resource::SurfaceInfo::new(8, 8));
    let rt = engine.create_resource(&chain)?;
    let depth = engine.create_resource(&depth_buffer(D3dFormat::D24S8, 16, 16))?;
    let plain = engine.create_resource(&plain_surface(D3dFormat::X8R8G8B8, 16, 16))?;
    let handles = [rt, depth, plain];

    for sub in 0..2 {
        engine.prepare_for_gpu_write(rt, sub)?;
        assert_some_copy_valid(&engine, &handles);
        engine.load_sys_mem_resource(rt, sub)?;
        assert_some_copy_valid(&engine, &handles);
    }
    engine.prepare_for_gpu_write(depth, 0)?;
    engine.load_vid_mem_resource(depth, 0)?;
    write_pixels(&mut engine, plain, |x, y| x + y)?;
    engine.prepare_for_gpu_read(plain, 0)?;
    assert_some_copy_valid(&engine, &handles);

    engine.set_config(Config::default())?;
    assert_some_copy_valid(&engine, &handles);
    Ok(())
}

#[test]
fn depth_buffers_start_with_every_tier_valid() -> Result<()> {
    let mut engine = engine(msaa_device(), Config::default());
    let depth = engine.create_resource(&depth_buffer(D3dFormat::D24S8, 64, 64))?;
    assert_only_valid(&engine, depth, ValidFlags::SYS_MEM | ValidFlags::VID_MEM);

    engine.set_config(antialiased())?;
    let antialiased_depth = engine.create_resource(&depth_buffer(D3dFormat::D24S8, 64, 64))?;
    let aux = engine.aux_surfaces(antialiased_depth)?;
    assert!(aux.msaa.is_some() && aux.msaa_resolved.is_some());
    assert_only_valid(&engine, antialiased_depth, ValidFlags::all());
    Ok(())
}

#[test]
fn lock_area_outside_the_sub_resource_is_rejected() -> Result<()> {
    let mut engine = engine(SoftDevice::new(), Config::default());
    let surface = engine.create_resource(&plain_surface(D3dFormat::X8R8G8B8, 64, 64))?;

    for area in [
        ddi_resource::Rect::new(0, 10_000, 4, 10_004),
        ddi_resource::Rect::new(-4, 0, 4, 4),
        ddi_resource::Rect::new(60, 60, 65, 64),
    ] {
        let err = engine
            .lock(&LockArgs::new(surface, 0, LockFlags::empty()).with_area(area))
            .unwrap_err();
        assert!(matches!(err, ResourceError::InvalidCall(_)), "{area:?}");
    }

    let base = engine.lock(&LockArgs::new(surface, 0, LockFlags::READ_ONLY))?;
    let corner = engine.lock(
        &LockArgs::new(surface, 0, LockFlags::READ_ONLY).with_area(ddi_resource::Rect::new(60, 60, 64, 64)),
    )?;
    let (base, corner) = (base.data.unwrap(), corner.data.unwrap());
    assert_eq!(corner.as_ptr() as usize - base.as_ptr() as usize, 60 * 256 + 60 * 4);
    Ok(())
}
