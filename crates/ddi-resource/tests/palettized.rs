mod common;

use anyhow::Result;
use ddi_resource::device::{Palette, PaletteEntry};
use ddi_resource::{Config, D3dFormat, Engine, HResult, ResourceError, ResourceHandle, SoftDevice};
use pretty_assertions::assert_eq;

use common::*;

const PALETTE: u32 = 7;

fn palette() -> Palette {
    let mut palette = [PaletteEntry::default(); 256];
    palette[1] = PaletteEntry::rgb(0xff, 0, 0);
    palette[2] = PaletteEntry::rgb(0xff, 0, 0);
    palette[3] = PaletteEntry::rgb(0, 0xff, 0);
    palette
}

fn linked_pair(engine: &mut Engine<SoftDevice>) -> Result<(ResourceHandle, ResourceHandle)> {
    let source = engine.create_resource(&texture(D3dFormat::P8, 4, 4))?;
    let rgba = engine.create_resource(&texture(D3dFormat::A8R8G8B8, 4, 4))?;
    engine.set_palette(PALETTE, &palette());
    engine.set_palette_handle(source, PALETTE)?;
    engine.set_palettized_texture(rgba, source)?;

    let device = engine.device_mut();
    device.fill(source, 0, 1)?;
    device.set_pixel(source, 0, 1, 0, 2)?;
    device.set_pixel(source, 0, 2, 0, 3)?;
    Ok((source, rgba))
}

fn enabled() -> Config {
    Config {
        palettized_textures: true,
        ..Config::default()
    }
}

#[test]
fn conversion_runs_only_when_palette_or_key_changes() -> Result<()> {
    let mut engine = engine(SoftDevice::new(), enabled());
    let (_, rgba) = linked_pair(&mut engine)?;

    engine.update_palettized_texture(rgba, Some(1))?;
    assert_eq!(engine.device().calls().palettized_blt, 1);
    let device = engine.device();
    assert_eq!(device.pixel(rgba, 0, 0, 0), Some(0xffff_0000));
    // Index 2 shares the key's colour, so it is nudged off the key.
    assert_eq!(device.pixel(rgba, 0, 1, 0), Some(0xffff_0001));
    assert_eq!(device.pixel(rgba, 0, 2, 0), Some(0xff00_ff00));

    engine.update_palettized_texture(rgba, Some(1))?;
    engine.update_palettized_texture(rgba, None)?;
    assert_eq!(engine.device().calls().palettized_blt, 1);

    engine.update_palettized_texture(rgba, Some(3))?;
    assert_eq!(engine.device().calls().palettized_blt, 2);
    assert_eq!(engine.device().pixel(rgba, 0, 1, 0), Some(0xffff_0000));

    engine.set_palette(PALETTE, &palette());
    engine.update_palettized_texture(rgba, None)?;
    assert_eq!(engine.device().calls().palettized_blt, 3);
    Ok(())
}

#[test]
fn writing_the_source_marks_the_conversion_stale() -> Result<()> {
    let mut engine = engine(SoftDevice::new(), enabled());
    let (source, rgba) = linked_pair(&mut engine)?;
    engine.update_palettized_texture(rgba, None)?;

    write_pixels(&mut engine, source, |_, _| 3)?;
    engine.update_palettized_texture(rgba, None)?;

    assert_eq!(engine.device().calls().palettized_blt, 2);
    assert_eq!(engine.device().pixel(rgba, 0, 3, 3), Some(0xff00_ff00));
    Ok(())
}

#[test]
fn destroying_the_source_unlinks_the_conversion() -> Result<()> {
    let mut engine = engine(SoftDevice::new(), enabled());
    let (source, rgba) = linked_pair(&mut engine)?;

    engine.destroy_resource(source)?;
    engine.update_palettized_texture(rgba, Some(1))?;

    assert_eq!(engine.device().calls().palettized_blt, 0);
    Ok(())
}

#[test]
fn linking_requires_the_feature_and_an_indexed_source() -> Result<()> {
    let mut engine = engine(SoftDevice::new(), Config::default());
    let source = engine.create_resource(&texture(D3dFormat::P8, 4, 4))?;
    let rgba = engine.create_resource(&texture(D3dFormat::A8R8G8B8, 4, 4))?;

    let err = engine.set_palettized_texture(rgba, source).unwrap_err();
    assert_eq!(err, ResourceError::Unsupported("palettized textures are disabled"));
    assert_eq!(err.hresult(), HResult::E_NOTIMPL);

    engine.set_config(enabled())?;
    assert!(matches!(
        engine.set_palettized_texture(source, rgba),
        Err(ResourceError::InvalidCall(_))
    ));
    engine.set_palettized_texture(rgba, source)?;
    Ok(())
}
