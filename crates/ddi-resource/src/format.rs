//! Pixel format table and per-pixel conversion helpers.

/// Surface formats understood by the engine.
///
/// `Intz` and `Null` are the vendor FOURCC formats used for hardware depth resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum D3dFormat {
    #[default]
    Unknown,
    R8G8B8,
    A8R8G8B8,
    X8R8G8B8,
    R5G6B5,
    X1R5G5B5,
    A1R5G5B5,
    A4R4G4B4,
    X4R4G4B4,
    A8B8G8R8,
    X8B8G8R8,
    P8,
    L8,
    D16,
    D24S8,
    D24X8,
    D32,
    Dxt1,
    Intz,
    Null,
}

impl D3dFormat {
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            D3dFormat::D16 | D3dFormat::D24S8 | D3dFormat::D24X8 | D3dFormat::D32 | D3dFormat::Intz
        )
    }
}

/// Bit position and width of one colour channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Channel {
    pub bits: u8,
    pub pos: u8,
}

impl Channel {
    const fn new(bits: u8, pos: u8) -> Self {
        Self { bits, pos }
    }

    fn max(self) -> u32 {
        (1u32 << self.bits) - 1
    }

    fn extract(self, raw: u32) -> u32 {
        if self.bits == 0 {
            return 0;
        }
        let v = (raw >> self.pos) & self.max();
        // Expand to 8 bits with rounding so that full-scale maps to 0xff.
        (v * 255 + self.max() / 2) / self.max()
    }

    fn insert(self, c8: u32) -> u32 {
        if self.bits == 0 {
            return 0;
        }
        ((c8 * self.max() + 127) / 255) << self.pos
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatInfo {
    pub format: D3dFormat,
    /// Zero for block-compressed and FOURCC placeholder formats.
    pub bytes_per_pixel: u8,
    pub alpha: Channel,
    pub red: Channel,
    pub green: Channel,
    pub blue: Channel,
}

pub fn format_info(format: D3dFormat) -> FormatInfo {
    let rgb = |bpp, a: (u8, u8), r: (u8, u8), g: (u8, u8), b: (u8, u8)| FormatInfo {
        format,
        bytes_per_pixel: bpp,
        alpha: Channel::new(a.0, a.1),
        red: Channel::new(r.0, r.1),
        green: Channel::new(g.0, g.1),
        blue: Channel::new(b.0, b.1),
    };
    let raw = |bpp| FormatInfo {
        format,
        bytes_per_pixel: bpp,
        ..FormatInfo::default()
    };

    match format {
        D3dFormat::R8G8B8 => rgb(3, (0, 0), (8, 16), (8, 8), (8, 0)),
        D3dFormat::A8R8G8B8 => rgb(4, (8, 24), (8, 16), (8, 8), (8, 0)),
        D3dFormat::X8R8G8B8 => rgb(4, (0, 0), (8, 16), (8, 8), (8, 0)),
        D3dFormat::R5G6B5 => rgb(2, (0, 0), (5, 11), (6, 5), (5, 0)),
        D3dFormat::X1R5G5B5 => rgb(2, (0, 0), (5, 10), (5, 5), (5, 0)),
        D3dFormat::A1R5G5B5 => rgb(2, (1, 15), (5, 10), (5, 5), (5, 0)),
        D3dFormat::A4R4G4B4 => rgb(2, (4, 12), (4, 8), (4, 4), (4, 0)),
        D3dFormat::X4R4G4B4 => rgb(2, (0, 0), (4, 8), (4, 4), (4, 0)),
        D3dFormat::A8B8G8R8 => rgb(4, (8, 24), (8, 0), (8, 8), (8, 16)),
        D3dFormat::X8B8G8R8 => rgb(4, (0, 0), (8, 0), (8, 8), (8, 16)),
        // Palette index travels in the red channel.
        D3dFormat::P8 => rgb(1, (0, 0), (8, 0), (0, 0), (0, 0)),
        D3dFormat::L8 => raw(1),
        D3dFormat::D16 => raw(2),
        D3dFormat::D24S8 | D3dFormat::D24X8 | D3dFormat::D32 | D3dFormat::Intz => raw(4),
        D3dFormat::Unknown | D3dFormat::Dxt1 | D3dFormat::Null => raw(0),
    }
}

impl FormatInfo {
    pub fn has_color_channels(&self) -> bool {
        self.red.bits != 0 || self.green.bits != 0 || self.blue.bits != 0
    }

    /// Decodes a raw pixel value to `0xAARRGGBB`. Formats without alpha decode as opaque;
    /// formats without colour channels (depth, luminance) pass through unchanged.
    pub fn decode_argb(&self, raw: u32) -> u32 {
        if !self.has_color_channels() {
            return raw;
        }
        if self.format == D3dFormat::P8 {
            return 0xff00_0000 | ((raw & 0xff) << 16);
        }
        let a = if self.alpha.bits == 0 {
            0xff
        } else {
            self.alpha.extract(raw)
        };
        (a << 24)
            | (self.red.extract(raw) << 16)
            | (self.green.extract(raw) << 8)
            | self.blue.extract(raw)
    }

    /// Encodes `0xAARRGGBB` into the raw pixel representation of this format.
    pub fn encode_argb(&self, argb: u32) -> u32 {
        if !self.has_color_channels() {
            return argb & self.raw_mask();
        }
        if self.format == D3dFormat::P8 {
            return (argb >> 16) & 0xff;
        }
        self.alpha.insert(argb >> 24)
            | self.red.insert((argb >> 16) & 0xff)
            | self.green.insert((argb >> 8) & 0xff)
            | self.blue.insert(argb & 0xff)
    }

    pub fn raw_mask(&self) -> u32 {
        match self.bytes_per_pixel {
            0 => 0,
            4..=u8::MAX => u32::MAX,
            n => (1u32 << (u32::from(n) * 8)) - 1,
        }
    }
}

/// Converts a 32-bit `0xAARRGGBB` fill colour to the raw value of `info`'s format.
pub fn convert_from_32bit(info: &FormatInfo, color: u32) -> u32 {
    info.encode_argb(color)
}

/// Converts a colour key given in the source surface's raw format to the RGB value the
/// shader blitter compares against (alpha ignored).
pub fn color_key_to_rgb(info: &FormatInfo, color_key: u32) -> u32 {
    info.decode_argb(color_key & info.raw_mask()) & 0x00ff_ffff
}

/// Reads a little-endian pixel of `bpp` bytes.
pub fn read_pixel(bytes: &[u8], bpp: usize) -> u32 {
    let mut v = 0u32;
    for (i, b) in bytes[..bpp].iter().enumerate() {
        v |= u32::from(*b) << (8 * i);
    }
    v
}

/// Writes a little-endian pixel of `bpp` bytes.
pub fn write_pixel(bytes: &mut [u8], bpp: usize, value: u32) {
    for (i, b) in bytes[..bpp].iter_mut().enumerate() {
        *b = (value >> (8 * i)) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r5g6b5_full_scale_channels_expand_to_ff() {
        let info = format_info(D3dFormat::R5G6B5);
        assert_eq!(info.decode_argb(0xf800), 0xffff_0000);
        assert_eq!(info.decode_argb(0x07e0), 0xff00_ff00);
        assert_eq!(info.decode_argb(0x001f), 0xff00_00ff);
        assert_eq!(info.encode_argb(0xffff_0000), 0xf800);
    }

    #[test]
    fn x8r8g8b8_round_trips_rgb() {
        let info = format_info(D3dFormat::X8R8G8B8);
        assert_eq!(info.decode_argb(0x0012_3456), 0xff12_3456);
        assert_eq!(info.encode_argb(0x8012_3456), 0x0012_3456);
    }

    #[test]
    fn a8b8g8r8_swaps_red_and_blue() {
        let info = format_info(D3dFormat::A8B8G8R8);
        assert_eq!(info.decode_argb(0x8033_2211), 0x8011_2233);
        assert_eq!(info.encode_argb(0x8011_2233), 0x8033_2211);
    }

    #[test]
    fn p8_index_travels_in_red_channel() {
        let info = format_info(D3dFormat::P8);
        assert_eq!(info.decode_argb(0x7f), 0xff7f_0000);
        assert_eq!(convert_from_32bit(&info, 0x007f_0000), 0x7f);
    }

    #[test]
    fn depth_formats_pass_through() {
        let info = format_info(D3dFormat::D16);
        assert_eq!(info.bytes_per_pixel, 2);
        assert_eq!(info.decode_argb(0x1234), 0x1234);
        assert_eq!(info.encode_argb(0xabcd_1234), 0x1234);
        assert!(D3dFormat::D24S8.is_depth());
    }

    #[test]
    fn pixel_io_is_little_endian() {
        let mut buf = [0u8; 4];
        write_pixel(&mut buf, 3, 0x00ab_cdef);
        assert_eq!(buf, [0xef, 0xcd, 0xab, 0x00]);
        assert_eq!(read_pixel(&buf, 3), 0x00ab_cdef);
    }

    #[test]
    fn color_key_ignores_alpha() {
        let info = format_info(D3dFormat::A1R5G5B5);
        assert_eq!(color_key_to_rgb(&info, 0xfc00), 0x00ff_0000);
        assert_eq!(color_key_to_rgb(&info, 0x7c00), 0x00ff_0000);
    }
}
