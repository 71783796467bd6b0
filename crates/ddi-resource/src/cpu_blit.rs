//! Scanline blitter for system-memory transfers.
//!
//! Point-sampled stretch with optional mirroring and source/destination colour keys, plus a
//! rectangle fill. Both work on byte slices addressed by pitch; callers hand in slices that
//! start at the top-left pixel of the rectangle.

use crate::format::{read_pixel, write_pixel};

/// One side of a CPU transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub pitch: usize,
    pub width: usize,
    pub height: usize,
}

impl Span {
    pub fn new(pitch: u32, width: i32, height: i32) -> Self {
        Self {
            pitch: pitch as usize,
            width: width.max(0) as usize,
            height: height.max(0) as usize,
        }
    }

    /// Bytes covered by the span at `bpp` bytes per pixel.
    pub fn byte_len(&self, bpp: usize) -> usize {
        if self.height == 0 {
            return 0;
        }
        self.pitch * (self.height - 1) + self.width * bpp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuBltOptions {
    pub mirror_left_right: bool,
    pub mirror_up_down: bool,
    /// Only destination pixels equal to this raw value are overwritten.
    pub dst_color_key: Option<u32>,
    /// Source pixels equal to this raw value are skipped.
    pub src_color_key: Option<u32>,
}

/// Copies `src` into `dst`, stretching with point sampling when the spans differ in size.
///
/// `src` must not alias `dst`; self-blits copy the source rectangle out first.
pub fn blt(dst: &mut [u8], dst_span: Span, src: &[u8], src_span: Span, bpp: usize, opts: &CpuBltOptions) {
    if bpp == 0 || dst_span.width == 0 || dst_span.height == 0 || src_span.width == 0 || src_span.height == 0 {
        return;
    }
    debug_assert!(dst.len() >= dst_span.byte_len(bpp));
    debug_assert!(src.len() >= src_span.byte_len(bpp));

    let mask = if bpp >= 4 { u32::MAX } else { (1u32 << (bpp * 8)) - 1 };
    let same_size = dst_span.width == src_span.width && dst_span.height == src_span.height;
    let plain = same_size
        && !opts.mirror_left_right
        && opts.dst_color_key.is_none()
        && opts.src_color_key.is_none();

    for y in 0..dst_span.height {
        let mut sy = y * src_span.height / dst_span.height;
        if opts.mirror_up_down {
            sy = src_span.height - 1 - sy;
        }
        let src_row = &src[sy * src_span.pitch..][..src_span.width * bpp];
        let dst_row = &mut dst[y * dst_span.pitch..][..dst_span.width * bpp];

        if plain {
            dst_row.copy_from_slice(src_row);
            continue;
        }

        for x in 0..dst_span.width {
            let mut sx = x * src_span.width / dst_span.width;
            if opts.mirror_left_right {
                sx = src_span.width - 1 - sx;
            }
            let value = read_pixel(&src_row[sx * bpp..], bpp);
            if opts.src_color_key.is_some_and(|key| key & mask == value) {
                continue;
            }
            let dst_px = &mut dst_row[x * bpp..];
            if let Some(key) = opts.dst_color_key {
                if read_pixel(dst_px, bpp) != key & mask {
                    continue;
                }
            }
            write_pixel(dst_px, bpp, value);
        }
    }
}

/// Fills a `span` of `bpp`-byte pixels with the raw `value`.
pub fn color_fill(dst: &mut [u8], span: Span, bpp: usize, value: u32) {
    if bpp == 0 {
        return;
    }
    let mut pixel = [0u8; 4];
    write_pixel(&mut pixel, bpp.min(4), value);
    for y in 0..span.height {
        let row = &mut dst[y * span.pitch..][..span.width * bpp];
        for px in row.chunks_exact_mut(bpp) {
            px.copy_from_slice(&pixel[..bpp]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pixels_u16(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn same_size_copy_honours_pitch() {
        let src = [1u8, 2, 3, 0xee, 4, 5, 6, 0xee];
        let mut dst = [0u8; 6];
        blt(
            &mut dst,
            Span::new(3, 3, 2),
            &src,
            Span::new(4, 3, 2),
            1,
            &CpuBltOptions::default(),
        );
        assert_eq!(dst, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn mirrored_stretch_with_source_key() {
        let src = pixels_u16(&[0x1111, 0xf800, 0x3333]);
        let mut dst = pixels_u16(&[0xaaaa; 6]);
        let opts = CpuBltOptions {
            mirror_left_right: true,
            src_color_key: Some(0xf800),
            ..CpuBltOptions::default()
        };
        blt(&mut dst, Span::new(12, 6, 1), &src, Span::new(6, 3, 1), 2, &opts);
        assert_eq!(
            dst,
            pixels_u16(&[0x3333, 0x3333, 0xaaaa, 0xaaaa, 0x1111, 0x1111])
        );
    }

    #[test]
    fn destination_key_limits_writes() {
        let src = [7u8, 7, 7, 7];
        let mut dst = [0u8, 9, 0, 9];
        let opts = CpuBltOptions {
            dst_color_key: Some(9),
            ..CpuBltOptions::default()
        };
        blt(&mut dst, Span::new(4, 4, 1), &src, Span::new(4, 4, 1), 1, &opts);
        assert_eq!(dst, [0, 7, 0, 7]);
    }

    #[test]
    fn vertical_mirror_flips_rows() {
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        let opts = CpuBltOptions {
            mirror_up_down: true,
            ..CpuBltOptions::default()
        };
        blt(&mut dst, Span::new(2, 2, 2), &src, Span::new(2, 2, 2), 1, &opts);
        assert_eq!(dst, [3, 4, 1, 2]);
    }

    #[test]
    fn fill_writes_only_the_span() {
        let mut dst = [0u8; 12];
        color_fill(&mut dst, Span::new(6, 2, 2), 2, 0x1234);
        assert_eq!(dst, [0x34, 0x12, 0x34, 0x12, 0, 0, 0x34, 0x12, 0x34, 0x12, 0, 0]);
    }
}
