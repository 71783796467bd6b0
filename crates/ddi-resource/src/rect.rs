//! Pixel rectangles in left/top/right/bottom form.
//!
//! Unless passed through [`Rect::scaled`], rectangles are expressed in the logical (unscaled)
//! coordinate space of the resource they address.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// `{0, 0, width, height}`.
    pub fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width as i32, size.height as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn size(&self) -> Size {
        Size::new(self.width().max(0) as u32, self.height().max(0) as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let r = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() {
            Rect::default()
        } else {
            r
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.left && p.x < self.right && p.y >= self.top && p.y < self.bottom
    }

    /// Nearest point inside the rectangle. An empty rectangle leaves `p` unchanged.
    pub fn clamp_point(&self, p: Point) -> Point {
        if self.is_empty() {
            return p;
        }
        Point::new(p.x.clamp(self.left, self.right - 1), p.y.clamp(self.top, self.bottom - 1))
    }

    /// Clamps the rectangle to `{0, 0, size}`. The result may be empty.
    pub fn clipped_to(&self, size: Size) -> Self {
        Self::new(
            self.left.max(0),
            self.top.max(0),
            self.right.min(size.width as i32),
            self.bottom.min(size.height as i32),
        )
    }

    /// Non-empty, non-negative and fully inside `{0, 0, size}`.
    pub fn is_valid_within(&self, size: Size) -> bool {
        self.left >= 0
            && self.top >= 0
            && self.left < self.right
            && self.top < self.bottom
            && self.right <= size.width as i32
            && self.bottom <= size.height as i32
    }

    /// Maps logical coordinates of a `logical`-sized resource onto its `physical` size.
    pub fn scaled(&self, logical: Size, physical: Size) -> Self {
        let lw = logical.width.max(1) as i64;
        let lh = logical.height.max(1) as i64;
        let pw = physical.width as i64;
        let ph = physical.height as i64;
        Self::new(
            (self.left as i64 * pw / lw) as i32,
            (self.top as i64 * ph / lh) as i32,
            (self.right as i64 * pw / lw) as i32,
            (self.bottom as i64 * ph / lh) as i32,
        )
    }

    /// Re-expresses a rectangle given relative to `from` in the coordinate frame `to`.
    pub fn transform(&self, from: &Rect, to: &Rect) -> Self {
        let fw = from.width().max(1) as i64;
        let fh = from.height().max(1) as i64;
        let tw = to.width() as i64;
        let th = to.height() as i64;
        let map_x = |x: i32| (to.left as i64 + (x - from.left) as i64 * tw / fw) as i32;
        let map_y = |y: i32| (to.top as i64 + (y - from.top) as i64 * th / fh) as i32;
        Self::new(
            map_x(self.left),
            map_y(self.top),
            map_x(self.right),
            map_y(self.bottom),
        )
    }
}

/// Largest rectangle with the aspect ratio of `src` that fits in `dst`, centered in `dst` and
/// expressed relative to `dst`'s origin.
pub fn calculate_scaled_rect(src: &Rect, dst: &Rect) -> Rect {
    let src_w = src.width() as i64;
    let src_h = src.height() as i64;
    let dst_w = dst.width() as i64;
    let dst_h = dst.height() as i64;
    if src_w <= 0 || src_h <= 0 || dst_w <= 0 || dst_h <= 0 {
        return Rect::default();
    }

    let (mut w, mut h) = (dst_w, dst_h);
    if dst_w * src_h > dst_h * src_w {
        w = dst_h * src_w / src_h;
    } else {
        h = dst_w * src_h / src_w;
    }

    Rect::new(0, 0, w as i32, h as i32).offset(((dst_w - w) / 2) as i32, ((dst_h - h) / 2) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_rect_pillarboxes_4_3_on_16_9() {
        let r = calculate_scaled_rect(&Rect::new(0, 0, 640, 480), &Rect::new(0, 0, 1920, 1080));
        assert_eq!(r, Rect::new(240, 0, 1680, 1080));
    }

    #[test]
    fn scaled_rect_letterboxes_wide_source() {
        let r = calculate_scaled_rect(&Rect::new(0, 0, 1920, 1080), &Rect::new(0, 0, 1024, 768));
        assert_eq!(r, Rect::new(0, 96, 1024, 672));
    }

    #[test]
    fn scaled_maps_logical_to_physical() {
        let r = Rect::new(10, 20, 30, 40).scaled(Size::new(100, 100), Size::new(200, 300));
        assert_eq!(r, Rect::new(20, 60, 60, 120));
    }

    #[test]
    fn validity_and_clipping() {
        let size = Size::new(64, 32);
        assert!(Rect::new(0, 0, 64, 32).is_valid_within(size));
        assert!(!Rect::new(0, 0, 65, 32).is_valid_within(size));
        assert!(!Rect::new(5, 5, 5, 10).is_valid_within(size));
        assert_eq!(
            Rect::new(-4, -4, 100, 8).clipped_to(size),
            Rect::new(0, 0, 64, 8)
        );
    }

    #[test]
    fn points_clamp_to_the_last_pixel() {
        let clip = Rect::new(0, 0, 640, 480);
        assert_eq!(clip.clamp_point(Point::new(700, -3)), Point::new(639, 0));
        assert_eq!(clip.clamp_point(Point::new(10, 10)), Point::new(10, 10));
        assert_eq!(Rect::default().clamp_point(Point::new(-5, 9)), Point::new(-5, 9));
    }

    #[test]
    fn transform_between_frames() {
        let monitor = Rect::new(0, 0, 640, 480);
        let present = Rect::new(240, 0, 1680, 1080);
        let window = Rect::new(320, 240, 640, 480);
        assert_eq!(
            window.transform(&monitor, &present),
            Rect::new(960, 540, 1680, 1080)
        );
    }
}
