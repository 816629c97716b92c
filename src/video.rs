//! Video memory: the indexed-color canvas the graphics builtins draw into.
//!
//! The interpreter thread writes pixels; a presentation thread (if any) reads
//! the RGB frame produced by [`VideoMemory::update`]. Both go through the
//! mutex in [`Video`].

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

pub const WIDTH: usize = 320;
pub const HEIGHT: usize = 200;

/// The C64 palette, RGB.
pub const PALETTE: [[u8; 3]; 16] = [
    [0x00, 0x00, 0x00],
    [0xff, 0xff, 0xff],
    [0x88, 0x20, 0x00],
    [0x68, 0xd0, 0xa8],
    [0xa8, 0x38, 0xa0],
    [0x50, 0xb8, 0x18],
    [0x18, 0x10, 0x90],
    [0xf0, 0xe8, 0x58],
    [0xa0, 0x48, 0x00],
    [0x47, 0x2b, 0x1b],
    [0xc8, 0x78, 0x70],
    [0x48, 0x48, 0x48],
    [0x80, 0x80, 0x80],
    [0x98, 0xff, 0x98],
    [0x50, 0x90, 0xd0],
    [0xb8, 0xb8, 0xb8],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMode {
    /// 320x200, one color per pixel.
    Hires,
    /// 160x200, each logical pixel is two physical pixels wide.
    MultiColor,
    /// Character mode; the canvas only shows the background.
    Text,
}

impl VideoMode {
    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            0 => Some(VideoMode::Hires),
            1 => Some(VideoMode::MultiColor),
            2 => Some(VideoMode::Text),
            _ => None,
        }
    }

    fn pixel_width(self) -> usize {
        match self {
            VideoMode::MultiColor => 2,
            _ => 1,
        }
    }
}

pub struct VideoMemory {
    mode: VideoMode,
    background: u8,
    /// Palette indices, row-major.
    pixels: Vec<u8>,
    /// RGB24 copy of `pixels` as of the last `update`.
    frame: Vec<u8>,
    frames: u64,
}

impl Default for VideoMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoMemory {
    pub fn new() -> Self {
        Self {
            mode: VideoMode::Hires,
            background: 0,
            pixels: vec![0; WIDTH * HEIGHT],
            frame: vec![0; WIDTH * HEIGHT * 3],
            frames: 0,
        }
    }

    pub fn mode(&self) -> VideoMode {
        self.mode
    }

    /// Logical canvas size in the current mode.
    pub fn size(&self) -> (i64, i64) {
        ((WIDTH / self.mode.pixel_width()) as i64, HEIGHT as i64)
    }

    pub fn set_mode(&mut self, mode: VideoMode) {
        self.mode = mode;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.pixels.fill(self.background);
    }

    /// Palette index at logical `(x, y)`, `None` off-canvas.
    pub fn pixel(&self, x: i64, y: i64) -> Option<u8> {
        let (w, h) = self.size();
        if x < 0 || y < 0 || x >= w || y >= h {
            return None;
        }
        let px = x as usize * self.mode.pixel_width();
        Some(self.pixels[y as usize * WIDTH + px])
    }

    /// Off-canvas coordinates are ignored.
    pub fn set_pixel(&mut self, x: i64, y: i64, color: u8) {
        let (w, h) = self.size();
        if x < 0 || y < 0 || x >= w || y >= h {
            return;
        }
        let pw = self.mode.pixel_width();
        let start = y as usize * WIDTH + x as usize * pw;
        self.pixels[start..start + pw].fill(color & 0x0f);
    }

    pub fn draw_line(&mut self, x1: i64, y1: i64, x2: i64, y2: i64, color: u8) {
        let Some((x1, y1, x2, y2)) = self.clip_line(x1, y1, x2, y2) else {
            return;
        };
        // Bresenham, all octants. Endpoints are on the canvas here.
        let dx = (x2 - x1).abs();
        let dy = -(y2 - y1).abs();
        let sx = if x1 < x2 { 1 } else { -1 };
        let sy = if y1 < y2 { 1 } else { -1 };
        let (mut x, mut y) = (x1, y1);
        let mut err = dx + dy;
        loop {
            self.set_pixel(x, y, color);
            if x == x2 && y == y2 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Cohen-Sutherland clip of a segment to the canvas. Endpoints already
    /// on the canvas are kept exactly; `None` if nothing is visible.
    fn clip_line(&self, x1: i64, y1: i64, x2: i64, y2: i64) -> Option<(i64, i64, i64, i64)> {
        const LEFT: u8 = 1;
        const RIGHT: u8 = 2;
        const BOTTOM: u8 = 4;
        const TOP: u8 = 8;

        let (w, h) = self.size();
        let inside = |x: i64, y: i64| (0..w).contains(&x) && (0..h).contains(&y);
        if inside(x1, y1) && inside(x2, y2) {
            return Some((x1, y1, x2, y2));
        }
        let (xmax, ymax) = ((w - 1) as f64, (h - 1) as f64);
        let code = |x: f64, y: f64| {
            let mut c = 0;
            if x < 0.0 {
                c |= LEFT;
            } else if x > xmax {
                c |= RIGHT;
            }
            if y < 0.0 {
                c |= BOTTOM;
            } else if y > ymax {
                c |= TOP;
            }
            c
        };
        let mut a = (x1 as f64, y1 as f64);
        let mut b = (x2 as f64, y2 as f64);
        // Each pass moves one endpoint onto an edge; rounding may need a
        // few more, the clamp below catches whatever is left.
        for _ in 0..8 {
            let (ca, cb) = (code(a.0, a.1), code(b.0, b.1));
            if (ca | cb) == 0 {
                break;
            }
            if (ca & cb) != 0 {
                return None;
            }
            let out = if ca != 0 { ca } else { cb };
            let (dx, dy) = (b.0 - a.0, b.1 - a.1);
            let p = if out & TOP != 0 {
                (a.0 + dx * (ymax - a.1) / dy, ymax)
            } else if out & BOTTOM != 0 {
                (a.0 + dx * (0.0 - a.1) / dy, 0.0)
            } else if out & RIGHT != 0 {
                (xmax, a.1 + dy * (xmax - a.0) / dx)
            } else {
                (0.0, a.1 + dy * (0.0 - a.0) / dx)
            };
            if ca != 0 {
                a = p;
            } else {
                b = p;
            }
        }
        let snap = |(x, y): (f64, f64)| {
            ((x.round() as i64).clamp(0, w - 1), (y.round() as i64).clamp(0, h - 1))
        };
        let (ax, ay) = snap(a);
        let (bx, by) = snap(b);
        Some((ax, ay, bx, by))
    }

    /// Half-width of a circle of radius `r` at vertical offset `d`.
    fn chord(r: i128, d: i128) -> Option<i128> {
        if d.abs() > r {
            return None;
        }
        Some(((r * r - d * d) as f64).sqrt().round() as i128)
    }

    fn plot(&mut self, x: i128, y: i128, color: u8) {
        let (w, h) = self.size();
        if (0..w as i128).contains(&x) && (0..h as i128).contains(&y) {
            self.set_pixel(x as i64, y as i64, color);
        }
    }

    /// Scans the canvas rows and columns, so the work is bounded by the
    /// canvas size whatever the radius.
    pub fn draw_circle(&mut self, cx: i64, cy: i64, r: i64, color: u8) {
        if r < 0 {
            return;
        }
        let (w, h) = self.size();
        let (cx, cy, r) = (cx as i128, cy as i128, r as i128);
        for y in 0..h as i128 {
            if let Some(half) = Self::chord(r, y - cy) {
                self.plot(cx - half, y, color);
                self.plot(cx + half, y, color);
            }
        }
        for x in 0..w as i128 {
            if let Some(half) = Self::chord(r, x - cx) {
                self.plot(x, cy - half, color);
                self.plot(x, cy + half, color);
            }
        }
    }

    pub fn fill_circle(&mut self, cx: i64, cy: i64, r: i64, color: u8) {
        if r < 0 {
            return;
        }
        let (w, h) = self.size();
        let (cx, cy, r) = (cx as i128, cy as i128, r as i128);
        for y in 0..h as i128 {
            let Some(half) = Self::chord(r, y - cy) else {
                continue;
            };
            let from = (cx - half).max(0);
            let to = (cx + half).min(w as i128 - 1);
            for x in from..=to {
                self.set_pixel(x as i64, y as i64, color);
            }
        }
    }

    /// Convert the indexed canvas into the RGB frame.
    pub fn update(&mut self) {
        let visible = self.mode != VideoMode::Text;
        for (i, &c) in self.pixels.iter().enumerate() {
            let index = if visible { c } else { self.background };
            self.frame[i * 3..i * 3 + 3].copy_from_slice(&PALETTE[(index & 0x0f) as usize]);
        }
        self.frames += 1;
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Number of `update` calls so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Write the RGB frame as a binary PPM image.
    pub fn write_ppm(&self, mut out: impl Write) -> io::Result<()> {
        write!(out, "P6\n{} {}\n255\n", WIDTH, HEIGHT)?;
        out.write_all(&self.frame)?;
        out.flush()
    }
}

/// Shared handle to the video memory.
#[derive(Clone, Default)]
pub struct Video(Arc<Mutex<VideoMemory>>);

impl Video {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, VideoMemory> {
        self.0.lock()
    }

    /// Read the last rendered frame under the lock.
    pub fn with_frame<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.0.lock().frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixels_outside_the_canvas_are_clipped() {
        let mut mem = VideoMemory::new();
        mem.set_pixel(-1, 0, 1);
        mem.set_pixel(320, 0, 1);
        mem.set_pixel(0, 200, 1);
        assert!(mem.pixels.iter().all(|&c| c == 0));
        mem.set_pixel(319, 199, 0x12);
        assert_eq!(mem.pixel(319, 199), Some(2));
    }

    #[test]
    fn multicolor_pixels_are_double_width() {
        let mut mem = VideoMemory::new();
        mem.set_mode(VideoMode::MultiColor);
        assert_eq!(mem.size(), (160, 200));
        mem.set_pixel(10, 5, 7);
        assert_eq!(mem.pixels[5 * WIDTH + 20], 7);
        assert_eq!(mem.pixels[5 * WIDTH + 21], 7);
        mem.set_pixel(160, 5, 7);
        assert_eq!(mem.pixels[5 * WIDTH + 319], 0);
    }

    #[test]
    fn line_endpoints_are_drawn() {
        let mut mem = VideoMemory::new();
        mem.draw_line(0, 0, 10, 4, 3);
        assert_eq!(mem.pixel(0, 0), Some(3));
        assert_eq!(mem.pixel(10, 4), Some(3));
        mem.draw_line(5, 9, 5, 1, 4);
        for y in 1..=9 {
            assert_eq!(mem.pixel(5, y), Some(4));
        }
    }

    #[test]
    fn circles_touch_their_radius() {
        let mut mem = VideoMemory::new();
        mem.draw_circle(50, 50, 10, 5);
        for (x, y) in [(60, 50), (40, 50), (50, 60), (50, 40)] {
            assert_eq!(mem.pixel(x, y), Some(5));
        }
        assert_eq!(mem.pixel(50, 50), Some(0));
        mem.fill_circle(50, 50, 10, 6);
        assert_eq!(mem.pixel(50, 50), Some(6));
        assert_eq!(mem.pixel(60, 50), Some(6));
        assert_eq!(mem.pixel(61, 50), Some(0));
    }

    #[test]
    fn lines_with_huge_endpoints_are_clipped() {
        let mut mem = VideoMemory::new();
        mem.draw_line(i64::MIN, 0, i64::MAX, 0, 1);
        assert!((0..320).all(|x| mem.pixel(x, 0) == Some(1)));
        assert_eq!(mem.pixel(0, 1), Some(0));

        mem.draw_line(0, 5, 10_000_000_000, 5, 2);
        assert!((0..320).all(|x| mem.pixel(x, 5) == Some(2)));

        mem.draw_line(7, i64::MAX, 7, i64::MIN, 3);
        assert!((0..200).all(|y| mem.pixel(7, y) == Some(3)));
    }

    #[test]
    fn lines_off_the_canvas_draw_nothing() {
        let mut mem = VideoMemory::new();
        mem.draw_line(-50, -10, 400, -1, 1);
        mem.draw_line(i64::MIN, i64::MIN, i64::MIN + 5, i64::MAX, 1);
        assert!(mem.pixels.iter().all(|&c| c == 0));
    }

    #[test]
    fn clipped_line_keeps_its_visible_endpoint() {
        let mut mem = VideoMemory::new();
        mem.draw_line(10, 10, -1_000_000, 10, 4);
        assert_eq!(mem.pixel(10, 10), Some(4));
        assert_eq!(mem.pixel(0, 10), Some(4));
        assert_eq!(mem.pixel(11, 10), Some(0));
    }

    #[test]
    fn huge_circles_stay_bounded() {
        let mut mem = VideoMemory::new();
        mem.fill_circle(160, 100, i64::MAX, 1);
        assert!(mem.pixels.iter().all(|&c| c == 1));

        mem.clear();
        mem.draw_circle(i64::MIN, i64::MAX, i64::MAX, 2);
        mem.fill_circle(-10_000, -10_000, 5, 2);
        assert!(mem.pixels.iter().all(|&c| c == 0));

        // Edge runs along x = 0 when the center sits r to the left.
        mem.draw_circle(-1_000_000_000, 100, 1_000_000_000, 3);
        assert_eq!(mem.pixel(0, 100), Some(3));
    }

    #[test]
    fn update_renders_palette_colors() {
        let mut mem = VideoMemory::new();
        mem.set_pixel(0, 0, 1);
        mem.update();
        assert_eq!(&mem.frame()[0..3], &PALETTE[1]);
        assert_eq!(&mem.frame()[3..6], &PALETTE[0]);
        assert_eq!(mem.frame_count(), 1);

        mem.set_mode(VideoMode::Text);
        mem.update();
        assert!(mem.frame().chunks(3).all(|px| px == PALETTE[0]));
    }

    #[test]
    fn ppm_has_header_and_frame() {
        let mut mem = VideoMemory::new();
        mem.update();
        let mut out = Vec::new();
        mem.write_ppm(&mut out).unwrap();
        let header = b"P6\n320 200\n255\n";
        assert_eq!(&out[..header.len()], header);
        assert_eq!(out.len(), header.len() + WIDTH * HEIGHT * 3);
    }
}
