use image::{ImageBuffer, Rgba, RgbaImage};

use crate::{config::OverlayConfig, types::LandmarkSet};

pub const CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

/// 2D target the overlay draws into, sized to match the video frame.
pub trait OverlaySurface {
    fn dimensions(&self) -> (u32, u32);
    fn resize(&mut self, width: u32, height: u32);
    /// Makes every pixel fully transparent.
    fn clear(&mut self);
    fn put_pixel(&mut self, x: u32, y: u32, color: [u8; 4]);
}

impl OverlaySurface for RgbaImage {
    fn dimensions(&self) -> (u32, u32) {
        ImageBuffer::dimensions(self)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if ImageBuffer::dimensions(self) != (width, height) {
            *self = RgbaImage::new(width, height);
        }
    }

    fn clear(&mut self) {
        for px in self.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }
    }

    fn put_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        ImageBuffer::put_pixel(self, x, y, Rgba(color));
    }
}

/// Draws the hand skeleton. Holds no per-frame state.
#[derive(Clone, Debug)]
pub struct OverlayRenderer {
    enabled: bool,
    style: OverlayConfig,
}

impl OverlayRenderer {
    pub fn new(style: OverlayConfig) -> Self {
        Self {
            enabled: style.enabled,
            style,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Resizes and clears `surface`, then draws `landmarks` when enabled.
    ///
    /// Returns whether anything was drawn.
    pub fn render(
        &self,
        surface: &mut dyn OverlaySurface,
        frame_size: (u32, u32),
        landmarks: Option<&LandmarkSet>,
    ) -> bool {
        surface.resize(frame_size.0, frame_size.1);
        surface.clear();

        let Some(set) = landmarks.filter(|_| self.enabled) else {
            return false;
        };
        if set.is_empty() {
            return false;
        }

        let points = set.to_pixels(frame_size.0, frame_size.1);
        self.draw_skeleton(surface, &points);
        true
    }

    fn draw_skeleton(&self, surface: &mut dyn OverlaySurface, points: &[(f32, f32)]) {
        let thickness = self.style.line_thickness.max(1);
        for &(a, b) in CONNECTIONS {
            if let (Some(pa), Some(pb)) = (points.get(a), points.get(b)) {
                draw_line(surface, pa, pb, self.style.line_color, thickness);
            }
        }

        let point_radius = (thickness / 2).max(2) + 1;
        for &(x, y) in points {
            draw_circle(
                surface,
                (x as i32, y as i32),
                point_radius,
                self.style.point_color,
            );
        }
    }
}

fn draw_line(
    surface: &mut dyn OverlaySurface,
    p0: &(f32, f32),
    p1: &(f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        put_pixel_safe(surface, x0, y0, color);
        if radius > 0 {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if (ox != 0 || oy != 0) && ox.abs() + oy.abs() <= radius {
                        put_pixel_safe(surface, x0 + ox, y0 + oy, color);
                    }
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(surface: &mut dyn OverlaySurface, center: (i32, i32), radius: i32, color: [u8; 4]) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(surface, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(surface: &mut dyn OverlaySurface, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (width, height) = surface.dimensions();
    let (ux, uy) = (x as u32, y as u32);
    if ux < width && uy < height {
        surface.put_pixel(ux, uy, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::landmarks::fixtures;

    fn painted(surface: &RgbaImage) -> usize {
        surface.pixels().filter(|px| px.0[3] != 0).count()
    }

    #[test]
    fn surface_matches_frame_size() {
        let renderer = OverlayRenderer::new(OverlayConfig::default());
        let mut surface = RgbaImage::new(1, 1);
        renderer.render(&mut surface, (64, 48), None);
        assert_eq!(OverlaySurface::dimensions(&surface), (64, 48));
        assert_eq!(painted(&surface), 0);
    }

    #[test]
    fn skeleton_is_drawn_when_enabled() {
        let renderer = OverlayRenderer::new(OverlayConfig::default());
        let mut surface = RgbaImage::new(0, 0);
        let hand = fixtures::hand(1.0, 0);
        assert!(renderer.render(&mut surface, (128, 128), Some(&hand)));
        assert!(painted(&surface) > 0);
    }

    #[test]
    fn disabled_overlay_clears_previous_drawing() {
        let mut renderer = OverlayRenderer::new(OverlayConfig::default());
        let mut surface = RgbaImage::new(0, 0);
        let hand = fixtures::hand(1.0, 0);
        renderer.render(&mut surface, (128, 128), Some(&hand));

        renderer.set_enabled(false);
        assert!(!renderer.render(&mut surface, (128, 128), Some(&hand)));
        assert_eq!(painted(&surface), 0);
    }

    #[test]
    fn out_of_bounds_points_are_clipped() {
        let renderer = OverlayRenderer::new(OverlayConfig::default());
        let mut surface = RgbaImage::new(0, 0);
        let mut hand = fixtures::hand(1.0, 0);
        for p in &mut hand.points {
            p.x += 3.0;
        }
        renderer.render(&mut surface, (32, 32), Some(&hand));
        assert_eq!(painted(&surface), 0);
    }
}
