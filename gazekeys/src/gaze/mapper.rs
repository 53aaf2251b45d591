//! Tracker space to screen space.
//!
//! The tracker's vertical origin is at the bottom of the surface, screen
//! space grows downward, so the y axis is flipped.  No clamping: a sample
//! outside the unit square lands outside the surface and simply misses
//! every key.

use serde::{Deserialize, Serialize};

use super::sample::NormalizedPoint;

/// Absolute cursor position in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Viewport size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
        }
    }
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width >= 0.0 && self.height >= 0.0
    }

    /// Finite and strictly positive in both dimensions.
    pub fn has_area(&self) -> bool {
        self.is_valid() && self.width > 0.0 && self.height > 0.0
    }

    /// Parse a "WxH" string, e.g. `1000x800`.
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.split_once('x')?;
        let w = w.trim().parse::<f64>().ok()?;
        let h = h.trim().parse::<f64>().ok()?;
        let viewport = Self::new(w, h);
        viewport.has_area().then_some(viewport)
    }
}

/// Border kept free around the tracked surface (marker strip), in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceInset {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl SurfaceInset {
    pub fn is_valid(&self) -> bool {
        [self.left, self.top, self.right, self.bottom]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }

    /// Whether some surface is left inside `viewport` after the border.
    pub fn fits(&self, viewport: Viewport) -> bool {
        self.left + self.right < viewport.width && self.top + self.bottom < viewport.height
    }
}

/// Maps normalized samples onto the current viewport.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoordinateMapper {
    pub viewport: Viewport,
    pub inset: SurfaceInset,
}

impl CoordinateMapper {
    pub fn new(viewport: Viewport, inset: SurfaceInset) -> Self {
        Self { viewport, inset }
    }

    /// Width and height of the tracked surface after removing the inset.
    fn surface_size(&self) -> (f64, f64) {
        let w = self.viewport.width - self.inset.left - self.inset.right;
        let h = self.viewport.height - self.inset.top - self.inset.bottom;
        (w.max(0.0), h.max(0.0))
    }

    /// `px = left + x * w`, `py = top + h - y * h`.  With a zero inset
    /// this is `(x * W, H - y * H)`.
    pub fn map(&self, p: NormalizedPoint) -> ScreenPoint {
        let (w, h) = self.surface_size();
        ScreenPoint {
            x: self.inset.left + p.x * w,
            y: self.inset.top + (h - p.y * h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(w: f64, h: f64) -> CoordinateMapper {
        CoordinateMapper::new(Viewport::new(w, h), SurfaceInset::default())
    }

    #[test]
    fn test_center_maps_to_center() {
        let p = mapper(1000.0, 800.0).map(NormalizedPoint::new(0.5, 0.5));
        assert_eq!(p, ScreenPoint::new(500.0, 400.0));
    }

    #[test]
    fn test_origin_maps_to_bottom_left() {
        let p = mapper(1000.0, 800.0).map(NormalizedPoint::new(0.0, 0.0));
        assert_eq!(p, ScreenPoint::new(0.0, 800.0));
    }

    #[test]
    fn test_top_right_corner() {
        let p = mapper(1000.0, 800.0).map(NormalizedPoint::new(1.0, 1.0));
        assert_eq!(p, ScreenPoint::new(1000.0, 0.0));
    }

    #[test]
    fn test_unit_square_stays_in_viewport() {
        let m = mapper(1366.0, 768.0);
        for i in 0..=20 {
            for j in 0..=20 {
                let p = m.map(NormalizedPoint::new(i as f64 / 20.0, j as f64 / 20.0));
                assert!((0.0..=1366.0).contains(&p.x), "x out of range: {:?}", p);
                assert!((0.0..=768.0).contains(&p.y), "y out of range: {:?}", p);
            }
        }
    }

    #[test]
    fn test_mapping_is_repeatable() {
        let m = mapper(1000.0, 800.0);
        let n = NormalizedPoint::new(0.123, 0.456);
        assert_eq!(m.map(n), m.map(n));
    }

    #[test]
    fn test_no_clamping_outside_unit_square() {
        let p = mapper(1000.0, 800.0).map(NormalizedPoint::new(1.5, -0.25));
        assert_eq!(p, ScreenPoint::new(1500.0, 1000.0));
    }

    #[test]
    fn test_resize_changes_mapping() {
        let mut m = mapper(1000.0, 800.0);
        let n = NormalizedPoint::new(0.5, 0.5);
        assert_eq!(m.map(n), ScreenPoint::new(500.0, 400.0));
        m.viewport = Viewport::new(2000.0, 1000.0);
        assert_eq!(m.map(n), ScreenPoint::new(1000.0, 500.0));
    }

    #[test]
    fn test_inset_shrinks_surface() {
        let m = CoordinateMapper::new(
            Viewport::new(1000.0, 800.0),
            SurfaceInset {
                left: 100.0,
                top: 50.0,
                right: 100.0,
                bottom: 50.0,
            },
        );
        assert_eq!(m.map(NormalizedPoint::new(0.0, 1.0)), ScreenPoint::new(100.0, 50.0));
        assert_eq!(m.map(NormalizedPoint::new(1.0, 0.0)), ScreenPoint::new(900.0, 750.0));
        assert_eq!(m.map(NormalizedPoint::new(0.5, 0.5)), ScreenPoint::new(500.0, 400.0));
    }

    #[test]
    fn test_parse_viewport() {
        assert_eq!(Viewport::parse("1000x800"), Some(Viewport::new(1000.0, 800.0)));
        assert_eq!(Viewport::parse("0x800"), None);
        assert_eq!(Viewport::parse("1000"), None);
        assert_eq!(Viewport::parse("axb"), None);
    }
}
