//! Key identity, value, and screen-space bounding box.

use std::fmt;

use crate::gaze::ScreenPoint;

/// Stable key identity, assigned by whoever supplies the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyId(pub u32);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a key produces when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValue {
    Char(char),
    Space,
    Reset,
}

impl KeyValue {
    /// Accepts a single character, `"space"` or `"reset"`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "space" | " " => Some(Self::Space),
            "reset" => Some(Self::Reset),
            _ => {
                let mut chars = s.chars();
                let c = chars.next()?;
                if chars.next().is_some() {
                    return None;
                }
                Some(Self::Char(c))
            }
        }
    }

    /// Display label, also used in IPC.
    pub fn label(&self) -> String {
        match self {
            Self::Char(c) => c.to_string(),
            Self::Space => "space".to_string(),
            Self::Reset => "reset".to_string(),
        }
    }
}

/// Axis-aligned key bounds in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyRegion {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl KeyRegion {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }

    fn is_finite(&self) -> bool {
        self.left.is_finite() && self.right.is_finite() && self.top.is_finite() && self.bottom.is_finite()
    }

    /// Regions with zero or negative area can never be dwelt on.
    pub fn has_area(&self) -> bool {
        self.is_finite() && self.right > self.left && self.bottom > self.top
    }

    /// Closed-interval containment.
    pub fn contains(&self, p: ScreenPoint) -> bool {
        self.has_area()
            && p.x >= self.left
            && p.x <= self.right
            && p.y >= self.top
            && p.y <= self.bottom
    }

    /// Closed-interval intersection; regions sharing an edge overlap.
    pub fn overlaps(&self, other: &KeyRegion) -> bool {
        self.has_area()
            && other.has_area()
            && self.left <= other.right
            && other.left <= self.right
            && self.top <= other.bottom
            && other.top <= self.bottom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_parse() {
        assert_eq!(KeyValue::parse("A"), Some(KeyValue::Char('A')));
        assert_eq!(KeyValue::parse("space"), Some(KeyValue::Space));
        assert_eq!(KeyValue::parse(" "), Some(KeyValue::Space));
        assert_eq!(KeyValue::parse("reset"), Some(KeyValue::Reset));
        assert_eq!(KeyValue::parse(""), None);
        assert_eq!(KeyValue::parse("AB"), None);
    }

    #[test]
    fn test_key_value_label() {
        assert_eq!(KeyValue::Char('Q').label(), "Q");
        assert_eq!(KeyValue::Space.label(), "space");
        assert_eq!(KeyValue::Reset.label(), "reset");
    }

    #[test]
    fn test_region_contains() {
        let r = KeyRegion::new(100.0, 100.0, 200.0, 200.0);
        assert!(r.contains(ScreenPoint::new(150.0, 150.0))); // center
        assert!(r.contains(ScreenPoint::new(100.0, 100.0))); // top-left corner
        assert!(r.contains(ScreenPoint::new(200.0, 200.0))); // bottom-right corner
        assert!(!r.contains(ScreenPoint::new(99.9, 150.0)));
        assert!(!r.contains(ScreenPoint::new(150.0, 200.1)));
        assert!(!r.contains(ScreenPoint::new(500.0, 500.0)));
    }

    #[test]
    fn test_zero_area_never_contains() {
        let line = KeyRegion::new(100.0, 100.0, 100.0, 200.0);
        assert!(!line.has_area());
        assert!(!line.contains(ScreenPoint::new(100.0, 150.0)));

        let point = KeyRegion::new(5.0, 5.0, 5.0, 5.0);
        assert!(!point.contains(ScreenPoint::new(5.0, 5.0)));

        let inverted = KeyRegion::new(200.0, 200.0, 100.0, 100.0);
        assert!(!inverted.contains(ScreenPoint::new(150.0, 150.0)));
    }

    #[test]
    fn test_non_finite_region_never_contains() {
        let r = KeyRegion::new(0.0, 0.0, f64::NAN, 100.0);
        assert!(!r.contains(ScreenPoint::new(10.0, 10.0)));
    }

    #[test]
    fn test_overlaps_counts_shared_edge() {
        let a = KeyRegion::new(0.0, 0.0, 100.0, 100.0);
        let b = KeyRegion::new(100.0, 0.0, 200.0, 100.0);
        let c = KeyRegion::new(110.0, 0.0, 200.0, 100.0);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn test_non_overlapping_regions_never_share_a_point() {
        let a = KeyRegion::new(0.0, 0.0, 100.0, 100.0);
        let b = KeyRegion::new(100.5, 0.0, 200.0, 100.0);
        assert!(!a.overlaps(&b));
        for i in 0..=400 {
            let p = ScreenPoint::new(i as f64 * 0.5, 50.0);
            assert!(!(a.contains(p) && b.contains(p)), "both contain {:?}", p);
        }
    }
}
