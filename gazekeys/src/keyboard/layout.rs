//! Built-in key layouts.
//!
//! A presentation shell normally supplies its own key regions.  The presets
//! give the daemon something to dwell on before one connects, and are what
//! `replay` runs against.

use serde::{Deserialize, Serialize};

use super::key::{KeyId, KeyRegion, KeyValue};
use crate::gaze::{SurfaceInset, Viewport};

/// Named preset layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutPreset {
    /// Four rows: `A..H`, `I..P`, `Q..X`, `Y Z space`.
    #[default]
    Grid,
    /// `A..Z`, `space`, `reset` on six columns.
    Board,
    /// No keys until a shell supplies them.
    None,
}

impl LayoutPreset {
    /// String representation for IPC and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Board => "board",
            Self::None => "none",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "grid" => Some(Self::Grid),
            "board" => Some(Self::Board),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    /// Key values in row order.
    fn rows(&self) -> Vec<Vec<KeyValue>> {
        let letters = |range: std::ops::RangeInclusive<char>| -> Vec<KeyValue> {
            range.map(KeyValue::Char).collect()
        };
        match self {
            Self::Grid => {
                let mut last = letters('Y'..='Z');
                last.push(KeyValue::Space);
                vec![letters('A'..='H'), letters('I'..='P'), letters('Q'..='X'), last]
            }
            Self::Board => {
                let mut all = letters('A'..='Z');
                all.push(KeyValue::Space);
                all.push(KeyValue::Reset);
                all.chunks(6).map(|c| c.to_vec()).collect()
            }
            Self::None => Vec::new(),
        }
    }
}

/// One key of a generated layout.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedKey {
    pub id: KeyId,
    pub value: KeyValue,
    pub region: KeyRegion,
}

/// Lay a preset out over the viewport minus the inset.
///
/// Every key gets a uniform cell; the key itself is the cell shrunk by a
/// 10% gap, so neighbouring keys never touch.  Ids are assigned in row
/// order starting at 0.
pub fn generate_layout(preset: LayoutPreset, viewport: Viewport, inset: SurfaceInset) -> Vec<PlacedKey> {
    let rows = preset.rows();
    let row_count = rows.len();
    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if row_count == 0 || col_count == 0 {
        return Vec::new();
    }

    let surface_w = (viewport.width - inset.left - inset.right).max(0.0);
    let surface_h = (viewport.height - inset.top - inset.bottom).max(0.0);
    let cell_w = surface_w / col_count as f64;
    let cell_h = surface_h / row_count as f64;
    let gap_w = cell_w * 0.1; // 10% gap between keys
    let gap_h = cell_h * 0.1;

    let mut keys = Vec::new();
    let mut next_id = 0u32;
    for (row_idx, row) in rows.iter().enumerate() {
        let top = inset.top + row_idx as f64 * cell_h + gap_h / 2.0;
        for (col_idx, value) in row.iter().enumerate() {
            let left = inset.left + col_idx as f64 * cell_w + gap_w / 2.0;
            keys.push(PlacedKey {
                id: KeyId(next_id),
                value: *value,
                region: KeyRegion::new(left, top, left + cell_w - gap_w, top + cell_h - gap_h),
            });
            next_id += 1;
        }
    }
    keys
}
