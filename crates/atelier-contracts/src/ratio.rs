use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Output aspect ratio, either a concrete ratio or `Auto`. `Auto` must be
/// resolved before any generation call, by snapping from a source image's
/// pixel dimensions or by a context default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    #[default]
    Auto,
    Square,
    Widescreen,
    Vertical,
    Landscape,
    Portrait,
}

/// Snap candidates in declaration order; ties keep the earliest entry.
const CANDIDATES: [(AspectRatio, f64); 5] = [
    (AspectRatio::Square, 1.0),
    (AspectRatio::Widescreen, 16.0 / 9.0),
    (AspectRatio::Vertical, 9.0 / 16.0),
    (AspectRatio::Landscape, 4.0 / 3.0),
    (AspectRatio::Portrait, 3.0 / 4.0),
];

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Auto => "auto",
            AspectRatio::Square => "1:1",
            AspectRatio::Widescreen => "16:9",
            AspectRatio::Vertical => "9:16",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Portrait => "3:4",
        }
    }

    pub fn is_auto(self) -> bool {
        self == AspectRatio::Auto
    }

    /// Nearest concrete ratio for the given pixel dimensions, by absolute
    /// difference of width/height ratio over the fixed candidate set.
    pub fn from_dimensions(width: u32, height: u32) -> AspectRatio {
        if width == 0 || height == 0 {
            return AspectRatio::Square;
        }
        let actual = width as f64 / height as f64;
        let mut best = AspectRatio::Square;
        let mut best_delta = f64::MAX;
        for (candidate, ratio) in CANDIDATES {
            let delta = (ratio - actual).abs();
            if delta < best_delta {
                best = candidate;
                best_delta = delta;
            }
        }
        best
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "auto" => Ok(AspectRatio::Auto),
            "1:1" => Ok(AspectRatio::Square),
            "16:9" => Ok(AspectRatio::Widescreen),
            "9:16" => Ok(AspectRatio::Vertical),
            "4:3" => Ok(AspectRatio::Landscape),
            "3:4" => Ok(AspectRatio::Portrait),
            _ => Err(format!(
                "unknown aspect ratio '{raw}' (expected auto, 1:1, 16:9, 9:16, 4:3, or 3:4)"
            )),
        }
    }
}
