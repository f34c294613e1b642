//! Screen-space geometry shared by the registry (container bounds) and the
//! overlay correlator (tooltip / panel anchors).

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A point in host screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ScreenPoint {
    /// Horizontal pixel coordinate, growing to the right.
    pub x: f64,
    /// Vertical pixel coordinate, growing downwards.
    pub y: f64,
}

impl ScreenPoint {
    /// Construct a point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// This point moved by `delta`.
    pub const fn offset(self, delta: Self) -> Self {
        Self::new(self.x + delta.x, self.y + delta.y)
    }

    /// Vector from `origin` to this point.
    pub const fn relative_to(self, origin: Self) -> Self {
        Self::new(self.x - origin.x, self.y - origin.y)
    }
}

/// A bounding rectangle in host screen pixels (same shape as a DOM rect).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Rect {
    /// Left edge.
    pub left: f64,
    /// Top edge.
    pub top: f64,
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels.
    pub height: f64,
}

impl Rect {
    /// Construct a rectangle.
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Top-left corner.
    pub const fn origin(&self) -> ScreenPoint {
        ScreenPoint::new(self.left, self.top)
    }

    /// A rectangle with a non-positive or non-finite extent cannot anchor
    /// anything (the container is collapsed or not laid out yet).
    pub const fn is_degenerate(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
            || !self.left.is_finite()
            || !self.top.is_finite()
    }

    /// Width and height rounded to whole device pixels, as engines expect
    /// for their backing buffer. Negative or non-finite extents map to 0.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn pixel_size(&self) -> (u32, u32) {
        let clamp = |v: f64| {
            if v.is_finite() && v > 0.0 {
                v.round().min(f64::from(u32::MAX)) as u32
            } else {
                0
            }
        };
        (clamp(self.width), clamp(self.height))
    }
}

/// A position reported by the engine for a pointer notification.
///
/// Engines report either viewport-normalized coordinates (both axes in
/// `[0, 1]`) or absolute pixels relative to the display surface's top-left
/// corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "space", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum EnginePosition {
    /// Fractions of the surface's width and height.
    Normalized {
        /// Horizontal fraction.
        x: f64,
        /// Vertical fraction.
        y: f64,
    },
    /// Pixels relative to the surface's top-left corner.
    Pixels {
        /// Horizontal pixels.
        x: f64,
        /// Vertical pixels.
        y: f64,
    },
}

impl EnginePosition {
    /// Classify a raw pair: both axes inside `[0, 1]` means normalized,
    /// anything else is taken as pixels.
    pub fn classify(x: f64, y: f64) -> Self {
        if (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y) {
            Self::Normalized { x, y }
        } else {
            Self::Pixels { x, y }
        }
    }
}
