//! Engine position → host screen point mapping.
//!
//! Pure functions only; the correlator supplies the surface bounds it read
//! from the registry.

use twin_core::config::OverlayConfig;
use twin_types::{EnginePosition, Rect, ScreenPoint};

/// Heuristic used when the display surface cannot be located.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fallback {
    /// Added to every fallback anchor (the surface usually sits below a
    /// fixed navbar).
    pub offset: ScreenPoint,
    /// Nominal surface width for normalized input.
    pub viewport_width: f64,
    /// Nominal surface height for normalized input.
    pub viewport_height: f64,
}

impl Fallback {
    /// Fallback from the overlay configuration section.
    pub const fn from_config(config: &OverlayConfig) -> Self {
        Self {
            offset: ScreenPoint::new(config.fallback_offset_x, config.fallback_offset_y),
            viewport_width: config.fallback_viewport_width,
            viewport_height: config.fallback_viewport_height,
        }
    }
}

impl Default for Fallback {
    fn default() -> Self {
        Self::from_config(&OverlayConfig::default())
    }
}

/// Map an engine position to host screen coordinates.
///
/// With usable `bounds`, normalized positions scale by the surface size and
/// pixel positions are offset by its top-left corner. Without them (or with
/// a zero-sized surface) the fallback offset and nominal viewport stand in.
pub fn to_screen(position: EnginePosition, bounds: Option<Rect>, fallback: &Fallback) -> ScreenPoint {
    match bounds.filter(|b| !b.is_degenerate()) {
        Some(rect) => match position {
            EnginePosition::Normalized { x, y } => {
                ScreenPoint::new(rect.left + x * rect.width, rect.top + y * rect.height)
            }
            EnginePosition::Pixels { x, y } => ScreenPoint::new(rect.left + x, rect.top + y),
        },
        None => match position {
            EnginePosition::Normalized { x, y } => {
                fallback.offset.offset(ScreenPoint::new(
                    x * fallback.viewport_width,
                    y * fallback.viewport_height,
                ))
            }
            EnginePosition::Pixels { x, y } => fallback.offset.offset(ScreenPoint::new(x, y)),
        },
    }
}

/// Anchor for a notification that carried no position: the surface's
/// top-left corner, or the fallback offset.
pub fn default_anchor(bounds: Option<Rect>, fallback: &Fallback) -> ScreenPoint {
    bounds
        .filter(|b| !b.is_degenerate())
        .map_or(fallback.offset, |rect| rect.origin())
}
