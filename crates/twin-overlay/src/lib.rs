//! Hover tooltip and detail overlay for engine pointer notifications.
//!
//! - [`coords`] -- Engine position → screen point mapping with a fallback
//!   for a surface that cannot be located.
//! - [`hover`] -- Tooltip state.
//! - [`panel`] -- Draggable detail overlay state.
//! - [`correlator`] -- [`OverlayCorrelator`], the state machine tying them
//!   together.
//!
//! [`OverlayCorrelator`]: correlator::OverlayCorrelator

pub mod coords;
pub mod correlator;
pub mod hover;
pub mod panel;

pub use coords::{Fallback, to_screen};
pub use correlator::{OverlayCorrelator, OverlayView};
pub use hover::HoverState;
pub use panel::{DetailState, OverlayState};
