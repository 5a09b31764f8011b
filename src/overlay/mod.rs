//! # Frame Overlays
//!
//! Semi-transparent text boxes composited onto video frames.

pub mod compositor;
mod font;

pub use compositor::{compose, Overlay, OverlayBox, Rect};
pub use font::FontFace;
