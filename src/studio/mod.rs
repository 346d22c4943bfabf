//! Studio control surface.
//!
//! Combines the crop geometry in [`zoom`] with the peer calls in
//! [`controls`] to expose the operations the router consumes.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`controls`] | Zoom, capture and cached lookups over the gateway |
//! | [`zoom`] | Pure crop margin geometry |

mod cache;
pub mod controls;
pub mod zoom;

pub use controls::{SourceResolution, StudioControls, ZoomSummary};
pub use zoom::{CropMargins, crops_for_focus};
