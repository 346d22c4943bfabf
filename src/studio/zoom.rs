//! Crop geometry for the focus zoom effect.
//!
//! Zooming in the studio is expressed as cropping: a window of the
//! source, centered on a focus point, fills the output once the edges
//! around it are cropped away. The math lives here as a pure function
//! so it can be tested without a peer.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

// ============================================================================
// CropMargins
// ============================================================================

/// Pixels to crop off each edge of a source.
///
/// Serializes with the wire field names the peer expects inside a
/// `sceneItemTransform` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropMargins {
    /// Pixels cropped from the left edge.
    #[serde(rename = "cropLeft")]
    pub left: u32,

    /// Pixels cropped from the right edge.
    #[serde(rename = "cropRight")]
    pub right: u32,

    /// Pixels cropped from the top edge.
    #[serde(rename = "cropTop")]
    pub top: u32,

    /// Pixels cropped from the bottom edge.
    #[serde(rename = "cropBottom")]
    pub bottom: u32,
}

// ============================================================================
// Public Functions
// ============================================================================

/// Computes crop margins that zoom onto a focus point.
///
/// The visible window is `round(width / zoom)` by `round(height / zoom)`
/// pixels, centered on the focus point given in normalized `[0, 1]`
/// coordinates. A window that would stick out past an edge is shifted
/// back inside, never shrunk, so the zoom level holds at the borders.
///
/// The function is total: `zoom` is clamped to at least 1 and the
/// focus coordinates to `[0, 1]`, and the returned margins always fit
/// inside the source.
///
/// # Example
///
/// ```
/// use studio_bridge::studio::crops_for_focus;
///
/// // 2x zoom onto the top-left corner of a 1920x1080 source
/// let margins = crops_for_focus(1920, 1080, 2.0, 0.0, 0.0);
/// assert_eq!(margins.left, 0);
/// assert_eq!(margins.top, 0);
/// assert_eq!(margins.right, 960);
/// assert_eq!(margins.bottom, 540);
/// ```
#[must_use]
pub fn crops_for_focus(width: u32, height: u32, zoom: f64, x: f64, y: f64) -> CropMargins {
    let zoom = zoom.max(1.0);
    let x = clamp_unit(x);
    let y = clamp_unit(y);

    let cam_w = i64::from(width);
    let cam_h = i64::from(height);
    let win_w = (f64::from(width) / zoom).round() as i64;
    let win_h = (f64::from(height) / zoom).round() as i64;

    let cx = (x * f64::from(width)).round() as i64;
    let cy = (y * f64::from(height)).round() as i64;

    let left = (cx - half(win_w)).clamp(0, cam_w - win_w);
    let top = (cy - half(win_h)).clamp(0, cam_h - win_h);

    CropMargins {
        left: left as u32,
        right: (cam_w - (left + win_w)) as u32,
        top: top as u32,
        bottom: (cam_h - (top + win_h)) as u32,
    }
}

// ============================================================================
// Internal Functions
// ============================================================================

/// Rounded half of a non-negative pixel count.
#[inline]
fn half(value: i64) -> i64 {
    (value as f64 / 2.0).round() as i64
}

/// Clamps a focus coordinate into `[0, 1]`, mapping NaN to 0.
#[inline]
fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
