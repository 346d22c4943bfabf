//! High-level studio operations built on the gateway.
//!
//! [`StudioControls`] wraps the raw call interface with the operations
//! the router exposes: focus zoom, output capture and the cached
//! lookups both depend on.
//!
//! # Calls Issued
//!
//! | Operation | Peer calls |
//! |-----------|------------|
//! | `source_resolution` | `GetInputSettings` |
//! | `scene_item_id` | `GetSceneItemId` |
//! | `zoom_to` | `SetSceneItemTransform`, `SetCurrentProgramScene` |
//! | `capture_preview` | `GetCurrentPreviewScene`, `GetCurrentProgramScene`, `GetSourceScreenshot` |
//!
//! Everything goes through [`Gateway::submit`], so a disconnected peer
//! surfaces as [`Error::NotConnected`] instead of queuing.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::studio::cache::LookupCache;
use crate::studio::zoom::{CropMargins, crops_for_focus};

// ============================================================================
// Constants
// ============================================================================

/// Resolution assumed when the peer cannot report one.
const FALLBACK_RESOLUTION: SourceResolution = SourceResolution {
    width: 1920,
    height: 1080,
};

/// Smallest accepted capture dimension.
const MIN_CAPTURE_DIMENSION: u32 = 64;

/// Largest accepted capture dimension.
const MAX_CAPTURE_DIMENSION: u32 = 4096;

// ============================================================================
// Types
// ============================================================================

/// Pixel dimensions of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceResolution {
    /// Source width in pixels.
    pub width: u32,
    /// Source height in pixels.
    pub height: u32,
}

/// What a completed zoom changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoomSummary {
    /// Scene the transform was applied in.
    pub scene: String,
    /// Source the crop targets.
    pub source: String,
    /// Resolution the margins were computed against.
    pub resolution: SourceResolution,
    /// Applied crop margins.
    pub margins: CropMargins,
}

// ============================================================================
// StudioControls - Types
// ============================================================================

/// Studio operations with per-source lookup caching.
///
/// Resolution and scene-item lookups are cached indefinitely; call
/// [`StudioControls::clear_caches`] after rearranging sources or
/// scenes in the studio.
pub struct StudioControls {
    /// Command path to the peer.
    gateway: Gateway,

    /// Source name to resolution.
    resolutions: LookupCache<String, SourceResolution>,

    /// (scene, source) to scene item id.
    scene_items: LookupCache<(String, String), i64>,
}

// ============================================================================
// StudioControls - Public API
// ============================================================================

impl StudioControls {
    /// Creates a control surface over the given gateway.
    #[must_use]
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            resolutions: LookupCache::new(),
            scene_items: LookupCache::new(),
        }
    }

    /// Returns the pixel resolution of a source, cached.
    ///
    /// A source that reports no usable resolution, or a lookup the
    /// peer fails, falls back to 1920x1080; the fallback is cached
    /// like a real answer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when the peer is offline. Peer
    /// failures do not error; they produce the fallback.
    pub async fn source_resolution(&self, source: &str) -> Result<SourceResolution> {
        let key = source.to_string();
        if let Some(resolution) = self.resolutions.get(&key) {
            return Ok(resolution);
        }

        let resolution = self.lookup_resolution(source).await?;
        self.resolutions.insert(key, resolution);
        Ok(resolution)
    }

    /// Returns the scene item id of a source within a scene, cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when the peer is offline and
    /// [`Error::CallFailed`] when the peer rejects the lookup; unlike
    /// resolutions there is no safe fallback for an item id.
    pub async fn scene_item_id(&self, scene: &str, source: &str) -> Result<i64> {
        let key = (scene.to_string(), source.to_string());
        if let Some(item_id) = self.scene_items.get(&key) {
            return Ok(item_id);
        }

        let result = self
            .gateway
            .submit(
                "GetSceneItemId",
                json!({ "sceneName": scene, "sourceName": source }),
            )
            .await?;
        let item_id = result["sceneItemId"].as_i64().ok_or_else(|| {
            Error::call_failed(format!("no scene item id for {source} in {scene}"))
        })?;

        self.scene_items.insert(key, item_id);
        Ok(item_id)
    }

    /// Zooms the program output onto a focus point of a source.
    ///
    /// Resolves the source resolution and scene item id, computes the
    /// crop margins, applies the transform and switches the program
    /// scene. The focus point is given in normalized `[0, 1]`
    /// coordinates relative to the source.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for blank names or non-finite
    ///   numbers
    /// - [`Error::NotConnected`] when the peer is offline
    /// - [`Error::CallFailed`] when the peer rejects a call
    pub async fn zoom_to(
        &self,
        scene: &str,
        source: &str,
        x: f64,
        y: f64,
        zoom: f64,
    ) -> Result<ZoomSummary> {
        if scene.is_empty() || source.is_empty() {
            return Err(Error::invalid_argument("scene and source are required"));
        }
        if !x.is_finite() || !y.is_finite() || !zoom.is_finite() {
            return Err(Error::invalid_argument(
                "x, y and zoom must be finite numbers",
            ));
        }

        let resolution = self.source_resolution(source).await?;
        let item_id = self.scene_item_id(scene, source).await?;
        let margins = crops_for_focus(resolution.width, resolution.height, zoom, x, y);

        self.gateway
            .submit(
                "SetSceneItemTransform",
                json!({
                    "sceneName": scene,
                    "sceneItemId": item_id,
                    "sceneItemTransform": margins,
                }),
            )
            .await?;
        self.gateway
            .submit("SetCurrentProgramScene", json!({ "sceneName": scene }))
            .await?;

        debug!(scene, source, zoom, "Zoom applied");

        Ok(ZoomSummary {
            scene: scene.to_string(),
            source: source.to_string(),
            resolution,
            margins,
        })
    }

    /// Captures the current output as JPEG bytes.
    ///
    /// Prefers the preview scene (studio mode), falling back to the
    /// program scene. Dimensions are clamped into `[64, 4096]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when the peer is offline and
    /// [`Error::CallFailed`] when the capture fails or the payload is
    /// not decodable.
    pub async fn capture_preview(&self, width: u32, height: u32) -> Result<Vec<u8>> {
        let width = width.clamp(MIN_CAPTURE_DIMENSION, MAX_CAPTURE_DIMENSION);
        let height = height.clamp(MIN_CAPTURE_DIMENSION, MAX_CAPTURE_DIMENSION);

        let scene = self.output_scene().await?;
        let result = self
            .gateway
            .submit(
                "GetSourceScreenshot",
                json!({
                    "sourceName": scene,
                    "imageFormat": "jpeg",
                    "imageWidth": width,
                    "imageHeight": height,
                }),
            )
            .await?;

        let image_data = result["imageData"]
            .as_str()
            .ok_or_else(|| Error::call_failed("screenshot response carries no image data"))?;
        decode_image_payload(image_data)
    }

    /// Drops all cached lookups.
    pub fn clear_caches(&self) {
        self.resolutions.clear();
        self.scene_items.clear();
        debug!("Studio lookup caches cleared");
    }
}

// ============================================================================
// StudioControls - Lookup Internals
// ============================================================================

impl StudioControls {
    /// Asks the peer for a source resolution, falling back on failure.
    async fn lookup_resolution(&self, source: &str) -> Result<SourceResolution> {
        let outcome = self
            .gateway
            .submit("GetInputSettings", json!({ "inputName": source }))
            .await;

        match outcome {
            Ok(result) => {
                let settings = &result["inputSettings"];
                if let Some(width) = settings["width"].as_u64().and_then(|w| u32::try_from(w).ok())
                    && let Some(height) =
                        settings["height"].as_u64().and_then(|h| u32::try_from(h).ok())
                    && width > 0
                    && height > 0
                {
                    return Ok(SourceResolution { width, height });
                }
                warn!(source, "Source reports no resolution; assuming 1920x1080");
                Ok(FALLBACK_RESOLUTION)
            }
            Err(Error::NotConnected) => Err(Error::NotConnected),
            Err(e) => {
                warn!(source, error = %e, "Resolution lookup failed; assuming 1920x1080");
                Ok(FALLBACK_RESOLUTION)
            }
        }
    }

    /// Preview scene when studio mode is active, program scene otherwise.
    async fn output_scene(&self) -> Result<String> {
        if let Ok(result) = self
            .gateway
            .submit("GetCurrentPreviewScene", Value::Null)
            .await
            && let Some(name) = result["currentPreviewSceneName"].as_str()
        {
            return Ok(name.to_string());
        }

        let result = self
            .gateway
            .submit("GetCurrentProgramScene", Value::Null)
            .await?;
        result["currentProgramSceneName"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::call_failed("program scene response carries no scene name"))
    }
}

// ============================================================================
// Internal Functions
// ============================================================================

/// Decodes a screenshot payload, tolerating a data-URI wrapper.
fn decode_image_payload(image_data: &str) -> Result<Vec<u8>> {
    let encoded = match image_data.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => image_data,
    };

    Base64Standard
        .decode(encoded)
        .map_err(|e| Error::call_failed(format!("screenshot payload is not valid base64: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
