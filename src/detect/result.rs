use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::detect::vocabulary::Vocabulary;
use crate::error::{GatewayError, GatewayResult};

/// Which backend serves detection requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorMode {
    #[default]
    Unloaded,
    Real,
    Simulated,
}

/// Axis-aligned box in source-frame pixels. Serialized as `[x, y, width, height]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "[u32; 4]")]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Builds a box from raw backend coordinates.
    ///
    /// Negative origins are clamped to zero. Returns `None` when the box has no area.
    pub fn from_raw(x: i64, y: i64, width: i64, height: i64) -> Option<Self> {
        if width <= 0 || height <= 0 {
            return None;
        }
        let clamp = |v: i64| v.clamp(0, u32::MAX as i64) as u32;
        Some(Self {
            x: clamp(x),
            y: clamp(y),
            width: clamp(width),
            height: clamp(height),
        })
    }

    pub fn center(&self) -> [u32; 2] {
        [
            self.x.saturating_add(self.width / 2),
            self.y.saturating_add(self.height / 2),
        ]
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// One recognized object instance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "bbox")]
    pub bounding_box: BoundingBox,
    #[serde(rename = "classId")]
    pub class_index: usize,
    pub center: [u32; 2],
}

impl Detection {
    /// Builds a detection whose label is taken from the vocabulary.
    pub fn new(
        vocabulary: &Vocabulary,
        class_index: usize,
        confidence: f32,
        bounding_box: BoundingBox,
    ) -> GatewayResult<Self> {
        let label = vocabulary.label(class_index).ok_or_else(|| {
            GatewayError::MalformedResponse(format!(
                "class index {} outside vocabulary of {} classes",
                class_index,
                vocabulary.len()
            ))
        })?;
        Ok(Self {
            label: label.to_string(),
            confidence,
            bounding_box,
            class_index,
            center: bounding_box.center(),
        })
    }
}

/// Detection entry as printed by a backend process.
#[derive(Debug, Deserialize)]
pub struct BackendDetection {
    #[serde(rename = "classId")]
    pub class_id: i64,
    pub confidence: f64,
    pub bbox: [i64; 4],
}

/// Converts raw backend detections, enforcing the batch invariants.
///
/// Entries below `threshold` or without area are dropped; an unknown class index
/// makes the whole response malformed.
pub fn detections_from_backend(
    raw: Vec<BackendDetection>,
    vocabulary: &Vocabulary,
    threshold: f32,
) -> GatewayResult<Vec<Detection>> {
    let mut out = Vec::with_capacity(raw.len());
    for entry in raw {
        if !(0.0..=1.0).contains(&entry.confidence) {
            return Err(GatewayError::MalformedResponse(format!(
                "confidence {} outside [0, 1]",
                entry.confidence
            )));
        }
        let class_index = usize::try_from(entry.class_id).map_err(|_| {
            GatewayError::MalformedResponse(format!("negative class index {}", entry.class_id))
        })?;
        let confidence = entry.confidence as f32;
        if confidence < threshold {
            continue;
        }
        let [x, y, w, h] = entry.bbox;
        let Some(bounding_box) = BoundingBox::from_raw(x, y, w, h) else {
            log::debug!("dropping degenerate backend box {:?}", entry.bbox);
            continue;
        };
        out.push(Detection::new(
            vocabulary,
            class_index,
            confidence,
            bounding_box,
        )?);
    }
    Ok(out)
}

/// Result of one detection call. Built once, never mutated afterwards.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionBatch {
    pub detections: Vec<Detection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
    #[serde(rename = "model")]
    pub model_name: String,
    pub device: String,
    pub confidence_threshold: f32,
    pub timestamp: f64,
    pub num_detections: usize,
}

impl DetectionBatch {
    pub fn new(
        detections: Vec<Detection>,
        frame: Option<String>,
        model_name: impl Into<String>,
        device: impl Into<String>,
        confidence_threshold: f32,
    ) -> Self {
        let num_detections = detections.len();
        Self {
            detections,
            frame,
            model_name: model_name.into(),
            device: device.into(),
            confidence_threshold,
            timestamp: epoch_seconds(),
            num_detections,
        }
    }
}

/// Read model of the detector state.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub loaded: bool,
    pub mode: DetectorMode,
    pub backend: String,
    pub model_path: String,
    pub version: String,
    pub input_size: [u32; 2],
    pub classes: Vec<String>,
    pub num_classes: usize,
    pub fallback: bool,
    pub backend_available: bool,
    pub camera_active: bool,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
}

/// Camera capability report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default)]
    pub simulated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of a camera start/stop call.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStatus {
    pub success: bool,
    pub message: String,
    pub camera_active: bool,
}

pub(crate) fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
