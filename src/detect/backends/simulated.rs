use rand::Rng;

use crate::detect::result::{BoundingBox, Detection, DetectionBatch};
use crate::detect::vocabulary::Vocabulary;
use crate::error::GatewayResult;

pub const SIMULATION_DEVICE: &str = "simulation";
pub const SIMULATION_MODEL: &str = "Ultralytics YOLOv8n (Simulation)";

/// 1x1 PNG shown in place of a camera frame.
pub const PLACEHOLDER_FRAME: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Generates plausible random detections when no backend is available.
#[derive(Clone, Debug, Default)]
pub struct SimulatedDetector;

impl SimulatedDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(
        &self,
        vocabulary: &Vocabulary,
        threshold: f32,
        with_frame: bool,
    ) -> GatewayResult<DetectionBatch> {
        self.detect_with_rng(&mut rand::thread_rng(), vocabulary, threshold, with_frame)
    }

    /// Same as [`detect`](Self::detect) with a caller-supplied random source.
    pub fn detect_with_rng<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        vocabulary: &Vocabulary,
        threshold: f32,
        with_frame: bool,
    ) -> GatewayResult<DetectionBatch> {
        let count = rng.gen_range(1..=6);
        let mut detections = Vec::with_capacity(count);
        for _ in 0..count {
            let class_index = rng.gen_range(0..vocabulary.len());
            // Truncate to three decimals before filtering so the reported value
            // is the one compared against the threshold.
            let confidence = ((rng.gen_range(0.6f64..1.0) * 1000.0).floor() / 1000.0) as f32;
            let bounding_box = BoundingBox {
                x: rng.gen_range(50..550),
                y: rng.gen_range(50..550),
                width: rng.gen_range(50..250),
                height: rng.gen_range(50..250),
            };
            if confidence < threshold {
                continue;
            }
            detections.push(Detection::new(
                vocabulary,
                class_index,
                confidence,
                bounding_box,
            )?);
        }

        let frame = with_frame.then(|| PLACEHOLDER_FRAME.to_string());
        Ok(DetectionBatch::new(
            detections,
            frame,
            SIMULATION_MODEL,
            SIMULATION_DEVICE,
            threshold,
        ))
    }
}
