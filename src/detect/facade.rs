//! Detector facade: the single entry point for detection and camera calls.
//!
//! The facade owns the detector state (mode, vocabulary, camera flag) and
//! decides per call whether the process adapter or the simulator serves it.
//! `load()` resolves the mode through an explicit probe and never fails: any
//! probe error leaves the detector in simulation mode.
//!
//! State transitions:
//! - `Unloaded -> Real | Simulated` on `load()`. Loading again re-probes.
//! - Camera `off <-> on` via `start_camera` / `stop_camera`. Stopping while off
//!   is a successful no-op.
//!
//! Concurrent camera start/stop calls are not serialized against each other;
//! the last completed call determines the flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::detect::backend::{BackendAction, BackendCapability, BackendDescriptor, BackendRequest};
use crate::detect::backends::simulated::{SIMULATION_DEVICE, SIMULATION_MODEL};
use crate::detect::backends::{CancelToken, ProcessAdapter, SimulatedDetector};
use crate::detect::preprocess::{prepare_image, strip_data_url};
use crate::detect::result::{
    detections_from_backend, BackendDetection, CameraInfo, CameraStatus, DetectionBatch,
    DetectorMode, ModelInfo,
};
use crate::detect::vocabulary::Vocabulary;
use crate::error::{GatewayError, GatewayResult};

/// Tunables for the facade and its process adapter.
#[derive(Clone, Debug)]
pub struct DetectorSettings {
    /// Passed to backend processes as `YOLO_MODEL_PATH`.
    pub model_path: String,
    /// Bound on every backend invocation.
    pub timeout: Duration,
    /// Bound on the load-time runtime check.
    pub probe_timeout: Duration,
    /// Skip probing and always simulate.
    pub force_simulation: bool,
    /// Square input size images are resized to before real detection; `None` disables resizing.
    pub input_size: Option<u32>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model_path: "./models/yolov8n.pt".to_string(),
            timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(20),
            force_simulation: false,
            input_size: Some(640),
        }
    }
}

/// What a successful probe learned about the backend.
#[derive(Clone, Debug)]
pub struct ProbeReport {
    pub vocabulary: Vocabulary,
    pub device: String,
    pub model_name: String,
}

#[derive(Debug)]
struct DetectorState {
    mode: DetectorMode,
    vocabulary: Arc<Vocabulary>,
    device: String,
    model_name: String,
    backend_available: bool,
    last_load_error: Option<String>,
}

impl DetectorState {
    fn unloaded() -> Self {
        Self {
            mode: DetectorMode::Unloaded,
            vocabulary: Arc::new(Vocabulary::coco()),
            device: "none".to_string(),
            model_name: "Not loaded".to_string(),
            backend_available: false,
            last_load_error: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(default)]
    success: bool,
    error: Option<String>,
    model: Option<String>,
    device: Option<String>,
    #[serde(default)]
    classes: Vec<String>,
    model_loaded: Option<bool>,
    ultralytics_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<BackendDetection>,
    frame: Option<String>,
    model: Option<String>,
    device: Option<String>,
}

pub struct Detector {
    descriptor: BackendDescriptor,
    settings: DetectorSettings,
    adapter: ProcessAdapter,
    simulator: SimulatedDetector,
    cancel: CancelToken,
    state: RwLock<DetectorState>,
    camera_active: AtomicBool,
}

impl Detector {
    pub fn new(descriptor: BackendDescriptor, settings: DetectorSettings, cancel: CancelToken) -> Self {
        let adapter = ProcessAdapter::new(
            &descriptor,
            settings.model_path.clone(),
            settings.timeout,
            cancel.clone(),
        );
        Self {
            descriptor,
            settings,
            adapter,
            simulator: SimulatedDetector::new(),
            cancel,
            state: RwLock::new(DetectorState::unloaded()),
            camera_active: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Probe the backend and settle on a mode. Never fails.
    ///
    /// A camera left running by a Real-mode backend is stopped before
    /// re-probing. The camera flag is cleared whether or not that stop succeeds.
    pub fn load(&self) -> DetectorMode {
        if self.camera_active() && self.mode() == DetectorMode::Real {
            if let Err(err) = self.stop_camera() {
                log::warn!("could not stop camera before reloading backend: {}", err);
            }
        }
        log::info!("loading detection backend '{}'", self.descriptor.name);
        let outcome = if self.settings.force_simulation {
            Err(GatewayError::BackendUnavailable(
                "simulation forced by configuration".to_string(),
            ))
        } else {
            self.probe()
        };

        let next = match outcome {
            Ok(report) => {
                log::info!(
                    "detection backend '{}' ready: model={} device={} classes={}",
                    self.descriptor.name,
                    report.model_name,
                    report.device,
                    report.vocabulary.len()
                );
                DetectorState {
                    mode: DetectorMode::Real,
                    vocabulary: Arc::new(report.vocabulary),
                    device: report.device,
                    model_name: report.model_name,
                    backend_available: true,
                    last_load_error: None,
                }
            }
            Err(err) => {
                log::warn!(
                    "detection backend '{}' unavailable, falling back to simulation: {}",
                    self.descriptor.name,
                    err
                );
                DetectorState {
                    mode: DetectorMode::Simulated,
                    vocabulary: Arc::new(Vocabulary::coco()),
                    device: SIMULATION_DEVICE.to_string(),
                    model_name: SIMULATION_MODEL.to_string(),
                    backend_available: false,
                    last_load_error: Some(err.to_string()),
                }
            }
        };

        let mode = next.mode;
        *self.write_state() = next;
        self.camera_active.store(false, Ordering::SeqCst);
        mode
    }

    /// Check that the backend script, its runtime and its model are usable.
    pub fn probe(&self) -> GatewayResult<ProbeReport> {
        let script = self.adapter.script();
        if !script.exists() {
            return Err(GatewayError::BackendUnavailable(format!(
                "backend script {} not found",
                script.display()
            )));
        }

        self.adapter
            .run_check(&self.descriptor.probe_args, self.settings.probe_timeout)
            .map_err(|e| GatewayError::BackendUnavailable(format!("runtime check failed: {}", e)))?;

        let response = self
            .adapter
            .invoke(&BackendRequest::new(BackendAction::Info))
            .map_err(|e| GatewayError::BackendUnavailable(format!("info request failed: {}", e)))?;
        let info: InfoResponse = serde_json::from_value(response).map_err(|e| {
            GatewayError::BackendUnavailable(format!("malformed info response: {}", e))
        })?;

        if !info.success {
            return Err(GatewayError::BackendUnavailable(
                info.error
                    .unwrap_or_else(|| "backend reported failure".to_string()),
            ));
        }
        if info.ultralytics_available == Some(false) || info.model_loaded == Some(false) {
            return Err(GatewayError::BackendUnavailable(
                "backend runtime reports no usable model".to_string(),
            ));
        }

        let vocabulary = Vocabulary::from_classes(info.classes).unwrap_or_else(|| {
            log::warn!("backend reported no classes; using COCO vocabulary");
            Vocabulary::coco()
        });
        Ok(ProbeReport {
            vocabulary,
            device: info.device.unwrap_or_else(|| "cpu".to_string()),
            model_name: info
                .model
                .unwrap_or_else(|| self.descriptor.model_label.clone()),
        })
    }

    pub fn mode(&self) -> DetectorMode {
        self.read_state().mode
    }

    pub fn is_loaded(&self) -> bool {
        self.mode() != DetectorMode::Unloaded
    }

    pub fn camera_active(&self) -> bool {
        self.camera_active.load(Ordering::SeqCst)
    }

    pub fn vocabulary(&self) -> Arc<Vocabulary> {
        self.read_state().vocabulary.clone()
    }

    /// Class names of the active vocabulary, in index order.
    pub fn classes(&self) -> Vec<String> {
        self.vocabulary().classes().to_vec()
    }

    /// Detect objects in a still image.
    pub fn detect(&self, image_data: &str, threshold: f32) -> GatewayResult<DetectionBatch> {
        validate_threshold(threshold)?;
        if strip_data_url(image_data).is_empty() {
            return Err(GatewayError::invalid_input("No image data provided"));
        }
        let vocabulary = self.vocabulary();
        match self.mode() {
            DetectorMode::Unloaded => Err(GatewayError::NotLoaded),
            DetectorMode::Simulated => self.simulator.detect(&vocabulary, threshold, false),
            DetectorMode::Real => {
                self.require(BackendCapability::ImageDetection, "image detection")?;
                let image = prepare_image(image_data, self.settings.input_size)?;
                let request = BackendRequest::new(BackendAction::Detect)
                    .with_image(image)
                    .with_confidence(threshold);
                let response = self.adapter.invoke(&request)?;
                self.batch_from_response(response, &vocabulary, threshold, false)
            }
        }
    }

    pub fn start_camera(&self, camera_index: u32) -> GatewayResult<CameraStatus> {
        match self.mode() {
            DetectorMode::Unloaded => Err(GatewayError::NotLoaded),
            DetectorMode::Simulated => {
                self.camera_active.store(true, Ordering::SeqCst);
                Ok(CameraStatus {
                    success: true,
                    message: "Camera simulation started (install Python + ultralytics for real camera)"
                        .to_string(),
                    camera_active: true,
                })
            }
            DetectorMode::Real => {
                self.require(BackendCapability::Camera, "camera")?;
                let request =
                    BackendRequest::new(BackendAction::StartCamera).with_camera_index(camera_index);
                let response = self.adapter.invoke(&request)?;
                check_success(&response)?;
                self.camera_active.store(true, Ordering::SeqCst);
                log::info!("camera {} started", camera_index);
                Ok(CameraStatus {
                    success: true,
                    message: response_message(&response, "Camera started"),
                    camera_active: true,
                })
            }
        }
    }

    pub fn stop_camera(&self) -> GatewayResult<CameraStatus> {
        if !self.camera_active() {
            return Ok(CameraStatus {
                success: true,
                message: "Camera already stopped".to_string(),
                camera_active: false,
            });
        }
        match self.mode() {
            DetectorMode::Real => {
                self.require(BackendCapability::Camera, "camera")?;
                let response = self
                    .adapter
                    .invoke(&BackendRequest::new(BackendAction::StopCamera))?;
                check_success(&response)?;
                self.camera_active.store(false, Ordering::SeqCst);
                log::info!("camera stopped");
                Ok(CameraStatus {
                    success: true,
                    message: response_message(&response, "Camera stopped"),
                    camera_active: false,
                })
            }
            DetectorMode::Simulated | DetectorMode::Unloaded => {
                self.camera_active.store(false, Ordering::SeqCst);
                Ok(CameraStatus {
                    success: true,
                    message: "Camera simulation stopped".to_string(),
                    camera_active: false,
                })
            }
        }
    }

    /// Capture one camera frame and run detection on it.
    pub fn frame_with_detections(&self, threshold: f32) -> GatewayResult<DetectionBatch> {
        validate_threshold(threshold)?;
        let vocabulary = self.vocabulary();
        match self.mode() {
            DetectorMode::Unloaded => Err(GatewayError::NotLoaded),
            DetectorMode::Simulated => self.simulator.detect(&vocabulary, threshold, true),
            DetectorMode::Real => {
                self.require(BackendCapability::Camera, "camera")?;
                if !self.camera_active() {
                    return Err(GatewayError::CameraNotActive);
                }
                let request = BackendRequest::new(BackendAction::GetFrame).with_confidence(threshold);
                let response = self.adapter.invoke(&request)?;
                self.batch_from_response(response, &vocabulary, threshold, true)
            }
        }
    }

    pub fn camera_info(&self) -> GatewayResult<CameraInfo> {
        match self.mode() {
            DetectorMode::Unloaded => Err(GatewayError::NotLoaded),
            DetectorMode::Simulated => Ok(CameraInfo {
                available: false,
                simulated: true,
                message: Some("Install Python + ultralytics for real camera support".to_string()),
                ..CameraInfo::default()
            }),
            DetectorMode::Real => {
                if !self.descriptor.supports(BackendCapability::Camera) {
                    return Ok(CameraInfo {
                        available: false,
                        message: Some(format!(
                            "backend '{}' has no camera support",
                            self.descriptor.name
                        )),
                        ..CameraInfo::default()
                    });
                }
                let response = self
                    .adapter
                    .invoke(&BackendRequest::new(BackendAction::CameraInfo))?;
                check_success(&response)?;
                let info = response.get("camera_info").cloned().ok_or_else(|| {
                    GatewayError::MalformedResponse("response has no camera_info".to_string())
                })?;
                serde_json::from_value(info)
                    .map_err(|e| GatewayError::MalformedResponse(e.to_string()))
            }
        }
    }

    /// Snapshot of the detector state.
    pub fn model_info(&self) -> ModelInfo {
        let state = self.read_state();
        let input_size = self.settings.input_size.unwrap_or(640);
        ModelInfo {
            loaded: state.mode != DetectorMode::Unloaded,
            mode: state.mode,
            backend: self.descriptor.name.clone(),
            model_path: self.settings.model_path.clone(),
            version: state.model_name.clone(),
            input_size: [input_size, input_size],
            classes: state.vocabulary.classes().to_vec(),
            num_classes: state.vocabulary.len(),
            fallback: state.mode == DetectorMode::Simulated,
            backend_available: state.backend_available,
            camera_active: self.camera_active(),
            device: state.device.clone(),
            load_error: state.last_load_error.clone(),
        }
    }

    fn batch_from_response(
        &self,
        response: Value,
        vocabulary: &Vocabulary,
        threshold: f32,
        expect_frame: bool,
    ) -> GatewayResult<DetectionBatch> {
        check_success(&response)?;
        let parsed: DetectResponse = serde_json::from_value(response)
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        let frame = if expect_frame {
            Some(parsed.frame.ok_or_else(|| {
                GatewayError::MalformedResponse("response has no frame".to_string())
            })?)
        } else {
            None
        };
        let detections = detections_from_backend(parsed.detections, vocabulary, threshold)?;
        let (model_name, device) = {
            let state = self.read_state();
            (state.model_name.clone(), state.device.clone())
        };
        Ok(DetectionBatch::new(
            detections,
            frame,
            parsed.model.unwrap_or(model_name),
            parsed.device.unwrap_or(device),
            threshold,
        ))
    }

    fn require(&self, capability: BackendCapability, what: &str) -> GatewayResult<()> {
        if self.descriptor.supports(capability) {
            Ok(())
        } else {
            Err(GatewayError::Unsupported(format!(
                "backend '{}' does not support {}",
                self.descriptor.name, what
            )))
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, DetectorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, DetectorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Thresholds outside [0, 1] are rejected, never clamped.
pub fn validate_threshold(threshold: f32) -> GatewayResult<()> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(GatewayError::invalid_input(format!(
            "confidence must be between 0 and 1, got {}",
            threshold
        )))
    }
}

fn check_success(response: &Value) -> GatewayResult<()> {
    match response.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(()),
        Some(false) => Err(GatewayError::BackendRejected(response_message(
            response,
            "unknown backend error",
        ))),
        None => Err(GatewayError::MalformedResponse(
            "response has no success flag".to_string(),
        )),
    }
}

fn response_message(response: &Value, default: &str) -> String {
    response
        .get("error")
        .or_else(|| response.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn missing_backend() -> BackendDescriptor {
        BackendDescriptor {
            script: PathBuf::from("/nonexistent/yolo_gateway/backend.py"),
            ..BackendDescriptor::ultralytics()
        }
    }

    fn detector() -> Detector {
        Detector::new(missing_backend(), DetectorSettings::default(), CancelToken::new())
    }

    #[test]
    fn calls_before_load_report_not_loaded() {
        let det = detector();
        assert_eq!(det.mode(), DetectorMode::Unloaded);
        assert!(!det.model_info().loaded);
        assert!(matches!(det.detect("QUJD", 0.5), Err(GatewayError::NotLoaded)));
        assert!(matches!(det.start_camera(0), Err(GatewayError::NotLoaded)));
        assert!(matches!(
            det.frame_with_detections(0.5),
            Err(GatewayError::NotLoaded)
        ));
        assert!(det.stop_camera().unwrap().success);
    }

    #[test]
    fn missing_backend_falls_back_to_simulation() {
        let det = detector();
        assert_eq!(det.load(), DetectorMode::Simulated);
        let info = det.model_info();
        assert!(info.loaded);
        assert!(info.fallback);
        assert_eq!(info.num_classes, 80);
        assert!(info.load_error.unwrap().contains("not found"));
        // Re-probing is allowed and lands in the same place.
        assert_eq!(det.load(), DetectorMode::Simulated);
    }

    #[test]
    fn forced_simulation_skips_probe() {
        let settings = DetectorSettings {
            force_simulation: true,
            ..DetectorSettings::default()
        };
        let det = Detector::new(BackendDescriptor::ultralytics(), settings, CancelToken::new());
        assert_eq!(det.load(), DetectorMode::Simulated);
        assert!(det
            .model_info()
            .load_error
            .unwrap()
            .contains("forced"));
    }

    #[test]
    fn out_of_range_thresholds_are_rejected() {
        let det = detector();
        det.load();
        for bad in [-0.1, 1.01, f32::NAN] {
            assert!(matches!(
                det.detect("QUJD", bad),
                Err(GatewayError::InvalidInput(_))
            ));
            assert!(matches!(
                det.frame_with_detections(bad),
                Err(GatewayError::InvalidInput(_))
            ));
        }
        assert!(matches!(
            det.detect("", 0.5),
            Err(GatewayError::InvalidInput(_))
        ));
    }

    #[test]
    fn simulated_camera_toggles_flag() {
        let det = detector();
        det.load();
        assert!(det.start_camera(1).unwrap().camera_active);
        assert!(det.camera_active());
        let batch = det.frame_with_detections(0.0).unwrap();
        assert!(batch.frame.is_some());
        assert!(!batch.detections.is_empty());
        assert!(!det.stop_camera().unwrap().camera_active);
        assert!(det.stop_camera().unwrap().success);
        assert!(!det.camera_active());
    }

    #[test]
    fn simulated_frames_do_not_need_camera() {
        let det = detector();
        det.load();
        let batch = det.frame_with_detections(0.99).unwrap();
        assert!(batch.detections.iter().all(|d| d.confidence >= 0.99));
        let info = det.camera_info().unwrap();
        assert!(!info.available);
        assert!(info.simulated);
    }

    #[test]
    fn simulated_labels_match_vocabulary() {
        let det = detector();
        det.load();
        let vocab = det.vocabulary();
        assert_eq!(det.classes().len(), 80);
        assert_eq!(det.classes()[0], "person");
        for _ in 0..200 {
            for d in det.detect("QUJD", 0.0).unwrap().detections {
                assert_eq!(vocab.label(d.class_index), Some(d.label.as_str()));
            }
        }
    }

    #[test]
    fn success_flag_is_interpreted() {
        assert!(check_success(&serde_json::json!({"success": true})).is_ok());
        assert!(matches!(
            check_success(&serde_json::json!({"success": false, "error": "Could not get frame"})),
            Err(GatewayError::BackendRejected(msg)) if msg == "Could not get frame"
        ));
        assert!(matches!(
            check_success(&serde_json::json!({"frame": "x"})),
            Err(GatewayError::MalformedResponse(_))
        ));
    }
}
