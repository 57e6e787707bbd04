use std::path::PathBuf;

use serde::Serialize;

/// Capabilities a backend process may offer.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendCapability {
    /// Detection on a caller-supplied still image.
    ImageDetection,
    /// Camera lifecycle and polled frame capture.
    Camera,
}

/// Describes one out-of-process detection backend.
///
/// A single adapter serves every backend; descriptors only differ in the
/// script they launch, the runtime check the probe runs and the
/// capabilities they advertise.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendDescriptor {
    /// Registry name.
    pub name: String,
    /// Interpreter used to run the script.
    pub program: String,
    /// Script passed as the first argument to `program`.
    pub script: PathBuf,
    /// Arguments for the runtime check run by the load-time probe.
    pub probe_args: Vec<String>,
    pub capabilities: Vec<BackendCapability>,
    /// Model label reported when the backend omits one.
    pub model_label: String,
}

impl BackendDescriptor {
    pub fn supports(&self, capability: BackendCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Full Ultralytics service: camera and still-image detection.
    pub fn ultralytics() -> Self {
        Self {
            name: "ultralytics".to_string(),
            program: "python".to_string(),
            script: PathBuf::from("python/yolo_ultralytics_service.py"),
            probe_args: python_import_check(&["ultralytics", "cv2", "torch"]),
            capabilities: vec![BackendCapability::Camera, BackendCapability::ImageDetection],
            model_label: "Ultralytics YOLOv8n".to_string(),
        }
    }

    /// Still-image only YOLOv8 service.
    pub fn yolov8() -> Self {
        Self {
            name: "yolov8".to_string(),
            program: "python".to_string(),
            script: PathBuf::from("python/yolo_service.py"),
            probe_args: python_import_check(&["ultralytics"]),
            capabilities: vec![BackendCapability::ImageDetection],
            model_label: "YOLOv8n".to_string(),
        }
    }

    /// Camera-only live service.
    pub fn live() -> Self {
        Self {
            name: "live".to_string(),
            program: "python".to_string(),
            script: PathBuf::from("python/yolo_live_service.py"),
            probe_args: python_import_check(&["ultralytics", "cv2"]),
            capabilities: vec![BackendCapability::Camera],
            model_label: "YOLOv8n Live".to_string(),
        }
    }
}

/// `python -c` arguments that import `modules` and exit non-zero if any is missing.
pub fn python_import_check(modules: &[&str]) -> Vec<String> {
    vec![
        "-c".to_string(),
        format!("import {}; print(\"OK\")", modules.join(", ")),
    ]
}

/// Actions understood by backend processes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendAction {
    Info,
    Detect,
    StartCamera,
    StopCamera,
    GetFrame,
    CameraInfo,
}

/// The single JSON document written to a backend's stdin.
#[derive(Clone, Debug, Serialize)]
pub struct BackendRequest {
    pub action: BackendAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_index: Option<u32>,
}

impl BackendRequest {
    pub fn new(action: BackendAction) -> Self {
        Self {
            action,
            image_data: None,
            confidence: None,
            camera_index: None,
        }
    }

    pub fn with_image(mut self, image_data: String) -> Self {
        self.image_data = Some(image_data);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_camera_index(mut self, camera_index: u32) -> Self {
        self.camera_index = Some(camera_index);
        self
    }
}
