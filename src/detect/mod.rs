mod backend;
pub mod backends;
mod facade;
pub mod preprocess;
mod registry;
mod result;
mod vocabulary;

pub use backend::{
    python_import_check, BackendAction, BackendCapability, BackendDescriptor, BackendRequest,
};
pub use backends::{CancelToken, ProcessAdapter, SimulatedDetector};
pub use facade::{validate_threshold, Detector, DetectorSettings, ProbeReport};
pub use registry::BackendRegistry;
pub use result::{
    BoundingBox, CameraInfo, CameraStatus, Detection, DetectionBatch, DetectorMode, ModelInfo,
};
pub use vocabulary::{Vocabulary, COCO_CLASSES};
