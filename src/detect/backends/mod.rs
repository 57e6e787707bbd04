pub mod process;
pub mod simulated;

pub use process::{CancelToken, ProcessAdapter};
pub use simulated::SimulatedDetector;
