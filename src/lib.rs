//! YOLO gateway
//!
//! An HTTP gateway in front of two kinds of service: hosted LLM providers
//! (Anthropic and OpenAI) and an object detector that runs out of process.
//!
//! # Architecture
//!
//! Detection never makes the gateway unavailable. At startup the detector
//! probes its backend process; when the runtime, the script or the model is
//! missing it falls back to a simulated detector that produces plausible
//! results over the COCO vocabulary. Both modes serve the same routes.
//!
//! # Module Structure
//!
//! - `detect`: detector facade, backend descriptors, process adapter, simulator
//! - `llm`: blocking Claude and Codex clients
//! - `api`: HTTP server and routes
//! - `config`: file and environment configuration
//! - `error`: typed errors and their HTTP status mapping

pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod llm;

pub use error::{GatewayError, GatewayResult};
