use std::net::TcpStream;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::http::{multipart_boundary, parse_multipart, write_response, HttpRequest};
use super::{ApiConfig, AppState};
use crate::detect::preprocess::encode_image;
use crate::detect::DetectorMode;
use crate::error::{GatewayError, GatewayResult};

const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_LANGUAGE: &str = "javascript";

/// Every path the router knows, used to tell 405 from 404.
const KNOWN_PATHS: &[&str] = &[
    "/api/health",
    "/api/yolo/classes",
    "/api/yolo/status",
    "/api/yolo/detect",
    "/api/yolo/upload",
    "/api/yolo/start-camera",
    "/api/yolo/stop-camera",
    "/api/yolo/frame",
    "/api/yolo/camera-info",
    "/api/yolo/analyze-detections",
    "/api/claude/chat",
    "/api/claude/code",
    "/api/claude/analyze",
    "/api/claude/refactor",
    "/api/codex/complete",
    "/api/codex/generate",
    "/api/codex/explain",
    "/api/codex/debug",
    "/api/codex/optimize",
];

pub(crate) struct Response {
    pub status: u16,
    content_type: Option<&'static str>,
    body: Vec<u8>,
}

impl Response {
    fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: Some("application/json"),
                body,
            },
            Err(err) => {
                log::error!("failed to encode response body: {}", err);
                Self::json(500, &json!({ "error": "Internal server error" }))
            }
        }
    }

    fn ok<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::json(200, value)
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            content_type: None,
            body: Vec::new(),
        }
    }

    pub(crate) fn error(err: &GatewayError) -> Self {
        Self::json(err.status_code(), &json!({ "error": err.to_string() }))
    }

    pub(crate) fn write_to(&self, stream: &mut TcpStream) -> Result<()> {
        write_response(stream, self.status, self.content_type, &self.body)
    }
}

/// Payload flattened under `success: true`.
#[derive(Serialize)]
struct Success<T> {
    success: bool,
    #[serde(flatten)]
    payload: T,
}

fn success<T: Serialize>(payload: T) -> Response {
    Response::ok(&Success {
        success: true,
        payload,
    })
}

pub(crate) fn handle(state: &AppState, cfg: &ApiConfig, req: &HttpRequest) -> Response {
    if req.method == "OPTIONS" {
        return Response::no_content();
    }
    let outcome = match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/api/health") => Ok(health(state)),
        ("GET", "/api/yolo/classes") => Ok(classes(state)),
        ("GET", "/api/yolo/status") => Ok(status(state)),
        ("POST", "/api/yolo/detect") => detect(state, req),
        ("POST", "/api/yolo/upload") => upload(state, cfg, req),
        ("POST", "/api/yolo/start-camera") => start_camera(state, req),
        ("POST", "/api/yolo/stop-camera") => stop_camera(state),
        ("GET", "/api/yolo/frame") => frame(state, req),
        ("GET", "/api/yolo/camera-info") => camera_info(state),
        ("POST", "/api/yolo/analyze-detections") => analyze_detections(state, req),
        ("POST", "/api/claude/chat") => claude_chat(state, req),
        ("POST", "/api/claude/code") => claude_code(state, req),
        ("POST", "/api/claude/analyze") => claude_analyze(state, req),
        ("POST", "/api/claude/refactor") => claude_refactor(state, req),
        ("POST", "/api/codex/complete") => codex_complete(state, req),
        ("POST", "/api/codex/generate") => codex_generate(state, req),
        ("POST", "/api/codex/explain") => codex_explain(state, req),
        ("POST", "/api/codex/debug") => codex_debug(state, req),
        ("POST", "/api/codex/optimize") => codex_optimize(state, req),
        (_, path) if KNOWN_PATHS.contains(&path) => {
            return Response::json(405, &json!({ "error": "Method not allowed" }));
        }
        _ => return Response::json(404, &json!({ "error": "Route not found" })),
    };
    match outcome {
        Ok(response) => response,
        Err(err) => {
            log::warn!("{} {} failed: {}", req.method, req.path, err);
            Response::error(&err)
        }
    }
}

fn health(state: &AppState) -> Response {
    let info = state.detector.model_info();
    Response::ok(&json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "services": {
            "claude": state.claude.is_configured(),
            "codex": state.codex.is_configured(),
            "yolo": info.loaded,
            "yoloInfo": info,
        },
    }))
}

fn classes(state: &AppState) -> Response {
    let vocabulary = state.detector.vocabulary();
    let real = state.detector.mode() == DetectorMode::Real;
    let description = if real {
        format!("Ultralytics model classes ({} classes)", vocabulary.len())
    } else {
        format!(
            "COCO dataset classes ({} classes) - Fallback Mode",
            vocabulary.len()
        )
    };
    Response::ok(&json!({
        "success": true,
        "classes": vocabulary.classes(),
        "totalClasses": vocabulary.len(),
        "description": description,
        "ultralytics": real,
    }))
}

fn status(state: &AppState) -> Response {
    let info = state.detector.model_info();
    Response::ok(&json!({
        "status": if info.loaded { "loaded" } else { "not loaded" },
        "modelPath": state.detector.settings().model_path,
        "modelInfo": info,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DetectBody {
    image_data: Option<String>,
    confidence: Option<f32>,
}

fn detect(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: DetectBody = json_body(req)?;
    let image = body
        .image_data
        .ok_or_else(|| GatewayError::invalid_input("No image data provided"))?;
    let batch = state
        .detector
        .detect(&image, body.confidence.unwrap_or(DEFAULT_CONFIDENCE))?;
    Ok(success(batch))
}

fn upload(state: &AppState, cfg: &ApiConfig, req: &HttpRequest) -> GatewayResult<Response> {
    let boundary = req
        .header("content-type")
        .and_then(multipart_boundary)
        .ok_or_else(|| GatewayError::invalid_input("Expected a multipart/form-data body"))?;
    let parts = parse_multipart(&req.body, &boundary)?;

    let image = parts
        .iter()
        .find(|part| part.name == "image")
        .filter(|part| !part.data.is_empty())
        .ok_or_else(|| GatewayError::invalid_input("No image file provided"))?;
    let is_image = image
        .content_type
        .as_deref()
        .is_some_and(|mime| mime.to_ascii_lowercase().starts_with("image/"));
    if !is_image {
        return Err(GatewayError::invalid_input("Only image files are allowed"));
    }
    if image.data.len() > cfg.max_upload_bytes {
        return Err(GatewayError::PayloadTooLarge {
            limit: cfg.max_upload_bytes,
        });
    }

    let confidence = match parts.iter().find(|part| part.name == "confidence") {
        Some(part) => parse_confidence(&String::from_utf8_lossy(&part.data))?,
        None => DEFAULT_CONFIDENCE,
    };
    log::debug!(
        "upload {:?} ({} bytes)",
        image.filename.as_deref().unwrap_or("unnamed"),
        image.data.len()
    );
    let batch = state
        .detector
        .detect(&encode_image(&image.data), confidence)?;
    Ok(success(batch))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StartCameraBody {
    camera_index: Option<u32>,
}

fn start_camera(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: StartCameraBody = json_body(req)?;
    let status = state.detector.start_camera(body.camera_index.unwrap_or(0))?;
    Ok(Response::ok(&json!({
        "success": status.success,
        "message": status.message,
        "cameraActive": status.camera_active,
        "modelInfo": state.detector.model_info(),
    })))
}

fn stop_camera(state: &AppState) -> GatewayResult<Response> {
    let status = state.detector.stop_camera()?;
    Ok(Response::ok(&status))
}

fn frame(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let confidence = match req.query_param("confidence") {
        Some(raw) => parse_confidence(raw)?,
        None => DEFAULT_CONFIDENCE,
    };
    let batch = state.detector.frame_with_detections(confidence)?;
    Ok(success(batch))
}

fn camera_info(state: &AppState) -> GatewayResult<Response> {
    let info = state.detector.camera_info()?;
    Ok(Response::ok(&json!({ "success": true, "camera_info": info })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalyzeBody {
    detections: Vec<Value>,
    prompt: Option<String>,
}

fn analyze_detections(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: AnalyzeBody = json_body(req)?;
    if body.detections.is_empty() {
        return Ok(Response::ok(&json!({
            "success": true,
            "analysis": "No objects detected in the image.",
            "detections": [],
        })));
    }

    let objects_description = describe_detections(&body.detections)?;
    let prompt = match body.prompt.filter(|p| !p.trim().is_empty()) {
        Some(prompt) => prompt,
        None => format!(
            "I detected the following objects in an image: {}.\n\
             Please provide a detailed analysis of what you see, including:\n\
             1. What the scene likely contains\n\
             2. Any interesting observations about the objects\n\
             3. Potential context or activities happening\n\
             4. Any safety or practical considerations",
            objects_description
        ),
    };
    let reply = state.claude.chat(&prompt, None)?;
    Ok(Response::ok(&json!({
        "success": true,
        "analysis": reply.text,
        "detections": body.detections,
        "objectsDescription": objects_description,
    })))
}

/// `"person (92.1% confidence), dog (75.0% confidence)"`
fn describe_detections(detections: &[Value]) -> GatewayResult<String> {
    let described = detections
        .iter()
        .map(|det| {
            let class = det.get("class").and_then(Value::as_str);
            let confidence = det.get("confidence").and_then(Value::as_f64);
            match (class, confidence) {
                (Some(class), Some(confidence)) => {
                    Ok(format!("{} ({:.1}% confidence)", class, confidence * 100.0))
                }
                _ => Err(GatewayError::invalid_input(
                    "each detection needs a class and a confidence",
                )),
            }
        })
        .collect::<GatewayResult<Vec<_>>>()?;
    Ok(described.join(", "))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChatBody {
    message: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PromptBody {
    prompt: Option<String>,
    language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CodeBody {
    code: Option<String>,
    language: Option<String>,
    requirements: Option<String>,
    error: Option<String>,
}

impl CodeBody {
    fn language(&self) -> &str {
        self.language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
    }
}

impl PromptBody {
    fn language(&self) -> &str {
        self.language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
    }
}

fn claude_chat(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: ChatBody = json_body(req)?;
    let message = required(&body.message, "message")?;
    let reply = state.claude.chat(message, body.model.as_deref())?;
    Ok(Response::ok(&json!({
        "success": true,
        "content": reply.text,
        "usage": reply.usage,
        "model": reply.model,
    })))
}

fn claude_code(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: PromptBody = json_body(req)?;
    let prompt = required(&body.prompt, "prompt")?;
    let reply = state.claude.generate_code(prompt, body.language())?;
    Ok(Response::ok(&json!({
        "success": true,
        "code": reply.text,
        "language": body.language(),
        "usage": reply.usage,
    })))
}

fn claude_analyze(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: CodeBody = json_body(req)?;
    let code = required(&body.code, "code")?;
    let reply = state.claude.analyze_code(code, body.language())?;
    Ok(Response::ok(&json!({
        "success": true,
        "analysis": reply.text,
        "usage": reply.usage,
    })))
}

fn claude_refactor(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: CodeBody = json_body(req)?;
    let code = required(&body.code, "code")?;
    let reply =
        state
            .claude
            .refactor_code(code, body.language(), body.requirements.as_deref())?;
    Ok(Response::ok(&json!({
        "success": true,
        "refactoredCode": reply.text,
        "language": body.language(),
        "usage": reply.usage,
    })))
}

fn codex_complete(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: CodeBody = json_body(req)?;
    let code = required(&body.code, "code")?;
    let reply = state.codex.complete_code(code)?;
    Ok(Response::ok(&json!({
        "success": true,
        "completion": reply.text,
        "usage": reply.usage,
    })))
}

fn codex_generate(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: PromptBody = json_body(req)?;
    let prompt = required(&body.prompt, "prompt")?;
    let reply = state.codex.generate_code(prompt, body.language())?;
    Ok(Response::ok(&json!({
        "success": true,
        "code": reply.text,
        "language": body.language(),
        "usage": reply.usage,
    })))
}

fn codex_explain(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: CodeBody = json_body(req)?;
    let code = required(&body.code, "code")?;
    let reply = state.codex.explain_code(code, body.language())?;
    Ok(Response::ok(&json!({
        "success": true,
        "explanation": reply.text,
        "usage": reply.usage,
    })))
}

fn codex_debug(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: CodeBody = json_body(req)?;
    let code = required(&body.code, "code")?;
    let reply = state
        .codex
        .debug_code(code, body.language(), body.error.as_deref())?;
    Ok(Response::ok(&json!({
        "success": true,
        "debugResult": reply.text,
        "usage": reply.usage,
    })))
}

fn codex_optimize(state: &AppState, req: &HttpRequest) -> GatewayResult<Response> {
    let body: CodeBody = json_body(req)?;
    let code = required(&body.code, "code")?;
    let reply = state.codex.optimize_code(code, body.language())?;
    Ok(Response::ok(&json!({
        "success": true,
        "optimizedCode": reply.text,
        "usage": reply.usage,
    })))
}

/// Parse a JSON body; an empty body reads as the type's default.
fn json_body<T: DeserializeOwned + Default>(req: &HttpRequest) -> GatewayResult<T> {
    if req.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&req.body)
        .map_err(|e| GatewayError::invalid_input(format!("invalid JSON body: {}", e)))
}

fn required<'a>(value: &'a Option<String>, field: &str) -> GatewayResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| GatewayError::invalid_input(format!("{} is required", field)))
}

fn parse_confidence(raw: &str) -> GatewayResult<f32> {
    raw.trim()
        .parse::<f32>()
        .map_err(|_| GatewayError::invalid_input(format!("invalid confidence '{}'", raw.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_descriptions_use_one_decimal_percent() {
        let dets = vec![
            json!({"class": "person", "confidence": 0.9213}),
            json!({"class": "dog", "confidence": 0.75}),
        ];
        assert_eq!(
            describe_detections(&dets).unwrap(),
            "person (92.1% confidence), dog (75.0% confidence)"
        );
        assert!(describe_detections(&[json!({"class": "cat"})]).is_err());
    }

    #[test]
    fn confidence_strings_must_be_numbers() {
        assert_eq!(parse_confidence(" 0.25 ").unwrap(), 0.25);
        assert!(matches!(
            parse_confidence("high"),
            Err(GatewayError::InvalidInput(_))
        ));
    }

    #[test]
    fn required_fields_reject_blank_values() {
        assert!(required(&Some("  ".to_string()), "code").is_err());
        assert!(required(&None, "code").is_err());
        assert_eq!(required(&Some("x".to_string()), "code").unwrap(), "x");
    }

    #[test]
    fn success_envelope_flattens_payload() {
        #[derive(Serialize)]
        struct Payload {
            n: u32,
        }
        let response = success(Payload { n: 3 });
        let value: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value, json!({"success": true, "n": 3}));
    }
}
