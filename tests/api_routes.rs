mod common;

use anyhow::Result;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use common::FakeProvider;
use yolo_gateway::api::{ApiConfig, ApiHandle, ApiServer, AppState};
use yolo_gateway::detect::{BackendDescriptor, CancelToken, Detector, DetectorSettings};
use yolo_gateway::llm::{ClaudeClient, CodexClient, ProviderConfig, DEFAULT_CLAUDE_MODEL};

struct Options {
    loaded: bool,
    max_upload_bytes: usize,
    anthropic_base_url: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            loaded: true,
            max_upload_bytes: 1024 * 1024,
            anthropic_base_url: None,
        }
    }
}

struct TestApi {
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        Self::with(Options::default())
    }

    fn with(options: Options) -> Result<Self> {
        let settings = DetectorSettings {
            force_simulation: true,
            ..DetectorSettings::default()
        };
        let detector = Arc::new(Detector::new(
            BackendDescriptor::ultralytics(),
            settings,
            CancelToken::new(),
        ));
        if options.loaded {
            detector.load();
        }

        let anthropic = ProviderConfig {
            api_key: options
                .anthropic_base_url
                .as_ref()
                .map(|_| "test-anthropic-key".to_string()),
            base_url: options
                .anthropic_base_url
                .unwrap_or_else(|| "http://127.0.0.1:9".to_string()),
            timeout: Duration::from_secs(5),
        };
        let openai = ProviderConfig {
            api_key: None,
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(5),
        };
        let state = AppState::new(
            detector,
            ClaudeClient::new(&anthropic, DEFAULT_CLAUDE_MODEL)?,
            CodexClient::new(&openai)?,
        );

        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            max_body_bytes: 4 * 1024 * 1024,
            max_upload_bytes: options.max_upload_bytes,
        };
        let api_handle = ApiServer::new(api_config, Arc::new(state)).spawn()?;
        Ok(Self {
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn send(&self, request: &[u8]) -> Result<(u16, String, String)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        stream.write_all(request)?;
        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        let mut parts = response.splitn(2, "\r\n\r\n");
        let headers = parts.next().unwrap_or("").to_string();
        let body = parts.next().unwrap_or("").to_string();
        let status = headers
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap_or(0);
        Ok((status, headers, body))
    }

    fn get(&self, path: &str) -> Result<(u16, Value)> {
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (status, _, body) = self.send(request.as_bytes())?;
        Ok((status, serde_json::from_str(&body)?))
    }

    fn post(&self, path: &str, body: &Value) -> Result<(u16, Value)> {
        let payload = body.to_string();
        let request = format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            payload.len(),
            payload
        );
        let (status, _, body) = self.send(request.as_bytes())?;
        Ok((status, serde_json::from_str(&body)?))
    }

    fn upload(&self, mime: &str, data: &[u8], confidence: Option<&str>) -> Result<(u16, Value)> {
        let boundary = "----gatewaytest";
        let mut body = Vec::new();
        if let Some(confidence) = confidence {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"confidence\"\r\n\r\n{confidence}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"frame.png\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let mut request = format!(
            "POST /api/yolo/upload HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary={boundary}\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(&body);
        let (status, _, body) = self.send(&request)?;
        Ok((status, serde_json::from_str(&body)?))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn assert_close(value: &Value, expected: f64) {
    let actual = value.as_f64().expect("number");
    assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
}

#[test]
fn health_reports_services_and_simulated_detector() -> Result<()> {
    let api = TestApi::new()?;
    let (status, body) = api.get("/api/health")?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    assert_eq!(body["services"]["claude"], false);
    assert_eq!(body["services"]["codex"], false);
    assert_eq!(body["services"]["yolo"], true);
    assert_eq!(body["services"]["yoloInfo"]["mode"], "simulated");
    assert_eq!(body["services"]["yoloInfo"]["fallback"], true);
    Ok(())
}

#[test]
fn classes_and_status_describe_fallback_vocabulary() -> Result<()> {
    let api = TestApi::new()?;
    let (status, body) = api.get("/api/yolo/classes")?;
    assert_eq!(status, 200);
    assert_eq!(body["totalClasses"], 80);
    assert_eq!(body["classes"][0], "person");
    assert_eq!(body["classes"][79], "toothbrush");
    assert_eq!(body["ultralytics"], false);

    let (status, body) = api.get("/api/yolo/status")?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "loaded");
    assert_eq!(body["modelPath"], "./models/yolov8n.pt");
    assert_eq!(body["modelInfo"]["numClasses"], 80);
    Ok(())
}

#[test]
fn detect_filters_by_requested_confidence() -> Result<()> {
    let api = TestApi::new()?;
    for _ in 0..20 {
        let (status, body) = api.post(
            "/api/yolo/detect",
            &json!({"imageData": "data:image/png;base64,QUJD", "confidence": 0.9}),
        )?;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_close(&body["confidenceThreshold"], 0.9);
        let detections = body["detections"].as_array().unwrap();
        assert_eq!(body["numDetections"], detections.len());
        for det in detections {
            assert!(det["confidence"].as_f64().unwrap() >= 0.9 - 1e-6);
            assert!(det["class"].is_string());
            assert!(det["classId"].as_u64().unwrap() < 80);
            assert_eq!(det["bbox"].as_array().unwrap().len(), 4);
        }
        assert!(body.get("frame").is_none());
    }
    Ok(())
}

#[test]
fn detect_near_certain_threshold_in_simulation() -> Result<()> {
    let api = TestApi::new()?;
    for _ in 0..50 {
        let (status, body) = api.post(
            "/api/yolo/detect",
            &json!({"imageData": "QUJD", "confidence": 0.99}),
        )?;
        assert!(status < 500, "server error {status}: {body}");
        assert_eq!(status, 200);
        assert_close(&body["confidenceThreshold"], 0.99);
        for det in body["detections"].as_array().unwrap() {
            assert!(det["confidence"].as_f64().unwrap() >= 0.99 - 1e-6);
        }
    }
    Ok(())
}

#[test]
fn detect_rejects_bad_input() -> Result<()> {
    let api = TestApi::new()?;
    let (status, body) = api.post("/api/yolo/detect", &json!({"confidence": 0.5}))?;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "No image data provided");

    let (status, _) = api.post(
        "/api/yolo/detect",
        &json!({"imageData": "QUJD", "confidence": 1.5}),
    )?;
    assert_eq!(status, 400);

    let request = "POST /api/yolo/detect HTTP/1.1\r\nHost: localhost\r\nContent-Length: 9\r\n\r\n{\"image\":";
    let (status, _, body) = api.send(request.as_bytes())?;
    assert_eq!(status, 400);
    assert!(body.contains("invalid JSON body"));
    Ok(())
}

#[test]
fn detection_before_load_is_unavailable() -> Result<()> {
    let api = TestApi::with(Options {
        loaded: false,
        ..Options::default()
    })?;
    let (status, body) = api.get("/api/yolo/status")?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "not loaded");

    let (status, _) = api.post("/api/yolo/detect", &json!({"imageData": "QUJD"}))?;
    assert_eq!(status, 503);
    Ok(())
}

#[test]
fn camera_lifecycle_in_simulation() -> Result<()> {
    let api = TestApi::new()?;
    let (status, body) = api.post("/api/yolo/start-camera", &json!({"cameraIndex": 1}))?;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["cameraActive"], true);
    assert_eq!(body["modelInfo"]["cameraActive"], true);

    let (status, body) = api.get("/api/yolo/camera-info")?;
    assert_eq!(status, 200);
    assert_eq!(body["camera_info"]["simulated"], true);
    assert_eq!(body["camera_info"]["available"], false);

    let (status, body) = api.get("/api/yolo/frame?confidence=0.6")?;
    assert_eq!(status, 200);
    assert!(body["frame"].as_str().is_some_and(|f| !f.is_empty()));
    assert_close(&body["confidenceThreshold"], 0.6);

    for _ in 0..2 {
        let (status, body) = api.post("/api/yolo/stop-camera", &json!({}))?;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["cameraActive"], false);
    }
    Ok(())
}

#[test]
fn frame_rejects_unparseable_confidence() -> Result<()> {
    let api = TestApi::new()?;
    let (status, body) = api.get("/api/yolo/frame?confidence=high")?;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("confidence"));
    Ok(())
}

#[test]
fn unknown_routes_and_methods() -> Result<()> {
    let api = TestApi::new()?;
    let (status, body) = api.get("/api/yolo/train")?;
    assert_eq!(status, 404);
    assert_eq!(body, json!({"error": "Route not found"}));

    let (status, _) = api.get("/api/yolo/detect")?;
    assert_eq!(status, 405);

    let request = "OPTIONS /api/yolo/detect HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let (status, headers, body) = api.send(request.as_bytes())?;
    assert_eq!(status, 204);
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    assert!(body.is_empty());
    Ok(())
}

#[test]
fn upload_accepts_images_only() -> Result<()> {
    let api = TestApi::with(Options {
        max_upload_bytes: 64,
        ..Options::default()
    })?;
    let png = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

    let (status, body) = api.upload("image/png", &png, Some("0.7"))?;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_close(&body["confidenceThreshold"], 0.7);

    let (status, body) = api.upload("text/plain", b"hello", None)?;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Only image files are allowed");

    let (status, _) = api.upload("image/jpeg", &[0u8; 128], None)?;
    assert_eq!(status, 413);
    Ok(())
}

#[test]
fn analyze_detections_without_objects_is_canned() -> Result<()> {
    let api = TestApi::new()?;
    let (status, body) = api.post("/api/yolo/analyze-detections", &json!({"detections": []}))?;
    assert_eq!(status, 200);
    assert_eq!(body["analysis"], "No objects detected in the image.");
    assert_eq!(body["detections"], json!([]));
    Ok(())
}

#[test]
fn llm_routes_without_keys_are_unavailable() -> Result<()> {
    let api = TestApi::new()?;
    let (status, body) = api.post(
        "/api/yolo/analyze-detections",
        &json!({"detections": [{"class": "dog", "confidence": 0.8}]}),
    )?;
    assert_eq!(status, 503);
    assert_eq!(body["error"], "Anthropic API key not configured");

    let (status, body) = api.post("/api/codex/complete", &json!({"code": "fn main() {"}))?;
    assert_eq!(status, 503);
    assert_eq!(body["error"], "OpenAI API key not configured");

    let (status, body) = api.post("/api/claude/chat", &json!({}))?;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "message is required");
    Ok(())
}

#[test]
fn analyze_detections_asks_claude() -> Result<()> {
    let provider = FakeProvider::respond(
        200,
        r#"{"content":[{"type":"text","text":"A person walking a dog."}],"model":"claude-3-sonnet-20240229","usage":{"input_tokens":12,"output_tokens":7}}"#,
    );
    let api = TestApi::with(Options {
        anthropic_base_url: Some(provider.base_url.clone()),
        ..Options::default()
    })?;
    let detections = json!([
        {"class": "person", "confidence": 0.92},
        {"class": "dog", "confidence": 0.755}
    ]);
    let (status, body) = api.post(
        "/api/yolo/analyze-detections",
        &json!({"detections": detections}),
    )?;
    assert_eq!(status, 200);
    assert_eq!(body["analysis"], "A person walking a dog.");
    assert_eq!(body["detections"], detections);
    let description = body["objectsDescription"].as_str().unwrap();
    assert!(description.starts_with("person (92.0% confidence), dog ("));

    let captured = provider.request();
    assert_eq!(captured.method, "POST");
    assert_eq!(captured.path, "/v1/messages");
    assert_eq!(captured.headers["x-api-key"], "test-anthropic-key");
    assert_eq!(captured.body["max_tokens"], 1000);
    let prompt = captured.body["messages"][0]["content"].as_str().unwrap();
    assert!(prompt.contains(description));
    Ok(())
}
