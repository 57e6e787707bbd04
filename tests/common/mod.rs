#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::time::Duration;

use serde_json::Value;

/// What the fake provider received.
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

/// One-shot HTTP server standing in for an LLM provider.
pub struct FakeProvider {
    pub base_url: String,
    captured: mpsc::Receiver<CapturedRequest>,
}

impl FakeProvider {
    /// Serve a single request with `status` and the JSON `body`.
    pub fn respond(status: u16, body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake provider");
        let addr = listener.local_addr().expect("fake provider addr");
        let (tx, rx) = mpsc::channel();
        let body = body.to_string();
        std::thread::spawn(move || {
            let (mut stream, _) = match listener.accept() {
                Ok(conn) => conn,
                Err(_) => return,
            };
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .expect("read timeout");
            let mut data = Vec::new();
            let mut buf = [0u8; 4096];
            let header_end = loop {
                if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos;
                }
                let n = stream.read(&mut buf).expect("read request");
                if n == 0 {
                    return;
                }
                data.extend_from_slice(&buf[..n]);
            };
            let head = String::from_utf8_lossy(&data[..header_end]).to_string();
            let mut lines = head.split("\r\n");
            let mut request_line = lines.next().unwrap_or("").split_whitespace();
            let method = request_line.next().unwrap_or("").to_string();
            let path = request_line.next().unwrap_or("").to_string();
            let headers: HashMap<String, String> = lines
                .filter_map(|line| line.split_once(':'))
                .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
                .collect();
            let length: usize = headers
                .get("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let mut payload = data[header_end + 4..].to_vec();
            while payload.len() < length {
                let n = stream.read(&mut buf).expect("read body");
                if n == 0 {
                    break;
                }
                payload.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {} Fake\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).expect("write response");
            let _ = tx.send(CapturedRequest {
                method,
                path,
                headers,
                body: serde_json::from_slice(&payload).unwrap_or(Value::Null),
            });
        });
        Self {
            base_url: format!("http://{}", addr),
            captured: rx,
        }
    }

    pub fn request(&self) -> CapturedRequest {
        self.captured
            .recv_timeout(Duration::from_secs(5))
            .expect("fake provider received no request")
    }
}
