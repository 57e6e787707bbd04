//! HTTP surface of the gateway.
//!
//! A small blocking HTTP/1.1 server: one accept loop on its own thread and a
//! thread per connection, so a request waiting on a backend process only
//! blocks itself. Every connection carries exactly one request.

mod http;
mod routes;

use crate::config::{ApiSettings, GatewayConfig};
use crate::detect::{CancelToken, Detector};
use crate::error::GatewayError;
use crate::llm::{ClaudeClient, CodexClient};
use anyhow::{anyhow, Result};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use http::{read_request, write_json_response};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_string(),
            max_body_bytes: 50 * 1024 * 1024,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            addr: settings.addr.clone(),
            max_body_bytes: settings.max_body_bytes,
            max_upload_bytes: settings.max_upload_bytes,
        }
    }
}

/// Shared services behind every route.
pub struct AppState {
    pub detector: Arc<Detector>,
    pub claude: ClaudeClient,
    pub codex: CodexClient,
}

impl AppState {
    pub fn new(detector: Arc<Detector>, claude: ClaudeClient, codex: CodexClient) -> Self {
        Self {
            detector,
            claude,
            codex,
        }
    }

    /// Build the provider clients from `cfg` around an existing detector.
    pub fn from_config(cfg: &GatewayConfig, detector: Arc<Detector>) -> Result<Self> {
        let claude = ClaudeClient::new(&cfg.anthropic(), cfg.providers.anthropic_model.clone())?;
        let codex = CodexClient::new(&cfg.openai())?;
        Ok(Self::new(detector, claude, codex))
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    cancel: CancelToken,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections and cancel in-flight backend calls.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: Arc<AppState>) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cancel = self.state.detector.cancel_token().clone();
        let cfg = Arc::new(self.cfg);
        let state = self.state;
        let join = std::thread::Builder::new()
            .name("api-accept".to_string())
            .spawn(move || {
                run_api(listener, cfg, state, shutdown_thread);
                log::info!("gateway api stopped");
            })?;
        log::info!("gateway api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            cancel,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: Arc<ApiConfig>,
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
) {
    accept_loop(
        &shutdown,
        || listener.accept(),
        |stream, peer| {
            let cfg = cfg.clone();
            let state = state.clone();
            let spawned = std::thread::Builder::new()
                .name("api-conn".to_string())
                .spawn(move || {
                    if let Err(err) = handle_connection(stream, &cfg, &state) {
                        log::warn!("gateway api request from {} rejected: {}", peer, err);
                    }
                });
            if let Err(err) = spawned {
                log::warn!("failed to spawn connection thread: {}", err);
            }
        },
    );
}

/// Accept until `shutdown` is set. Accept errors (aborted handshakes, fd
/// exhaustion) are logged and retried after a pause; they never end the loop.
fn accept_loop<C>(
    shutdown: &AtomicBool,
    mut accept: impl FnMut() -> io::Result<(C, SocketAddr)>,
    mut dispatch: impl FnMut(C, SocketAddr),
) {
    while !shutdown.load(Ordering::SeqCst) {
        match accept() {
            Ok((conn, peer)) => dispatch(conn, peer),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                log::warn!("gateway api accept failed, retrying: {}", err);
                std::thread::sleep(ACCEPT_ERROR_BACKOFF);
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, state: &AppState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream, cfg.max_body_bytes) {
        Ok(request) => request,
        Err(err) => {
            if let Some(gateway_err) = err.downcast_ref::<GatewayError>() {
                let body = serde_json::json!({ "error": gateway_err.to_string() }).to_string();
                write_json_response(&mut stream, gateway_err.status_code(), body.as_bytes())?;
            }
            return Err(err);
        }
    };
    let response = routes::handle(state, cfg, &request);
    log::debug!("{} {} -> {}", request.method, request.path, response.status);
    response.write_to(&mut stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_errors_do_not_end_the_loop() {
        let shutdown = AtomicBool::new(false);
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let mut attempts = 0;
        let mut served = Vec::new();
        accept_loop(
            &shutdown,
            || {
                attempts += 1;
                match attempts {
                    1 => Err(io::Error::from(io::ErrorKind::ConnectionAborted)),
                    2 => Err(io::Error::from(io::ErrorKind::WouldBlock)),
                    3 => Err(io::Error::new(io::ErrorKind::Other, "too many open files")),
                    n => Ok((n, peer)),
                }
            },
            |conn, addr| {
                served.push((conn, addr));
                shutdown.store(true, Ordering::SeqCst);
            },
        );
        assert_eq!(attempts, 4);
        assert_eq!(served, vec![(4, peer)]);
    }
}
