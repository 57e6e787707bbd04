use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::detect::{BackendCapability, BackendDescriptor, BackendRegistry, DetectorSettings};
use crate::llm::{ProviderConfig, DEFAULT_CLAUDE_MODEL};

const DEFAULT_API_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_BACKEND: &str = "ultralytics";
const DEFAULT_MODEL_PATH: &str = "./models/yolov8n.pt";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 20;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize, Default)]
struct GatewayConfigFile {
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
    providers: Option<ProvidersConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    program: Option<String>,
    script: Option<PathBuf>,
    model_path: Option<String>,
    timeout_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
    simulate: Option<bool>,
    normalize_input: Option<bool>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ProvidersConfigFile {
    anthropic_api_key: Option<String>,
    anthropic_base_url: Option<String>,
    anthropic_model: Option<String>,
    openai_api_key: Option<String>,
    openai_base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api: ApiSettings,
    pub detector: DetectorConfig,
    pub providers: ProviderSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub max_body_bytes: usize,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Registry name of the backend preset.
    pub backend: String,
    /// Interpreter override; `None` keeps the preset's.
    pub program: Option<String>,
    /// Script override; `None` keeps the preset's.
    pub script: Option<PathBuf>,
    pub model_path: String,
    pub timeout: Duration,
    pub probe_timeout: Duration,
    pub simulate: bool,
    pub normalize_input: bool,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub anthropic_model: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_file(GatewayConfigFile::default())
    }
}

impl GatewayConfig {
    /// Load from the file named by `YOLO_GATEWAY_CONFIG`, then the environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("YOLO_GATEWAY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like [`GatewayConfig::load`] with an explicit file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => GatewayConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GatewayConfigFile) -> Self {
        let api_file = file.api.unwrap_or_default();
        let api = ApiSettings {
            addr: api_file
                .addr
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_body_bytes: api_file.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            max_upload_bytes: api_file
                .max_upload_bytes
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };

        let det = file.detector.unwrap_or_default();
        let detector = DetectorConfig {
            backend: det.backend.unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            program: det.program,
            script: det.script,
            model_path: det
                .model_path
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
            timeout: Duration::from_secs(det.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            probe_timeout: Duration::from_secs(
                det.probe_timeout_secs
                    .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS),
            ),
            simulate: det.simulate.unwrap_or(false),
            normalize_input: det.normalize_input.unwrap_or(true),
            input_size: det.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
        };

        let prov = file.providers.unwrap_or_default();
        let providers = ProviderSettings {
            anthropic_api_key: prov.anthropic_api_key.filter(|k| !k.trim().is_empty()),
            anthropic_base_url: prov
                .anthropic_base_url
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            anthropic_model: prov
                .anthropic_model
                .unwrap_or_else(|| DEFAULT_CLAUDE_MODEL.to_string()),
            openai_api_key: prov.openai_api_key.filter(|k| !k.trim().is_empty()),
            openai_base_url: prov
                .openai_base_url
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            timeout: Duration::from_secs(
                prov.timeout_secs.unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
            ),
        };

        Self {
            api,
            detector,
            providers,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            if !port.trim().is_empty() {
                let port: u16 = port
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("PORT must be a TCP port number"))?;
                self.api.addr = format!("0.0.0.0:{}", port);
            }
        }
        if let Some(addr) = non_empty_env("YOLO_GATEWAY_ADDR") {
            self.api.addr = addr;
        }
        if let Ok(size) = std::env::var("MAX_FILE_SIZE") {
            self.api.max_upload_bytes = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("MAX_FILE_SIZE must be a size in bytes"))?;
        }
        if let Some(backend) = non_empty_env("YOLO_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(program) = non_empty_env("YOLO_PYTHON") {
            self.detector.program = Some(program);
        }
        if let Some(script) = non_empty_env("YOLO_SCRIPT") {
            self.detector.script = Some(PathBuf::from(script));
        }
        if let Some(model_path) = non_empty_env("YOLO_MODEL_PATH") {
            self.detector.model_path = model_path;
        }
        if let Ok(timeout) = std::env::var("YOLO_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("YOLO_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.detector.timeout = Duration::from_secs(seconds);
        }
        if let Ok(simulate) = std::env::var("YOLO_SIMULATE") {
            self.detector.simulate = parse_flag(&simulate)
                .ok_or_else(|| anyhow!("YOLO_SIMULATE must be true/false or 1/0"))?;
        }
        if let Some(key) = non_empty_env("ANTHROPIC_API_KEY") {
            self.providers.anthropic_api_key = Some(key);
        }
        if let Some(url) = non_empty_env("ANTHROPIC_BASE_URL") {
            self.providers.anthropic_base_url = url;
        }
        if let Some(key) = non_empty_env("OPENAI_API_KEY") {
            self.providers.openai_api_key = Some(key);
        }
        if let Some(url) = non_empty_env("OPENAI_BASE_URL") {
            self.providers.openai_base_url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.detector.timeout.is_zero() {
            return Err(anyhow!("detector timeout must be greater than zero"));
        }
        if self.detector.probe_timeout.is_zero() {
            return Err(anyhow!("detector probe timeout must be greater than zero"));
        }
        if self.providers.timeout.is_zero() {
            return Err(anyhow!("provider timeout must be greater than zero"));
        }
        if self.api.max_upload_bytes == 0 {
            return Err(anyhow!("max upload size must be greater than zero"));
        }
        if self.api.max_upload_bytes > self.api.max_body_bytes {
            return Err(anyhow!(
                "max upload size ({}) exceeds max body size ({})",
                self.api.max_upload_bytes,
                self.api.max_body_bytes
            ));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input size must be greater than zero"));
        }
        validate_base_url("anthropic", &self.providers.anthropic_base_url)?;
        validate_base_url("openai", &self.providers.openai_base_url)?;
        if BackendRegistry::with_builtin()
            .get(&self.detector.backend)
            .is_none()
        {
            return Err(anyhow!(
                "unknown detector backend '{}' (available: {})",
                self.detector.backend,
                BackendRegistry::with_builtin().list().join(", ")
            ));
        }
        Ok(())
    }

    /// The configured backend preset with interpreter and script overrides applied.
    pub fn backend_descriptor(&self) -> Result<BackendDescriptor> {
        let registry = self.backend_registry()?;
        let descriptor = registry
            .default_descriptor()
            .cloned()
            .ok_or_else(|| anyhow!("unknown detector backend '{}'", self.detector.backend))?;
        Ok(self.apply_descriptor_overrides(descriptor))
    }

    /// The configured preset if it offers `capability`, otherwise the first
    /// built-in preset (by name) that does. Overrides apply to the selected preset.
    pub fn backend_descriptor_for(&self, capability: BackendCapability) -> Result<BackendDescriptor> {
        let registry = self.backend_registry()?;
        let descriptor = registry.descriptor_for_capability(capability)?.clone();
        Ok(self.apply_descriptor_overrides(descriptor))
    }

    fn backend_registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::with_builtin();
        registry.set_default(&self.detector.backend)?;
        Ok(registry)
    }

    fn apply_descriptor_overrides(&self, mut descriptor: BackendDescriptor) -> BackendDescriptor {
        if let Some(program) = &self.detector.program {
            descriptor.program = program.clone();
        }
        if let Some(script) = &self.detector.script {
            descriptor.script = script.clone();
        }
        descriptor
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            model_path: self.detector.model_path.clone(),
            timeout: self.detector.timeout,
            probe_timeout: self.detector.probe_timeout,
            force_simulation: self.detector.simulate,
            input_size: self
                .detector
                .normalize_input
                .then_some(self.detector.input_size),
        }
    }

    pub fn anthropic(&self) -> ProviderConfig {
        ProviderConfig {
            api_key: self.providers.anthropic_api_key.clone(),
            base_url: self.providers.anthropic_base_url.clone(),
            timeout: self.providers.timeout,
        }
    }

    pub fn openai(&self) -> ProviderConfig {
        ProviderConfig {
            api_key: self.providers.openai_api_key.clone(),
            base_url: self.providers.openai_base_url.clone(),
            timeout: self.providers.timeout,
        }
    }
}

fn read_config_file(path: &Path) -> Result<GatewayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn validate_base_url(provider: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| anyhow!("invalid {} base url '{}': {}", provider, raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!(
            "{} base url must use http or https, got '{}'",
            provider,
            other
        )),
    }
}
