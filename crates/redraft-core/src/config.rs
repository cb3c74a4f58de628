use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upload: UploadConfig::default(),
            chunking: ChunkingConfig::default(),
            inference: InferenceConfig::default(),
            timeout: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            scheduler: SchedulerConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables only
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None, "REDRAFT")
    }

    /// Load configuration from an optional TOML file with environment overrides.
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load_from(path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("upload.allowed_extensions")
                    .with_list_parse_key("upload.allowed_mime_types")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Message(msg.to_string()));

        if self.upload.max_file_size_bytes == 0 {
            return invalid("upload.max_file_size_bytes must be greater than 0");
        }
        if self.upload.allowed_extensions.is_empty() {
            return invalid("upload.allowed_extensions must not be empty");
        }
        if self.chunking.max_chunk_chars == 0 {
            return invalid("chunking.max_chunk_chars must be greater than 0");
        }
        if !self.inference.prompt_template.contains(PROMPT_PLACEHOLDER) {
            return invalid("inference.prompt_template must contain {text}");
        }
        if self.inference.max_concurrent_requests == 0 {
            return invalid("inference.max_concurrent_requests must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.success_threshold == 0 {
            return invalid("circuit_breaker thresholds must be at least 1");
        }
        if self.scheduler.max_concurrency == 0 {
            return invalid("scheduler.max_concurrency must be at least 1");
        }
        if self.timeout.max_secs == 0 {
            return invalid("timeout.max_secs must be greater than 0");
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on a whole optimize request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_secs() -> u64 {
    900
}

/// Upload validation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
}

impl UploadConfig {
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
            temp_dir: default_temp_dir(),
            allowed_extensions: default_allowed_extensions(),
            allowed_mime_types: default_allowed_mime_types(),
        }
    }
}

fn default_max_file_size_bytes() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("redraft-uploads")
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["txt".to_string(), "docx".to_string()]
}

fn default_allowed_mime_types() -> Vec<String> {
    vec![
        "text/plain".to_string(),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string(),
    ]
}

/// Chunking configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

fn default_max_chunk_chars() -> usize {
    2000
}

/// Placeholder substituted with chunk text in the prompt template
pub const PROMPT_PLACEHOLDER: &str = "{text}";

/// Inference endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Process-wide cap on in-flight inference calls
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// How long a call may wait for an inference slot; unbounded when unset
    #[serde(default)]
    pub queue_wait_secs: Option<u64>,
}

impl InferenceConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn queue_wait(&self) -> Option<Duration> {
        self.queue_wait_secs.map(Duration::from_secs)
    }

    /// Render the prompt for one chunk
    pub fn render_prompt(&self, text: &str) -> String {
        self.prompt_template.replace(PROMPT_PLACEHOLDER, text)
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            prompt_template: default_prompt_template(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
            queue_wait_secs: None,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_prompt_template() -> String {
    "Rewrite the following text so it is clear, concise and well structured. \
     Keep the original meaning and language. Reply with the rewritten text only.\n\n{text}"
        .to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_max_concurrent_requests() -> usize {
    1
}

/// Per-call timeout budget configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Budget for the first call while the model loads
    #[serde(default = "default_cold_start_secs")]
    pub cold_start_secs: u64,
    #[serde(default = "default_base_secs")]
    pub base_secs: u64,
    #[serde(default = "default_per_char_ms")]
    pub per_char_ms: u64,
    #[serde(default = "default_max_secs")]
    pub max_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            cold_start_secs: default_cold_start_secs(),
            base_secs: default_base_secs(),
            per_char_ms: default_per_char_ms(),
            max_secs: default_max_secs(),
        }
    }
}

fn default_cold_start_secs() -> u64 {
    300
}

fn default_base_secs() -> u64 {
    30
}

fn default_per_char_ms() -> u64 {
    20
}

fn default_max_secs() -> u64 {
    300
}

/// Retry configuration for inference calls
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per chunk, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_cooldown_secs() -> u64 {
    30
}

/// Per-job scheduling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrent chunk invocations within one job
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize {
    1
}

/// Health probe configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_concurrency, 1);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.upload.allowed_extensions, vec!["txt", "docx"]);
    }

    #[test]
    fn test_server_config_address() {
        let config = ServerConfig::new()
            .with_host("127.0.0.1".to_string())
            .with_port(3000);

        assert_eq!(config.address(), "127.0.0.1:3000");
        assert_eq!(config.request_timeout(), Duration::from_secs(900));
    }

    #[test]
    fn test_prompt_rendering() {
        let config = InferenceConfig::default().with_prompt_template("Fix: {text}");
        assert_eq!(config.render_prompt("hello"), "Fix: hello");
    }

    #[test]
    fn test_validate_rejects_template_without_placeholder() {
        let mut config = AppConfig::default();
        config.inference.prompt_template = "no placeholder".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[inference]\nmodel = \"mistral\"\n\n[retry]\nmax_attempts = 5\n\n[chunking]\nmax_chunk_chars = 1000"
        )
        .unwrap();

        let config = AppConfig::load_from(Some(file.path()), "REDRAFT_TEST_UNUSED").unwrap();
        assert_eq!(config.inference.model, "mistral");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.chunking.max_chunk_chars, 1000);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redraft.toml");
        let config = AppConfig::load_from(Some(&path), "REDRAFT_TEST_UNUSED").unwrap();
        assert_eq!(config.server.port, 8080);
    }
}
