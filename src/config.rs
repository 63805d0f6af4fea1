//! Configuration management for Stylecard.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `STYLECARD__<SECTION>__<KEY>` environment variables, and finally the flat
//! environment variables the web app has always used (`MAX_REQUESTS_PER_MINUTE`,
//! `REPLICATE_API_TOKEN`, ...).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{Result, StylecardError};

/// Main configuration for the Stylecard service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StylecardConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission control for the face-swap provider
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Backoff policy for retried upstream calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Face-swap provider (Replicate) settings
    #[serde(default)]
    pub replicate: ReplicateConfig,

    /// Reference image provider (ImageKit) settings
    #[serde(default)]
    pub imagekit: ImageKitConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Sliding-window quota configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests admitted per window. Zero rejects everything.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in milliseconds
    #[serde(default = "default_window_size_ms")]
    pub window_size_ms: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_size_ms: default_window_size_ms(),
        }
    }
}

fn default_max_requests() -> u32 {
    2
}

fn default_window_size_ms() -> u64 {
    60_000
}

/// Retry executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, counting the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay after every failed attempt
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

/// Replicate face-swap provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateConfig {
    /// API token; the face-swap endpoint answers 500 while this is unset
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_replicate_base_url")]
    pub base_url: String,

    /// Model reference in `owner/name:version` form
    #[serde(default = "default_face_swap_model")]
    pub model: String,

    /// Route the prediction call through the retry executor. Each attempt is
    /// a billable prediction, so this stays off unless duplicates are acceptable.
    #[serde(default)]
    pub retry_enabled: bool,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Delay between status polls of a running prediction
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Polls before a running prediction is abandoned
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            base_url: default_replicate_base_url(),
            model: default_face_swap_model(),
            retry_enabled: false,
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
        }
    }
}

fn default_replicate_base_url() -> String {
    "https://api.replicate.com".to_string()
}

fn default_face_swap_model() -> String {
    "cdingram/face-swap:d1d6ea8c8be89d664a07a457526f7128109dee7030fdac424788d762c71ed111"
        .to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_polls() -> u32 {
    120
}

/// ImageKit reference image configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageKitConfig {
    /// Private API key used for HTTP basic auth
    #[serde(default)]
    pub private_key: Option<String>,

    #[serde(default = "default_imagekit_base_url")]
    pub base_url: String,

    /// Media library folder holding the curated reference images
    #[serde(default = "default_reference_path")]
    pub reference_path: String,

    /// Transformation suffix appended to ImageKit reference URLs before they
    /// are sent to the face-swap provider
    #[serde(default = "default_transformations")]
    pub transformations: String,
}

impl Default for ImageKitConfig {
    fn default() -> Self {
        Self {
            private_key: None,
            base_url: default_imagekit_base_url(),
            reference_path: default_reference_path(),
            transformations: default_transformations(),
        }
    }
}

fn default_imagekit_base_url() -> String {
    "https://api.imagekit.io".to_string()
}

fn default_reference_path() -> String {
    "/Reference".to_string()
}

fn default_transformations() -> String {
    concat!(
        "/tr:w-600,h-800,e-contrast,e-sharpen,c-at_max:b-20_FFFFFF:b-2_000000",
        ":l-text,i-CHICBYSALLY,ff-Audiowide,fs-18,co-FFFFFF,lx-bh_mul_0.65,ly-bh_mul_0.9,l-end",
        ":l-text,i-stylecard%20by,ff-Audiowide,fs-12,co-FFFFFF,lx-bh_mul_0.7,ly-bh_mul_0.87,l-end",
    )
    .to_string()
}

impl StylecardConfig {
    /// Load configuration from defaults, an optional YAML file and the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&StylecardConfig::default())?);

        if let Some(path) = path {
            debug!(path = %path.display(), "Reading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let mut config: StylecardConfig = builder
            .add_source(config::Environment::with_prefix("STYLECARD").separator("__"))
            .build()?
            .try_deserialize()?;

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: StylecardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| StylecardError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as YAML with secrets masked.
    pub fn to_redacted_yaml(&self) -> Result<String> {
        let mut redacted = self.clone();
        redacted.replicate.api_token = redacted.replicate.api_token.map(|_| "<redacted>".into());
        redacted.imagekit.private_key = redacted.imagekit.private_key.map(|_| "<redacted>".into());
        serde_yaml::to_string(&redacted).map_err(|e| StylecardError::Config(e.to_string()))
    }

    /// Overlay the flat environment variables used by the original web app.
    ///
    /// Numeric values that fail to parse leave the current setting untouched.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "MAX_REQUESTS_PER_MINUTE", &mut self.rate_limiting.max_requests);
        override_parsed(&lookup, "REQUEST_WINDOW_SIZE_MS", &mut self.rate_limiting.window_size_ms);
        override_parsed(&lookup, "MAX_RETRIES", &mut self.retry.max_attempts);
        override_parsed(&lookup, "INITIAL_RETRY_DELAY_MS", &mut self.retry.initial_delay_ms);
        override_parsed(&lookup, "BACKOFF_FACTOR", &mut self.retry.backoff_factor);

        if let Some(token) = non_empty(lookup("REPLICATE_API_TOKEN")) {
            self.replicate.api_token = Some(token);
        }
        if let Some(key) = non_empty(lookup("IMAGEKIT_API_KEY")) {
            self.imagekit.private_key = Some(key);
        }
        if let Some(tr) = non_empty(lookup("IMAGEKIT_TRANSFORMATIONS")) {
            self.imagekit.transformations = tr;
        }
    }

    /// Reject settings the governor cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.window_size_ms == 0 {
            return Err(StylecardError::Config(
                "rate_limiting.window_size_ms must be greater than zero".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(StylecardError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 0.0 {
            return Err(StylecardError::Config(format!(
                "retry.backoff_factor must be a non-negative number, got {}",
                self.retry.backoff_factor
            )));
        }
        if !self.replicate.model.contains(':') {
            return Err(StylecardError::Config(format!(
                "replicate.model must be in owner/name:version form, got {}",
                self.replicate.model
            )));
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn override_parsed<F, T>(lookup: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = non_empty(lookup(name)) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!(
            variable = name,
            value = %raw,
            fallback = %target,
            "Ignoring unparsable environment override"
        ),
    }
}
