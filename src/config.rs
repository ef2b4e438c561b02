use crate::auth::AuthManager;
use crate::client::StoreClient;
use crate::errors::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

/// Store client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_retry_delay: Duration,
    /// Upper bound on any retry delay
    pub max_retry_delay: Duration,
    /// Growth factor between retry delays
    pub retry_multiplier: f64,
    /// Idle pooled connections kept per host
    pub max_idle_per_host: usize,
    /// How long an idle pooled connection is kept
    pub idle_timeout: Duration,
    /// Disable certificate verification for the store
    pub insecure: bool,
    /// CA bundle for the store, as a path or inline PEM
    pub ca_cert: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(crate::DEFAULT_TIMEOUT_MS),
            max_retries: crate::DEFAULT_RETRIES,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
            insecure: false,
            ca_cert: None,
        }
    }
}

impl ClientConfig {
    /// Many concurrent requests against one store
    pub fn high_throughput() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retry_delay: Duration::from_secs(10),
            max_idle_per_host: 20,
            idle_timeout: Duration::from_secs(120),
            ..Self::default()
        }
    }

    /// Fail fast
    pub fn low_latency() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(5),
            max_idle_per_host: 5,
            ..Self::default()
        }
    }

    /// Slow, distant regions
    pub fn multi_region() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 5,
            max_retry_delay: Duration::from_secs(60),
            retry_multiplier: 1.5,
            max_idle_per_host: 30,
            idle_timeout: Duration::from_secs(300),
            ..Self::default()
        }
    }

    /// Preset for a usage pattern
    pub fn for_pattern(pattern: UsagePattern) -> Self {
        match pattern {
            UsagePattern::Default => Self::default(),
            UsagePattern::HighThroughput => Self::high_throughput(),
            UsagePattern::LowLatency => Self::low_latency(),
            UsagePattern::MultiRegion => Self::multi_region(),
        }
    }

    /// Check the retry schedule and timeouts
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be greater than zero"));
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(Error::config("retry multiplier must be at least 1.0")
                .with_details(format!("got {}", self.retry_multiplier)));
        }
        if self.max_retry_delay < self.initial_retry_delay {
            return Err(Error::config(
                "maximum retry delay must not be shorter than the initial delay",
            ));
        }
        Ok(())
    }
}

/// Named configuration presets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UsagePattern {
    /// [`ClientConfig::default`]
    #[default]
    Default,
    /// [`ClientConfig::high_throughput`]
    HighThroughput,
    /// [`ClientConfig::low_latency`]
    LowLatency,
    /// [`ClientConfig::multi_region`]
    MultiRegion,
}

/// Builder for a [`StoreClient`]
#[derive(Debug)]
pub struct StoreClientBuilder {
    endpoint: String,
    auth: Option<Arc<AuthManager>>,
    config: ClientConfig,
    span: Option<Span>,
}

impl StoreClientBuilder {
    /// Create a builder for the store at `endpoint`
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Key-manager base URL (e.g., `"https://kms.example.com:9311"`); `/v1` is appended when missing
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth: None,
            config: ClientConfig::default(),
            span: None,
        }
    }

    /// Set the token source
    pub fn auth_manager(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Start from a preset
    pub fn usage_pattern(mut self, pattern: UsagePattern) -> Self {
        self.config = ClientConfig::for_pattern(pattern);
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the number of retries after the first attempt
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the first and maximum retry delays
    pub fn retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.config.initial_retry_delay = initial;
        self.config.max_retry_delay = max;
        self
    }

    /// Set the retry delay growth factor
    pub fn retry_multiplier(mut self, multiplier: f64) -> Self {
        self.config.retry_multiplier = multiplier;
        self
    }

    /// Set the idle connection pool size per host
    pub fn max_idle_per_host(mut self, max: usize) -> Self {
        self.config.max_idle_per_host = max;
        self
    }

    /// Set how long idle connections are kept
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Disable certificate verification (dangerous!)
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.config.insecure = insecure;
        self
    }

    /// Trust an additional CA bundle (path or inline PEM)
    pub fn ca_cert(mut self, ca_cert: impl Into<String>) -> Self {
        self.config.ca_cert = Some(ca_cert.into());
        self
    }

    /// Log under the given span
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Build the client with the configured options
    pub fn build(self) -> Result<StoreClient> {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(Error::config("store endpoint is required"));
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(Error::config("store endpoint must start with http:// or https://")
                .with_endpoint(endpoint));
        }

        let auth = self.auth.ok_or_else(|| {
            Error::config("an authentication manager is required")
                .with_suggestions(["Use .auth_manager() to set the token source"])
        })?;

        self.config.validate()?;

        let span = self
            .span
            .unwrap_or_else(|| tracing::debug_span!("barbican", component = "store"));
        StoreClient::new(endpoint, auth, self.config, span)
    }
}
