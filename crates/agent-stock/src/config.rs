//! Configuration for the analysis service

use crate::error::{Result, StockError};
use crate::indicators::IndicatorParams;
use crate::scoring::ScoringConfig;
use agent_utils::{LogFormat, env_or, env_parse, env_var};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Language model settings; absent when no endpoint is configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    /// Base URL of an OpenAI compatible endpoint
    pub api_url: String,

    #[serde(skip_serializing)]
    pub api_key: String,

    pub model: String,

    /// Upper bound on one narrative request
    pub timeout: Duration,

    pub temperature: f32,

    pub max_tokens: usize,
}

impl AiConfig {
    pub const DEFAULT_MODEL: &'static str = "gpt-3.5-turbo";

    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: Self::DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(60),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }

    /// Read `API_URL`, `API_KEY`, `API_MODEL` and `API_TIMEOUT`
    ///
    /// Returns `Ok(None)` unless both URL and key are set.
    pub fn from_env() -> Result<Option<Self>> {
        let (Some(url), Some(key)) = (env_var("API_URL"), env_var("API_KEY")) else {
            return Ok(None);
        };

        let mut config = Self::new(url, key);
        config.model = env_or("API_MODEL", Self::DEFAULT_MODEL);
        if let Some(secs) = env_parse::<u64>("API_TIMEOUT")? {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(Some(config))
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,

    /// Freshness window of cached price series
    pub cache_ttl: Duration,

    /// Maximum number of cached series
    pub cache_capacity: usize,

    /// Upper bound on one upstream data request
    pub request_timeout: Duration,

    /// Upstream requests per minute, per source
    pub upstream_rate_limit: u32,

    /// Instruments analysed at once during a scan
    pub scan_concurrency: usize,

    /// Calendar days of history used for analysis
    pub history_days: i64,

    pub ai: Option<AiConfig>,

    pub indicators: IndicatorParams,

    pub scoring: ScoringConfig,

    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 1024,
            request_timeout: Duration::from_secs(30),
            upstream_rate_limit: 120,
            scan_concurrency: 5,
            history_days: crate::series::DEFAULT_HISTORY_DAYS,
            ai: None,
            indicators: IndicatorParams::default(),
            scoring: ScoringConfig::default(),
            log_format: LogFormat::Text,
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(host) = env_var("HOST") {
            builder = builder.host(host);
        }
        if let Some(port) = env_parse::<u16>("PORT")? {
            builder = builder.port(port);
        }
        if let Some(secs) = env_parse::<u64>("CACHE_TTL_SECS")? {
            builder = builder.cache_ttl(Duration::from_secs(secs));
        }
        if let Some(n) = env_parse::<usize>("SCAN_CONCURRENCY")? {
            builder = builder.scan_concurrency(n);
        }
        if let Some(n) = env_parse::<u32>("UPSTREAM_RATE_LIMIT")? {
            builder = builder.upstream_rate_limit(n);
        }
        if let Some(format) = env_var("LOG_FORMAT") {
            let format = format.parse::<LogFormat>().map_err(StockError::Config)?;
            builder = builder.log_format(format);
        }
        if let Some(ai) = AiConfig::from_env()? {
            builder = builder.ai(ai);
        }

        builder.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.scan_concurrency == 0 {
            return Err(StockError::Config("scan_concurrency must be greater than 0".to_string()));
        }
        if self.upstream_rate_limit == 0 {
            return Err(StockError::Config("upstream_rate_limit must be greater than 0".to_string()));
        }
        if self.history_days <= 0 {
            return Err(StockError::Config("history_days must be positive".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(StockError::Config("request_timeout must be non-zero".to_string()));
        }
        if let Some(ai) = &self.ai {
            if ai.model.is_empty() {
                return Err(StockError::Config("AI model must not be empty".to_string()));
            }
            if ai.timeout.is_zero() {
                return Err(StockError::Config("AI timeout must be non-zero".to_string()));
            }
        }
        self.indicators.validate().map_err(StockError::Config)?;
        self.scoring.validate().map_err(StockError::Config)?;
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for ServiceConfig
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    cache_ttl: Option<Duration>,
    cache_capacity: Option<usize>,
    request_timeout: Option<Duration>,
    upstream_rate_limit: Option<u32>,
    scan_concurrency: Option<usize>,
    history_days: Option<i64>,
    ai: Option<AiConfig>,
    indicators: Option<IndicatorParams>,
    scoring: Option<ScoringConfig>,
    log_format: Option<LogFormat>,
}

impl ServiceConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn upstream_rate_limit(mut self, per_minute: u32) -> Self {
        self.upstream_rate_limit = Some(per_minute);
        self
    }

    pub fn scan_concurrency(mut self, n: usize) -> Self {
        self.scan_concurrency = Some(n);
        self
    }

    pub fn history_days(mut self, days: i64) -> Self {
        self.history_days = Some(days);
        self
    }

    /// Enable AI narratives
    pub fn ai(mut self, ai: AiConfig) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn indicators(mut self, params: IndicatorParams) -> Self {
        self.indicators = Some(params);
        self
    }

    pub fn scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = Some(scoring);
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = Some(format);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ServiceConfig> {
        let defaults = ServiceConfig::default();

        let config = ServiceConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            cache_ttl: self.cache_ttl.unwrap_or(defaults.cache_ttl),
            cache_capacity: self.cache_capacity.unwrap_or(defaults.cache_capacity),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            upstream_rate_limit: self.upstream_rate_limit.unwrap_or(defaults.upstream_rate_limit),
            scan_concurrency: self.scan_concurrency.unwrap_or(defaults.scan_concurrency),
            history_days: self.history_days.unwrap_or(defaults.history_days),
            ai: self.ai,
            indicators: self.indicators.unwrap_or(defaults.indicators),
            scoring: self.scoring.unwrap_or(defaults.scoring),
            log_format: self.log_format.unwrap_or(defaults.log_format),
        };

        config.validate()?;
        Ok(config)
    }
}
