use serde::Deserialize;

/// How the audit appender writes the day's blob back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditWriteMode {
    /// Compare-and-swap on the version token read, retry on conflict.
    Conditional,
    /// Blind overwrite. Concurrent appends can lose records.
    Unconditional,
}

/// What to do when the audit log or metrics backend fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkFailurePolicy {
    /// Log the failure and still return the prediction.
    LogAndContinue,
    /// Fail the whole request.
    Propagate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub model_path: String,
    pub model_metadata_path: String,
    pub storage_url: Option<String>,
    pub storage_token: Option<String>,
    pub audit_bucket: String,
    pub audit_prefix: String,
    pub audit_write_mode: AuditWriteMode,
    pub audit_max_attempts: u32,
    pub audit_retry_backoff_ms: u64,
    pub metrics_url: Option<String>,
    pub metrics_namespace: String,
    pub metrics_feature_namespace: String,
    pub metrics_bucket_numeric: bool,
    pub sink_failure_policy: SinkFailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            model_path: "model/model.json".to_string(),
            model_metadata_path: "model/model_metadata.json".to_string(),
            storage_url: None,
            storage_token: None,
            audit_bucket: "fiap-ds-mlops-credit-scoring".to_string(),
            audit_prefix: "credit-scoring-data".to_string(),
            audit_write_mode: AuditWriteMode::Conditional,
            audit_max_attempts: 5,
            audit_retry_backoff_ms: 25,
            metrics_url: None,
            metrics_namespace: "Credit Score Model".to_string(),
            metrics_feature_namespace: "Credit Score Features".to_string(),
            metrics_bucket_numeric: false,
            sink_failure_policy: SinkFailurePolicy::LogAndContinue,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn http_url_var(name: &str) -> anyhow::Result<Option<String>> {
    match optional_var(name) {
        Some(url) => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
            Ok(Some(url.trim_end_matches('/').to_string()))
        }
        None => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            model_path: optional_var("MODEL_PATH").unwrap_or(defaults.model_path),
            model_metadata_path: optional_var("MODEL_METADATA_PATH")
                .unwrap_or(defaults.model_metadata_path),
            storage_url: http_url_var("STORAGE_URL")?,
            storage_token: optional_var("STORAGE_TOKEN"),
            audit_bucket: optional_var("AUDIT_BUCKET").unwrap_or(defaults.audit_bucket),
            audit_prefix: optional_var("AUDIT_PREFIX")
                .map(|p| p.trim_matches('/').to_string())
                .unwrap_or(defaults.audit_prefix),
            audit_write_mode: match optional_var("AUDIT_WRITE_MODE").as_deref() {
                None | Some("conditional") => AuditWriteMode::Conditional,
                Some("unconditional") => AuditWriteMode::Unconditional,
                Some(other) => anyhow::bail!(
                    "AUDIT_WRITE_MODE must be 'conditional' or 'unconditional', got '{}'",
                    other
                ),
            },
            audit_max_attempts: optional_var("AUDIT_MAX_ATTEMPTS")
                .map(|v| v.parse::<u32>())
                .transpose()
                .map_err(|_| anyhow::anyhow!("AUDIT_MAX_ATTEMPTS must be a positive integer"))?
                .unwrap_or(defaults.audit_max_attempts),
            audit_retry_backoff_ms: optional_var("AUDIT_RETRY_BACKOFF_MS")
                .map(|v| v.parse::<u64>())
                .transpose()
                .map_err(|_| anyhow::anyhow!("AUDIT_RETRY_BACKOFF_MS must be an integer"))?
                .unwrap_or(defaults.audit_retry_backoff_ms),
            metrics_url: http_url_var("METRICS_URL")?,
            metrics_namespace: optional_var("METRICS_NAMESPACE")
                .unwrap_or(defaults.metrics_namespace),
            metrics_feature_namespace: optional_var("METRICS_FEATURE_NAMESPACE")
                .unwrap_or(defaults.metrics_feature_namespace),
            metrics_bucket_numeric: match optional_var("METRICS_BUCKET_NUMERIC").as_deref() {
                None => defaults.metrics_bucket_numeric,
                Some("true") | Some("1") => true,
                Some("false") | Some("0") => false,
                Some(other) => {
                    anyhow::bail!("METRICS_BUCKET_NUMERIC must be true or false, got '{}'", other)
                }
            },
            sink_failure_policy: match optional_var("SINK_FAILURE_POLICY").as_deref() {
                None | Some("log_and_continue") => SinkFailurePolicy::LogAndContinue,
                Some("propagate") => SinkFailurePolicy::Propagate,
                Some(other) => anyhow::bail!(
                    "SINK_FAILURE_POLICY must be 'log_and_continue' or 'propagate', got '{}'",
                    other
                ),
            },
        };

        if config.audit_max_attempts == 0 {
            anyhow::bail!("AUDIT_MAX_ATTEMPTS must be at least 1");
        }
        if config.audit_bucket.contains('/') {
            anyhow::bail!("AUDIT_BUCKET cannot contain '/'");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Model artifact: {}", config.model_path);
        tracing::debug!("Model metadata: {}", config.model_metadata_path);
        match config.storage_url {
            Some(ref url) => tracing::info!("Audit storage: {}/{}", url, config.audit_bucket),
            None => tracing::warn!("STORAGE_URL not set, audit records are kept in memory"),
        }
        if config.storage_token.is_some() {
            tracing::debug!("Storage token: [REDACTED]");
        }
        match config.metrics_url {
            Some(ref url) => tracing::info!("Metrics endpoint: {}", url),
            None => tracing::info!("METRICS_URL not set, metrics are written to the log"),
        }
        tracing::debug!(
            "Audit write mode: {:?}, sink failure policy: {:?}",
            config.audit_write_mode,
            config.sink_failure_policy
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
