//! Monitoring metrics for every prediction.
//!
//! One `Score Prediction` point per request, then one `Score Feature`
//! presence counter per attribute with the attribute name as dimension name
//! and its value as dimension value. Raw numeric values make that dimension
//! unbounded; `bucket_numeric` collapses them to an order of magnitude.

use crate::circuit_breaker::{create_sink_circuit_breaker, SinkCircuitBreaker};
use crate::errors::AppError;
use crate::models::{display_value, AttributeMap};
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDatum {
    pub metric_name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub dimensions: Vec<Dimension>,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn put_metric_data(&self, namespace: &str, data: Vec<MetricDatum>)
        -> Result<(), AppError>;
}

/// Posts `{"namespace": .., "metric_data": [..]}` to a collector endpoint.
#[derive(Clone)]
pub struct HttpMetricsSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMetricsSink {
    pub fn new(endpoint: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::MetricsEmit(format!("Failed to create metrics client: {}", e)))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl MetricsSink for HttpMetricsSink {
    async fn put_metric_data(
        &self,
        namespace: &str,
        data: Vec<MetricDatum>,
    ) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "namespace": namespace,
                "metric_data": data,
            }))
            .send()
            .await
            .map_err(|e| AppError::MetricsEmit(format!("Metrics request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::MetricsEmit(format!(
                "Metrics backend returned {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }
}

/// Writes metric points to the log. Used when no backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMetricsSink;

#[async_trait]
impl MetricsSink for LogMetricsSink {
    async fn put_metric_data(
        &self,
        namespace: &str,
        data: Vec<MetricDatum>,
    ) -> Result<(), AppError> {
        for datum in data {
            tracing::info!(
                namespace,
                metric = %datum.metric_name,
                value = datum.value,
                dimensions = ?datum.dimensions,
                "metric"
            );
        }
        Ok(())
    }
}

/// Records every point in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    recorded: Mutex<Vec<(String, MetricDatum)>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(namespace, datum)` pairs in emission order.
    pub async fn recorded(&self) -> Vec<(String, MetricDatum)> {
        self.recorded.lock().await.clone()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn put_metric_data(
        &self,
        namespace: &str,
        data: Vec<MetricDatum>,
    ) -> Result<(), AppError> {
        let mut recorded = self.recorded.lock().await;
        recorded.extend(data.into_iter().map(|d| (namespace.to_string(), d)));
        Ok(())
    }
}

pub struct MetricsEmitter {
    sink: Arc<dyn MetricsSink>,
    breaker: SinkCircuitBreaker,
    prediction_namespace: String,
    feature_namespace: String,
    bucket_numeric: bool,
}

impl MetricsEmitter {
    pub fn new(
        sink: Arc<dyn MetricsSink>,
        prediction_namespace: String,
        feature_namespace: String,
    ) -> Self {
        Self {
            sink,
            breaker: create_sink_circuit_breaker(),
            prediction_namespace,
            feature_namespace,
            bucket_numeric: false,
        }
    }

    pub fn with_numeric_buckets(mut self, enabled: bool) -> Self {
        self.bucket_numeric = enabled;
        self
    }

    pub async fn emit(&self, attrs: &AttributeMap, prediction: u8) -> Result<(), AppError> {
        let prediction_point = MetricDatum {
            metric_name: "Score Prediction".to_string(),
            value: f64::from(prediction),
            unit: None,
            dimensions: vec![Dimension {
                name: "Currency".to_string(),
                value: "INR".to_string(),
            }],
        };
        self.send(&self.prediction_namespace, prediction_point).await?;

        for (name, value) in attrs {
            let feature_point = MetricDatum {
                metric_name: "Score Feature".to_string(),
                value: 1.0,
                unit: Some("Count".to_string()),
                dimensions: vec![Dimension {
                    name: name.clone(),
                    value: self.dimension_value(value),
                }],
            };
            self.send(&self.feature_namespace, feature_point).await?;
        }

        tracing::debug!("Emitted {} metric points", attrs.len() + 1);
        Ok(())
    }

    fn dimension_value(&self, value: &Value) -> String {
        match value {
            Value::Number(n) if self.bucket_numeric => {
                magnitude_bucket(n.as_f64().unwrap_or_default())
            }
            other => display_value(other),
        }
    }

    async fn send(&self, namespace: &str, datum: MetricDatum) -> Result<(), AppError> {
        match self
            .breaker
            .call(self.sink.put_metric_data(namespace, vec![datum]))
            .await
        {
            Ok(()) => Ok(()),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(AppError::MetricsEmit(
                "Metrics backend circuit is open".to_string(),
            )),
        }
    }
}

/// Order-of-magnitude label: `0`, `1e2`, `-1e-1`, ...
pub fn magnitude_bucket(x: f64) -> String {
    if x == 0.0 || !x.is_finite() {
        return "0".to_string();
    }
    let exponent = x.abs().log10().floor() as i32;
    let sign = if x < 0.0 { "-" } else { "" };
    format!("{}1e{}", sign, exponent)
}
