use crate::audit_log::AuditLogAppender;
use crate::config::{Config, SinkFailurePolicy};
use crate::encoder::FeatureEncoder;
use crate::errors::{AppError, ResultExt};
use crate::invocation::InvocationEvent;
use crate::metrics::{HttpMetricsSink, LogMetricsSink, MetricsEmitter, MetricsSink};
use crate::models::{InvocationContext, PredictionBody, ResponseEnvelope};
use crate::object_store::{HttpObjectStore, InMemoryObjectStore, ObjectStore};
use crate::prediction::PredictionService;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Shared application state injected into handlers.
///
/// Everything in here is built once at startup and never mutated.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Loaded model and its version.
    pub prediction: Arc<PredictionService>,
    /// Attribute map to model input.
    pub encoder: FeatureEncoder,
    /// Per-day audit dataset writer.
    pub audit_log: Arc<AuditLogAppender>,
    /// Monitoring metrics writer.
    pub metrics: Arc<MetricsEmitter>,
}

impl AppState {
    pub fn new(
        config: Config,
        prediction: Arc<PredictionService>,
        store: Arc<dyn ObjectStore>,
        metrics_sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let audit_log = AuditLogAppender::new(
            store,
            config.audit_bucket.clone(),
            config.audit_prefix.clone(),
        )
        .with_mode(config.audit_write_mode)
        .with_retry(
            config.audit_max_attempts,
            Duration::from_millis(config.audit_retry_backoff_ms),
        );

        let metrics = MetricsEmitter::new(
            metrics_sink,
            config.metrics_namespace.clone(),
            config.metrics_feature_namespace.clone(),
        )
        .with_numeric_buckets(config.metrics_bucket_numeric);

        Self {
            config,
            prediction,
            encoder: FeatureEncoder::new(),
            audit_log: Arc::new(audit_log),
            metrics: Arc::new(metrics),
        }
    }

    /// Builds the storage and metrics backends named by the configuration.
    pub fn from_config(
        config: Config,
        prediction: Arc<PredictionService>,
    ) -> anyhow::Result<Self> {
        let store: Arc<dyn ObjectStore> = match config.storage_url {
            Some(ref url) => Arc::new(
                HttpObjectStore::new(url.clone(), config.storage_token.clone())
                    .map_err(|e| anyhow::anyhow!(e))?,
            ),
            None => Arc::new(InMemoryObjectStore::new()),
        };

        let metrics_sink: Arc<dyn MetricsSink> = match config.metrics_url {
            Some(ref url) => {
                Arc::new(HttpMetricsSink::new(url.clone()).map_err(|e| anyhow::anyhow!(e))?)
            }
            None => Arc::new(LogMetricsSink),
        };

        Ok(Self::new(config, prediction, store, metrics_sink))
    }

    fn on_sink_failure(&self, sink: &str, err: AppError) -> Result<(), AppError> {
        match self.config.sink_failure_policy {
            SinkFailurePolicy::Propagate => Err(err).context(format!("{} write failed", sink)),
            SinkFailurePolicy::LogAndContinue => {
                tracing::error!("{} write failed, serving prediction anyway: {}", sink, err);
                Ok(())
            }
        }
    }
}

/// Runs one invocation end to end: shape dispatch, encode, score, audit,
/// metrics, envelope.
pub async fn handle(
    state: &AppState,
    event: Value,
    context: Option<&InvocationContext>,
) -> Result<ResponseEnvelope, AppError> {
    let context = context.cloned().unwrap_or_default();
    let span = tracing::info_span!("invocation", request_id = %context.request_id);

    run_pipeline(state, event).instrument(span).await
}

async fn run_pipeline(state: &AppState, event: Value) -> Result<ResponseEnvelope, AppError> {
    tracing::debug!("Event: {}", event);

    let invocation = InvocationEvent::from_value(event)?;
    tracing::debug!("Invoked through {} shape", invocation.shape());

    let attrs = invocation.into_attributes()?;
    tracing::debug!("Attributes: {:?}", attrs);

    let vector = state.encoder.encode(&attrs)?;
    let prediction = state.prediction.score(&vector)?;
    let version = state.prediction.version();
    tracing::info!(
        "Prediction: {} ({}) with model {}",
        prediction.class_id,
        prediction.class().label(),
        version
    );

    if let Err(e) = state
        .audit_log
        .append(&attrs, prediction.class_id, version)
        .await
    {
        state.on_sink_failure("Audit log", e)?;
    }

    if let Err(e) = state.metrics.emit(&attrs, prediction.class_id).await {
        state.on_sink_failure("Metrics", e)?;
    }

    ResponseEnvelope::ok(&PredictionBody {
        prediction: prediction.class_id,
        version: version.to_string(),
    })
    .map_err(|e| AppError::InternalError(format!("Failed to encode response: {}", e)))
}

/// Health check endpoint.
///
/// Returns the service status, crate version and loaded model version.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "credit-score-api",
            "version": env!("CARGO_PKG_VERSION"),
            "model_version": state.prediction.version(),
        })),
    )
}

/// POST /invoke
///
/// Direct invocation: the request body is the raw event (either shape) and
/// the response is the envelope itself.
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    Json(event): Json<Value>,
) -> Result<Json<ResponseEnvelope>, AppError> {
    let envelope = handle(&state, event, None).await?;
    Ok(Json(envelope))
}

/// POST /predict
///
/// Gateway invocation: the request body is `{"data": {...}}`. It is wrapped
/// as a gateway event and the envelope is unpacked into the HTTP response.
pub async fn predict(State(state): State<Arc<AppState>>, body: String) -> Response {
    let event = json!({ "body": body });
    match handle(&state, event, None).await {
        Ok(envelope) => envelope_response(envelope),
        Err(e) => e.into_response(),
    }
}

fn envelope_response(envelope: ResponseEnvelope) -> Response {
    let status = StatusCode::from_u16(envelope.status_code).unwrap_or(StatusCode::OK);
    let mut response = (status, envelope.body).into_response();
    for (name, value) in envelope.headers.iter() {
        let (Ok(name), Ok(value)) = (
            header::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            tracing::warn!("Dropping invalid response header {}", name);
            continue;
        };
        response.headers_mut().insert(name, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::FEATURE_COUNT;
    use crate::metrics::InMemoryMetricsSink;
    use crate::models::ModelMetadata;
    use crate::prediction::ScoringModel;

    struct FixedModel(usize);

    impl ScoringModel for FixedModel {
        fn n_features(&self) -> usize {
            FEATURE_COUNT
        }

        fn predict(&self, _features: &[f64]) -> usize {
            self.0
        }
    }

    fn state() -> AppState {
        let prediction = PredictionService::new(
            Arc::new(FixedModel(1)),
            ModelMetadata {
                version: "test-1".to_string(),
                feature_names: None,
                sha256: None,
            },
        );
        AppState::new(
            Config::default(),
            Arc::new(prediction),
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(InMemoryMetricsSink::new()),
        )
    }

    #[tokio::test]
    async fn test_empty_event_is_missing_attribute() {
        match handle(&state(), json!({}), None).await {
            Err(AppError::MissingAttribute(name)) => assert_eq!(name, "age"),
            other => panic!("expected MissingAttribute, got {:?}", other),
        }
    }

    #[test]
    fn test_envelope_response_sets_content_type() {
        let envelope = ResponseEnvelope::ok(&PredictionBody {
            prediction: 2,
            version: "v".to_string(),
        })
        .unwrap();
        let response = envelope_response(envelope);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
