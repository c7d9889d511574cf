//! Per-day CSV dataset of every prediction, kept for drift analysis.
//!
//! Each day is one object, `<prefix>/<YYYY-MM-DD>_score_prediction_data.csv`.
//! The first line is the header written when the object was created; every
//! later append only adds a data line. Appends are read-modify-write of the
//! whole blob. In [`AuditWriteMode::Conditional`] the write is a
//! compare-and-swap on the version read, retried on conflict. In
//! [`AuditWriteMode::Unconditional`] two concurrent appenders that read the
//! same state overwrite each other and one record is lost.

use crate::config::AuditWriteMode;
use crate::errors::AppError;
use crate::models::{display_value, AttributeMap};
use crate::object_store::{ObjectStore, StoreError, WriteCondition};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct AuditLogAppender {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    mode: AuditWriteMode,
    max_attempts: u32,
    backoff: Duration,
}

impl AuditLogAppender {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: String, prefix: String) -> Self {
        Self {
            store,
            bucket,
            prefix,
            mode: AuditWriteMode::Conditional,
            max_attempts: 5,
            backoff: Duration::from_millis(25),
        }
    }

    pub fn with_mode(mut self, mode: AuditWriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bounded retry for conditional writes. `max_attempts` is clamped to 1.
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key holding the records for the day of `now`.
    pub fn day_key(&self, now: DateTime<Utc>) -> String {
        let file_name = format!("{}_score_prediction_data.csv", now.format("%Y-%m-%d"));
        if self.prefix.is_empty() {
            file_name
        } else {
            format!("{}/{}", self.prefix, file_name)
        }
    }

    pub async fn append(
        &self,
        attrs: &AttributeMap,
        prediction: u8,
        version: &str,
    ) -> Result<(), AppError> {
        self.append_at(attrs, prediction, version, Utc::now()).await
    }

    pub async fn append_at(
        &self,
        attrs: &AttributeMap,
        prediction: u8,
        version: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let key = self.day_key(now);
        let record = audit_record(attrs, prediction, version, now);
        let line = csv_line(record.values().map(display_value))?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let existing = self
                .store
                .get(&self.bucket, &key)
                .await
                .map_err(|e| AppError::StorageRead(format!("{}/{}: {}", self.bucket, key, e)))?;

            let (content, condition) = match existing {
                Some(object) if !object.body.trim().is_empty() => {
                    let condition = self.overwrite_condition(&key, object.version)?;
                    let mut lines: Vec<&str> = object.body.trim().split('\n').collect();
                    lines.push(&line);
                    (lines.join("\n"), condition)
                }
                Some(object) => {
                    tracing::warn!(
                        "Audit dataset {}/{} is empty, rewriting header",
                        self.bucket,
                        key
                    );
                    let condition = self.overwrite_condition(&key, object.version)?;
                    let header = csv_line(record.keys().cloned())?;
                    (format!("{}\n{}", header, line), condition)
                }
                None => {
                    tracing::info!("Starting new audit dataset {}/{}", self.bucket, key);
                    let header = csv_line(record.keys().cloned())?;
                    let condition = match self.mode {
                        AuditWriteMode::Conditional => WriteCondition::IfAbsent,
                        AuditWriteMode::Unconditional => WriteCondition::Unconditional,
                    };
                    (format!("{}\n{}", header, line), condition)
                }
            };

            match self.store.put(&self.bucket, &key, content, condition).await {
                Ok(_) => {
                    tracing::debug!("Audit record appended to {} (attempt {})", key, attempt);
                    return Ok(());
                }
                Err(StoreError::PreconditionFailed) if attempt < self.max_attempts => {
                    tracing::warn!(
                        "Audit dataset {} changed while appending, retrying (attempt {}/{})",
                        key,
                        attempt,
                        self.max_attempts
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(StoreError::PreconditionFailed) => {
                    return Err(AppError::StorageWrite(format!(
                        "{}/{}: gave up after {} conflicting writes",
                        self.bucket, key, attempt
                    )));
                }
                Err(StoreError::Backend(msg)) => {
                    return Err(AppError::StorageWrite(format!(
                        "{}/{}: {}",
                        self.bucket, key, msg
                    )));
                }
            }
        }
    }

    /// Precondition for replacing an object read at `version`.
    ///
    /// A conditional append needs a version token to compare against.
    fn overwrite_condition(
        &self,
        key: &str,
        version: Option<String>,
    ) -> Result<WriteCondition, AppError> {
        match (self.mode, version) {
            (AuditWriteMode::Unconditional, _) => Ok(WriteCondition::Unconditional),
            (AuditWriteMode::Conditional, Some(version)) => Ok(WriteCondition::IfVersion(version)),
            (AuditWriteMode::Conditional, None) => Err(AppError::StorageWrite(format!(
                "{}/{}: store returned no version token, cannot append conditionally",
                self.bucket, key
            ))),
        }
    }
}

/// Request attributes plus `price`, `timestamp` and `model_version`.
///
/// A derived key already present in the request keeps its position and
/// takes the derived value.
pub fn audit_record(
    attrs: &AttributeMap,
    prediction: u8,
    version: &str,
    now: DateTime<Utc>,
) -> AttributeMap {
    let mut record = attrs.clone();
    record.insert("price".to_string(), Value::from(prediction));
    record.insert(
        "timestamp".to_string(),
        Value::String(now.format("%d-%m-%Y %H:%M").to_string()),
    );
    record.insert(
        "model_version".to_string(),
        Value::String(version.to_string()),
    );
    record
}

/// One CSV line without terminator; fields are quoted only when needed.
fn csv_line<I>(fields: I) -> Result<String, AppError>
where
    I: IntoIterator<Item = String>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(Vec::new());
    writer
        .write_record(fields)
        .map_err(|e| AppError::InternalError(format!("Failed to render CSV line: {}", e)))?;
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::InternalError(format!("Failed to render CSV line: {}", e)))?;
    let line = String::from_utf8(bytes)
        .map_err(|e| AppError::InternalError(format!("CSV line is not UTF-8: {}", e)))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::InMemoryObjectStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn attrs(age: i64) -> AttributeMap {
        json!({"age": age, "credit_mix": "good", "payment_of_min_amount": "yes"})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 5, 0).unwrap()
    }

    fn appender(store: Arc<InMemoryObjectStore>) -> AuditLogAppender {
        AuditLogAppender::new(store, "bucket".to_string(), "credit-scoring-data".to_string())
    }

    #[test]
    fn test_day_key() {
        let log = appender(Arc::new(InMemoryObjectStore::new()));
        assert_eq!(
            log.day_key(at(7, 23)),
            "credit-scoring-data/2024-03-07_score_prediction_data.csv"
        );
    }

    #[test]
    fn test_record_keeps_insertion_order() {
        let record = audit_record(&attrs(30), 2, "v1", at(7, 9));
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "age",
                "credit_mix",
                "payment_of_min_amount",
                "price",
                "timestamp",
                "model_version"
            ]
        );
        assert_eq!(record["timestamp"], "07-03-2024 09:05");
    }

    #[test]
    fn test_derived_key_is_overwritten_in_place() {
        let mut input = attrs(30);
        input.insert("price".to_string(), json!(999));
        input.insert("zeta".to_string(), json!(1));
        let record = audit_record(&input, 1, "v1", at(7, 9));

        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys[3], "price");
        assert_eq!(keys[4], "zeta");
        assert_eq!(record["price"], 1);
    }

    #[tokio::test]
    async fn test_first_append_creates_header() {
        let store = Arc::new(InMemoryObjectStore::new());
        let log = appender(store.clone());

        log.append_at(&attrs(30), 1, "v1", at(7, 9)).await.unwrap();

        let body = store.body("bucket", &log.day_key(at(7, 9))).await.unwrap();
        assert_eq!(
            body,
            "age,credit_mix,payment_of_min_amount,price,timestamp,model_version\n\
             30,good,yes,1,07-03-2024 09:05,v1"
        );
    }

    #[tokio::test]
    async fn test_header_is_never_rewritten() {
        let store = Arc::new(InMemoryObjectStore::new());
        let log = appender(store.clone());

        log.append_at(&attrs(30), 1, "v1", at(7, 9)).await.unwrap();
        let mut wider = attrs(41);
        wider.insert("extra".to_string(), json!("x"));
        log.append_at(&wider, 0, "v1", at(7, 10)).await.unwrap();

        let body = store.body("bucket", &log.day_key(at(7, 9))).await.unwrap();
        let lines: Vec<&str> = body.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "age,credit_mix,payment_of_min_amount,price,timestamp,model_version"
        );
        assert_eq!(lines[2], "41,good,yes,x,0,07-03-2024 10:05,v1");
    }

    #[tokio::test]
    async fn test_days_are_separate_objects() {
        let store = Arc::new(InMemoryObjectStore::new());
        let log = appender(store.clone());

        log.append_at(&attrs(30), 1, "v1", at(7, 23)).await.unwrap();
        log.append_at(&attrs(31), 1, "v1", at(8, 0)).await.unwrap();

        assert_eq!(store.keys("bucket").await.len(), 2);
    }

    #[tokio::test]
    async fn test_blank_dataset_gets_header() {
        let store = Arc::new(InMemoryObjectStore::new());
        let log = appender(store.clone());
        let key = log.day_key(at(7, 9));
        store
            .put("bucket", &key, " \n".to_string(), WriteCondition::IfAbsent)
            .await
            .unwrap();

        log.append_at(&attrs(30), 1, "v1", at(7, 9)).await.unwrap();

        let body = store.body("bucket", &key).await.unwrap();
        assert_eq!(
            body,
            "age,credit_mix,payment_of_min_amount,price,timestamp,model_version\n\
             30,good,yes,1,07-03-2024 09:05,v1"
        );
    }

    #[tokio::test]
    async fn test_values_with_commas_are_quoted() {
        let store = Arc::new(InMemoryObjectStore::new());
        let log = appender(store.clone());
        let mut input = attrs(30);
        input.insert("note".to_string(), json!("late, twice"));

        log.append_at(&input, 2, "v1", at(7, 9)).await.unwrap();

        let body = store.body("bucket", &log.day_key(at(7, 9))).await.unwrap();
        assert!(body.ends_with("30,good,yes,\"late, twice\",2,07-03-2024 09:05,v1"));
    }
}
