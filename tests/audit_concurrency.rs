/// Concurrency behaviour of the per-day audit dataset.
///
/// Two appenders that both read the day's blob before either writes show the
/// lost-update window of blind overwrites, and its absence with conditional
/// writes.
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use credit_score_api::audit_log::AuditLogAppender;
use credit_score_api::config::AuditWriteMode;
use credit_score_api::models::AttributeMap;
use credit_score_api::object_store::{
    InMemoryObjectStore, ObjectStore, StoreError, StoredObject, WriteCondition,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

/// Holds the first `gated` readers until all of them have read.
struct GatedStore {
    inner: InMemoryObjectStore,
    barrier: Barrier,
    gated: usize,
    reads: AtomicUsize,
}

impl GatedStore {
    fn new(gated: usize) -> Self {
        Self {
            inner: InMemoryObjectStore::new(),
            barrier: Barrier::new(gated),
            gated,
            reads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ObjectStore for GatedStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let result = self.inner.get(bucket, key).await;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.gated {
            self.barrier.wait().await;
        }
        result
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: String,
        condition: WriteCondition,
    ) -> Result<String, StoreError> {
        self.inner.put(bucket, key, body, condition).await
    }
}

fn request(id: usize) -> AttributeMap {
    json!({"customer": format!("c{}", id), "age": 30 + id})
        .as_object()
        .cloned()
        .unwrap()
}

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap()
}

fn appender(store: Arc<dyn ObjectStore>, mode: AuditWriteMode) -> AuditLogAppender {
    AuditLogAppender::new(store, "bucket".to_string(), "credit-scoring-data".to_string())
        .with_mode(mode)
        .with_retry(64, Duration::from_millis(1))
}

async fn data_lines(store: &InMemoryObjectStore, log: &AuditLogAppender) -> Vec<String> {
    let body = store
        .body("bucket", &log.day_key(noon()))
        .await
        .unwrap_or_default();
    body.split('\n').skip(1).map(str::to_string).collect()
}

#[tokio::test]
async fn test_serialized_appends_keep_arrival_order() {
    let store = Arc::new(InMemoryObjectStore::new());
    let log = appender(store.clone(), AuditWriteMode::Conditional);

    for id in 0..5 {
        log.append_at(&request(id), 1, "v1", noon()).await.unwrap();
    }

    let body = store.body("bucket", &log.day_key(noon())).await.unwrap();
    let lines: Vec<&str> = body.split('\n').collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "customer,age,price,timestamp,model_version");
    for (id, line) in lines[1..].iter().enumerate() {
        assert!(line.starts_with(&format!("c{},", id)), "line {} = {}", id, line);
    }
}

#[tokio::test]
async fn test_unconditional_writes_lose_an_update() {
    let store = Arc::new(GatedStore::new(2));
    let log = appender(store.clone(), AuditWriteMode::Unconditional);
    let (first, second) = (request(1), request(2));

    let (a, b) = tokio::join!(
        log.append_at(&first, 0, "v1", noon()),
        log.append_at(&second, 2, "v1", noon()),
    );
    a.unwrap();
    b.unwrap();

    // Both appenders saw an empty day; the second write replaced the first.
    let lines = data_lines(&store.inner, &log).await;
    assert_eq!(lines.len(), 1);
}

#[tokio::test]
async fn test_conditional_writes_keep_both_updates() {
    let store = Arc::new(GatedStore::new(2));
    let log = appender(store.clone(), AuditWriteMode::Conditional);
    let (first, second) = (request(1), request(2));

    let (a, b) = tokio::join!(
        log.append_at(&first, 0, "v1", noon()),
        log.append_at(&second, 2, "v1", noon()),
    );
    a.unwrap();
    b.unwrap();

    let mut lines = data_lines(&store.inner, &log).await;
    lines.sort();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("c1,"));
    assert!(lines[1].starts_with("c2,"));
}

#[tokio::test]
async fn test_conditional_writes_under_contention() {
    let store = Arc::new(InMemoryObjectStore::new());
    let log = Arc::new(appender(store.clone(), AuditWriteMode::Conditional));

    let handles: Vec<_> = (0..20)
        .map(|id| {
            let log = log.clone();
            tokio::spawn(async move {
                let attrs = request(id);
                log.append_at(&attrs, 1, "v1", noon()).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let lines = data_lines(&store, &log).await;
    assert_eq!(lines.len(), 20);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    /// Every conditional write loses the race.
    struct AlwaysConflicting;

    #[async_trait]
    impl ObjectStore for AlwaysConflicting {
        async fn get(&self, _: &str, _: &str) -> Result<Option<StoredObject>, StoreError> {
            Ok(None)
        }

        async fn put(
            &self,
            _: &str,
            _: &str,
            _: String,
            _: WriteCondition,
        ) -> Result<String, StoreError> {
            Err(StoreError::PreconditionFailed)
        }
    }

    let log = AuditLogAppender::new(
        Arc::new(AlwaysConflicting),
        "bucket".to_string(),
        "credit-scoring-data".to_string(),
    )
    .with_retry(3, Duration::from_millis(1));

    let err = log
        .append_at(&request(1), 1, "v1", noon())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("gave up after 3 conflicting writes"));
}
