use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Raw customer attributes as received, in insertion order.
pub type AttributeMap = Map<String, Value>;

/// Credit score tier predicted by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CreditScoreClass {
    Good = 0,
    Standard = 1,
    Poor = 2,
}

impl CreditScoreClass {
    pub fn label(&self) -> &'static str {
        match self {
            CreditScoreClass::Good => "Good",
            CreditScoreClass::Standard => "Standard",
            CreditScoreClass::Poor => "Poor",
        }
    }
}

impl TryFrom<usize> for CreditScoreClass {
    type Error = usize;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CreditScoreClass::Good),
            1 => Ok(CreditScoreClass::Standard),
            2 => Ok(CreditScoreClass::Poor),
            other => Err(other),
        }
    }
}

/// Output of a single model invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PredictionResult {
    pub class_id: u8,
}

impl PredictionResult {
    pub fn class(&self) -> CreditScoreClass {
        match self.class_id {
            0 => CreditScoreClass::Good,
            1 => CreditScoreClass::Standard,
            _ => CreditScoreClass::Poor,
        }
    }
}

impl From<CreditScoreClass> for PredictionResult {
    fn from(class: CreditScoreClass) -> Self {
        Self {
            class_id: class as u8,
        }
    }
}

/// Sidecar metadata shipped next to the model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: String,
    /// Training-time column order, checked against the encoder at load.
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
    /// Hex SHA-256 of the artifact bytes.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// JSON body carried inside the response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionBody {
    pub prediction: u8,
    pub version: String,
}

/// Gateway-style response returned for every successful invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    /// `PredictionBody` serialized as a JSON string.
    pub body: String,
}

impl ResponseEnvelope {
    pub fn ok(body: &PredictionBody) -> Result<Self, serde_json::Error> {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        Ok(Self {
            status_code: 200,
            headers,
            body: serde_json::to_string(body)?,
        })
    }
}

/// Per-invocation metadata supplied by the caller's runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationContext {
    pub request_id: Uuid,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
        }
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Text form of an attribute value, shared by the audit log and metrics.
///
/// Strings are written verbatim, null as the empty string and compound
/// values as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
