use crate::errors::AppError;
use crate::models::AttributeMap;
use serde_json::Value;

/// The two front doors an invocation can come through.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationEvent {
    /// HTTP gateway: attributes sit under `data` inside a JSON-encoded `body`.
    Gateway { body: Value },
    /// Direct invocation: attributes sit under `data` on the event itself.
    Direct { event: Value },
}

impl InvocationEvent {
    /// Classifies a raw event. Any object carrying `body` is a gateway event.
    pub fn from_value(event: Value) -> Result<Self, AppError> {
        let Value::Object(mut fields) = event else {
            return Err(AppError::BadRequest(
                "Invocation event must be a JSON object".to_string(),
            ));
        };

        match fields.remove("body") {
            Some(Value::String(raw)) => {
                let body: Value = serde_json::from_str(&raw)?;
                Ok(InvocationEvent::Gateway { body })
            }
            Some(body @ Value::Object(_)) => Ok(InvocationEvent::Gateway { body }),
            Some(other) => Err(AppError::BadRequest(format!(
                "Gateway body must be a JSON string, got {}",
                json_type(&other)
            ))),
            None => Ok(InvocationEvent::Direct {
                event: Value::Object(fields),
            }),
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            InvocationEvent::Gateway { .. } => "gateway",
            InvocationEvent::Direct { .. } => "direct",
        }
    }

    /// The attribute map under `data`, empty when absent.
    pub fn into_attributes(self) -> Result<AttributeMap, AppError> {
        let container = match self {
            InvocationEvent::Gateway { body } => body,
            InvocationEvent::Direct { event } => event,
        };

        match container {
            Value::Object(mut fields) => match fields.remove("data") {
                None => Ok(AttributeMap::new()),
                Some(Value::Object(data)) => Ok(data),
                Some(other) => Err(AppError::BadRequest(format!(
                    "'data' must be a JSON object, got {}",
                    json_type(&other)
                ))),
            },
            other => Err(AppError::BadRequest(format!(
                "Gateway body must decode to a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
