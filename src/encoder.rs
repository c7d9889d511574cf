//! Attribute map to model input.
//!
//! The column order below is the training-time schema. Changing it silently
//! breaks every deployed model, so the full list is exposed through
//! [`FeatureVector::column_names`] and checked against the model sidecar at
//! startup.

use crate::errors::AppError;
use crate::models::AttributeMap;
use serde_json::Value;

/// Numeric coercion applied to a positional feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Int,
    Float,
}

impl NumericKind {
    fn name(&self) -> &'static str {
        match self {
            NumericKind::Int => "int",
            NumericKind::Float => "float",
        }
    }
}

pub const NUMERIC_FEATURES: [(&str, NumericKind); 16] = [
    ("age", NumericKind::Int),
    ("monthly_inhand_salary", NumericKind::Float),
    ("num_bank_accounts", NumericKind::Int),
    ("num_credit_card", NumericKind::Int),
    ("interest_rate", NumericKind::Float),
    ("num_of_loan", NumericKind::Int),
    ("delay_from_due_date", NumericKind::Int),
    ("num_of_delayed_payment", NumericKind::Int),
    ("num_credit_inquiries", NumericKind::Int),
    ("credit_utilization_ratio", NumericKind::Float),
    ("total_emi_per_month", NumericKind::Float),
    ("amount_invested_monthly", NumericKind::Float),
    ("monthly_balance", NumericKind::Float),
    ("outstanding_debt", NumericKind::Float),
    ("changed_credit_limit", NumericKind::Float),
    ("annual_income", NumericKind::Float),
];

pub const CATEGORICAL_FEATURES: [(&str, &[&str]); 3] = [
    (
        "payment_behaviour",
        &[
            "high_spent_large_value_payments",
            "high_spent_medium_value_payments",
            "high_spent_small_value_payments",
            "low_spent_large_value_payments",
            "low_spent_medium_value_payments",
            "low_spent_small_value_payments",
            "other",
        ],
    ),
    ("credit_mix", &["bad", "good", "standard", "other"]),
    ("payment_of_min_amount", &["yes", "no", "other"]),
];

/// Number of columns the model consumes.
pub const FEATURE_COUNT: usize = 30;

/// Ordered model input: numeric block, then one-hot blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    /// Wraps raw values without checking width; the prediction service does.
    pub fn from_raw(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical column names in vector order.
    ///
    /// One-hot columns are named `<attribute>_<category>`.
    pub fn column_names() -> Vec<String> {
        let mut names: Vec<String> = NUMERIC_FEATURES
            .iter()
            .map(|(name, _)| name.to_string())
            .collect();
        for (attribute, categories) in CATEGORICAL_FEATURES.iter() {
            names.extend(
                categories
                    .iter()
                    .map(|category| format!("{}_{}", attribute, category)),
            );
        }
        names
    }
}

/// Stateless encoder from [`AttributeMap`] to [`FeatureVector`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureEncoder;

impl FeatureEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, attrs: &AttributeMap) -> Result<FeatureVector, AppError> {
        let mut values = Vec::with_capacity(FEATURE_COUNT);

        for (name, kind) in NUMERIC_FEATURES.iter() {
            let raw = required(attrs, name)?;
            values.push(coerce(name, raw, *kind)?);
        }

        for (attribute, categories) in CATEGORICAL_FEATURES.iter() {
            let raw = required(attrs, attribute)?;
            // Non-string and unlisted values leave the whole block at zero.
            let matched = raw.as_str();
            values.extend(categories.iter().map(|category| {
                if matched == Some(*category) {
                    1.0
                } else {
                    0.0
                }
            }));
        }

        debug_assert_eq!(values.len(), FEATURE_COUNT);
        Ok(FeatureVector(values))
    }
}

fn required<'a>(attrs: &'a AttributeMap, name: &str) -> Result<&'a Value, AppError> {
    attrs
        .get(name)
        .ok_or_else(|| AppError::MissingAttribute(name.to_string()))
}

fn coerce(name: &str, raw: &Value, kind: NumericKind) -> Result<f64, AppError> {
    let coerced = match (kind, raw) {
        (_, Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        (NumericKind::Int, Value::Number(n)) => match n.as_i64() {
            Some(i) => Some(i as f64),
            None => n.as_f64().filter(|f| f.is_finite()).map(f64::trunc),
        },
        (NumericKind::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(|i| i as f64),
        (NumericKind::Float, Value::Number(n)) => n.as_f64(),
        (NumericKind::Float, Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    coerced.ok_or_else(|| AppError::TypeCoercion {
        attribute: name.to_string(),
        value: raw.to_string(),
        expected: kind.name(),
    })
}
