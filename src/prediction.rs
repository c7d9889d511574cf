use crate::encoder::{FeatureVector, FEATURE_COUNT};
use crate::errors::AppError;
use crate::models::{CreditScoreClass, ModelMetadata, PredictionResult};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A trained classifier as seen by the serving path.
///
/// `predict` returns a class index and is only called with vectors whose
/// width equals `n_features`.
pub trait ScoringModel: Send + Sync {
    fn n_features(&self) -> usize;

    fn predict(&self, features: &[f64]) -> usize;
}

/// Multinomial linear classifier: one weight row and intercept per class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

impl LinearModel {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.coefficients.len() != 3 {
            anyhow::bail!(
                "Model must have 3 classes, found {} coefficient rows",
                self.coefficients.len()
            );
        }
        if self.intercepts.len() != self.coefficients.len() {
            anyhow::bail!(
                "Model has {} intercepts for {} classes",
                self.intercepts.len(),
                self.coefficients.len()
            );
        }
        let width = self.coefficients[0].len();
        if width == 0 {
            anyhow::bail!("Model coefficient rows are empty");
        }
        for (idx, row) in self.coefficients.iter().enumerate() {
            if row.len() != width {
                anyhow::bail!(
                    "Coefficient row {} has {} weights, expected {}",
                    idx,
                    row.len(),
                    width
                );
            }
        }
        Ok(())
    }
}

impl ScoringModel for LinearModel {
    fn n_features(&self) -> usize {
        self.coefficients.first().map(Vec::len).unwrap_or(0)
    }

    fn predict(&self, features: &[f64]) -> usize {
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (class, (row, intercept)) in self
            .coefficients
            .iter()
            .zip(self.intercepts.iter())
            .enumerate()
        {
            let score = row
                .iter()
                .zip(features.iter())
                .fold(*intercept, |acc, (w, x)| acc + w * x);
            // Strict comparison keeps the lowest index on ties.
            if score > best_score {
                best = class;
                best_score = score;
            }
        }
        best
    }
}

/// Loaded model plus its metadata, shared read-only by every request.
#[derive(Clone)]
pub struct PredictionService {
    model: Arc<dyn ScoringModel>,
    metadata: ModelMetadata,
}

impl PredictionService {
    pub fn new(model: Arc<dyn ScoringModel>, metadata: ModelMetadata) -> Self {
        Self { model, metadata }
    }

    /// Loads the linear model artifact and its JSON sidecar.
    ///
    /// Fails if the sidecar checksum or column list disagrees with what is
    /// on disk and in the encoder, or if the model width is not
    /// [`FEATURE_COUNT`].
    pub fn load(
        model_path: impl AsRef<Path>,
        metadata_path: impl AsRef<Path>,
    ) -> anyhow::Result<Self> {
        let model_path = model_path.as_ref();
        let metadata_path = metadata_path.as_ref();

        let metadata_raw = std::fs::read_to_string(metadata_path)
            .with_context(|| format!("reading model metadata {}", metadata_path.display()))?;
        let metadata: ModelMetadata = serde_json::from_str(&metadata_raw)
            .with_context(|| format!("parsing model metadata {}", metadata_path.display()))?;

        let artifact = std::fs::read(model_path)
            .with_context(|| format!("reading model artifact {}", model_path.display()))?;

        if let Some(ref expected) = metadata.sha256 {
            let computed = compute_checksum(&artifact);
            if !computed.eq_ignore_ascii_case(expected.trim()) {
                anyhow::bail!(
                    "Model artifact checksum mismatch: metadata says {}, artifact hashes to {}",
                    expected,
                    computed
                );
            }
            tracing::debug!("Model artifact checksum verified: {}", computed);
        }

        if let Some(ref names) = metadata.feature_names {
            let expected = FeatureVector::column_names();
            if *names != expected {
                let first_diff = names
                    .iter()
                    .zip(expected.iter())
                    .position(|(a, b)| a != b)
                    .unwrap_or_else(|| names.len().min(expected.len()));
                anyhow::bail!(
                    "Model was trained on a different column order (first difference at column {})",
                    first_diff
                );
            }
        }

        let model: LinearModel = serde_json::from_slice(&artifact)
            .with_context(|| format!("parsing model artifact {}", model_path.display()))?;
        model.validate()?;

        if model.n_features() != FEATURE_COUNT {
            anyhow::bail!(
                "Model expects {} features, encoder produces {}",
                model.n_features(),
                FEATURE_COUNT
            );
        }

        tracing::info!(
            "Model version {} loaded from {}",
            metadata.version,
            model_path.display()
        );

        Ok(Self::new(Arc::new(model), metadata))
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn score(&self, vector: &FeatureVector) -> Result<PredictionResult, AppError> {
        let expected = self.model.n_features();
        if vector.len() != expected {
            tracing::error!(
                "Refusing to score vector of width {} with model of width {}",
                vector.len(),
                expected
            );
            return Err(AppError::ShapeMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let class_index = self.model.predict(vector.as_slice());
        let class = CreditScoreClass::try_from(class_index).map_err(|idx| {
            AppError::InternalError(format!("Model returned unknown class index {}", idx))
        })?;

        Ok(PredictionResult::from(class))
    }
}

impl fmt::Debug for PredictionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictionService")
            .field("metadata", &self.metadata)
            .field("n_features", &self.model.n_features())
            .finish()
    }
}

/// Hex SHA-256 of an artifact.
pub fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
