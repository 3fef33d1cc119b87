//! Classifier model interface
//!
//! The pipeline treats the model as an external, read-only collaborator: a
//! fixed schema (feature names + class set, decided at load time) and a
//! probability function over prepared vectors. `SoftmaxModel` is the shipped
//! implementation, a multinomial logistic regression exported to JSON by the
//! offline training tooling.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::flow::FEATURE_NAMES;

/// Model input/output contract, fixed at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Feature names in the order the model expects them.
    pub features: Vec<String>,
    /// Class labels in the model's output order.
    pub classes: Vec<String>,
}

impl ModelSchema {
    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Verify the schema against the pipeline's canonical feature ordering.
    /// A mismatch is fatal: the pipeline refuses to start on a model that
    /// expects different features.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.features.len() != FEATURE_NAMES.len()
            || self.features.iter().zip(FEATURE_NAMES).any(|(a, b)| a != b)
        {
            return Err(ModelError::SchemaMismatch {
                expected: FEATURE_NAMES.len(),
                actual: self.features.len(),
            });
        }
        if self.classes.len() < crate::core::TOP_K {
            return Err(ModelError::TooFewClasses(self.classes.len()));
        }
        Ok(())
    }
}

/// Model loading and inference failures.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("model schema does not match pipeline features (expected {expected}, got {actual})")]
    SchemaMismatch { expected: usize, actual: usize },
    #[error("model defines only {0} classes, need at least 3")]
    TooFewClasses(usize),
    #[error("input vector length {actual} does not match model schema {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("model weight matrix is malformed")]
    MalformedWeights,
}

/// A loaded classifier model. Read-only after load; accessed by the single
/// classifier worker only.
pub trait ClassifierModel: Send {
    /// The fixed input/output contract.
    fn schema(&self) -> &ModelSchema;

    /// Class probabilities for one prepared vector, aligned with
    /// `schema().classes`. Values are in [0, 1].
    fn predict_probabilities(&self, vector: &[f32]) -> Result<Vec<f32>, ModelError>;
}

/// Multinomial logistic regression loaded from a JSON artifact.
#[derive(Debug, Deserialize)]
pub struct SoftmaxModel {
    schema: ModelSchema,
    /// One weight row per class, each `schema.features.len()` long.
    weights: Vec<Vec<f32>>,
    /// One intercept per class.
    intercepts: Vec<f32>,
}

impl SoftmaxModel {
    /// Load and validate a model artifact. Any failure here is fatal for the
    /// session; the engine refuses to start without a usable model.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let file = File::open(path.as_ref())?;
        let model: SoftmaxModel = serde_json::from_reader(BufReader::new(file))?;
        model.check()?;
        info!(
            classes = model.schema.num_classes(),
            features = model.schema.num_features(),
            "loaded classifier model from {}",
            path.as_ref().display()
        );
        Ok(model)
    }

    /// Build from parts (used by tests and the training export tooling).
    pub fn from_parts(
        schema: ModelSchema,
        weights: Vec<Vec<f32>>,
        intercepts: Vec<f32>,
    ) -> Result<Self, ModelError> {
        let model = Self {
            schema,
            weights,
            intercepts,
        };
        model.check()?;
        Ok(model)
    }

    fn check(&self) -> Result<(), ModelError> {
        self.schema.validate()?;
        if self.weights.len() != self.schema.num_classes()
            || self.intercepts.len() != self.schema.num_classes()
            || self
                .weights
                .iter()
                .any(|row| row.len() != self.schema.num_features())
        {
            return Err(ModelError::MalformedWeights);
        }
        Ok(())
    }
}

impl ClassifierModel for SoftmaxModel {
    fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    fn predict_probabilities(&self, vector: &[f32]) -> Result<Vec<f32>, ModelError> {
        if vector.len() != self.schema.num_features() {
            return Err(ModelError::ShapeMismatch {
                expected: self.schema.num_features(),
                actual: vector.len(),
            });
        }

        let logits: Vec<f32> = self
            .weights
            .iter()
            .zip(&self.intercepts)
            .map(|(row, b)| row.iter().zip(vector).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect();

        // Softmax with max-shift for numeric stability
        let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        Ok(exps.into_iter().map(|e| e / sum).collect())
    }
}
