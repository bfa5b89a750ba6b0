//! Trained model parameters and persistence
//!
//! A [`TrainedModel`] is a plain parameter set; the burn [`LinearModel`] is
//! rebuilt from it whenever a forward pass is needed.

pub mod linear;
pub mod store;

pub use linear::LinearModel;
pub use store::ModelBundle;

use burn::backend::NdArray;
use burn::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};

use crate::features::FeatureVector;
use crate::TaskKind;

/// Backend used for evaluation and prediction
pub type InferenceBackend = NdArray<f32>;

/// Z-score normalization of a regression target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreNormalization {
    pub mean: f32,
    pub std: f32,
}

impl Default for ScoreNormalization {
    fn default() -> Self {
        ScoreNormalization {
            mean: 0.0,
            std: 1.0,
        }
    }
}

impl ScoreNormalization {
    /// Compute from training targets
    pub fn from_scores(scores: &[f32]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let n = scores.len() as f64;
        let mean = scores.iter().map(|&s| s as f64).sum::<f64>() / n;
        let var = scores
            .iter()
            .map(|&s| (s as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        ScoreNormalization {
            mean: mean as f32,
            std: var.sqrt().max(1e-3) as f32,
        }
    }

    pub fn normalize(&self, score: f32) -> f32 {
        (score - self.mean) / self.std
    }

    pub fn denormalize(&self, value: f32) -> f32 {
        value * self.std + self.mean
    }
}

/// Task-specific part of a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum ModelHead {
    /// Softmax over the frozen, sorted label domain
    Classification { labels: Vec<String> },
    /// Single normalized output
    Regression { normalization: ScoreNormalization },
}

/// Fitted linear model with its task metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    head: ModelHead,
    input_dim: usize,
    encoder_fingerprint: u32,
    /// Row-major [input_dim, output_dim]
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl TrainedModel {
    pub(crate) fn new(
        head: ModelHead,
        input_dim: usize,
        encoder_fingerprint: u32,
        weights: Vec<f32>,
        bias: Vec<f32>,
    ) -> Self {
        TrainedModel {
            head,
            input_dim,
            encoder_fingerprint,
            weights,
            bias,
        }
    }

    pub fn task(&self) -> TaskKind {
        match self.head {
            ModelHead::Classification { .. } => TaskKind::Classification,
            ModelHead::Regression { .. } => TaskKind::Regression,
        }
    }

    pub fn head(&self) -> &ModelHead {
        &self.head
    }

    /// Label domain of a classifier
    pub fn labels(&self) -> Option<&[String]> {
        match &self.head {
            ModelHead::Classification { labels } => Some(labels),
            ModelHead::Regression { .. } => None,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        match &self.head {
            ModelHead::Classification { labels } => labels.len(),
            ModelHead::Regression { .. } => 1,
        }
    }

    /// Fingerprint of the encoder the model was trained under
    pub fn encoder_fingerprint(&self) -> u32 {
        self.encoder_fingerprint
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// Rebuild the burn module on a device
    pub fn module<B: burn::tensor::backend::Backend>(&self, device: &B::Device) -> LinearModel<B> {
        LinearModel::from_params(
            device,
            self.input_dim,
            self.output_dim(),
            &self.weights,
            &self.bias,
        )
    }

    /// Check that a feature vector can be fed to this model
    pub fn check_input(&self, features: &FeatureVector) -> std::result::Result<(), String> {
        if features.len() != self.input_dim {
            return Err(format!(
                "expected {} features, got {}",
                self.input_dim,
                features.len()
            ));
        }
        if features.encoder_fingerprint() != self.encoder_fingerprint {
            return Err(format!(
                "features come from encoder {:08x} but the model was trained under {:08x}",
                features.encoder_fingerprint(),
                self.encoder_fingerprint
            ));
        }
        Ok(())
    }

    /// Check internal consistency of a deserialized model
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.input_dim == 0 {
            return Err("model has no inputs".to_string());
        }
        match &self.head {
            ModelHead::Classification { labels } => {
                if labels.is_empty() {
                    return Err("classifier has an empty label domain".to_string());
                }
                if labels.windows(2).any(|w| w[0] >= w[1]) {
                    return Err("label domain is not sorted".to_string());
                }
            }
            ModelHead::Regression { normalization } => {
                if !(normalization.std.is_finite() && normalization.std > 0.0) {
                    return Err(format!(
                        "invalid target standard deviation {}",
                        normalization.std
                    ));
                }
            }
        }
        let expected = self.input_dim * self.output_dim();
        if self.weights.len() != expected {
            return Err(format!(
                "expected {} weights, found {}",
                expected,
                self.weights.len()
            ));
        }
        if self.bias.len() != self.output_dim() {
            return Err(format!(
                "expected {} bias terms, found {}",
                self.output_dim(),
                self.bias.len()
            ));
        }
        Ok(())
    }

    /// Run the forward pass over already validated features
    ///
    /// # Returns
    /// One row per input: class probabilities for a classifier, the
    /// denormalized score for a regressor.
    pub fn forward(&self, features: &[FeatureVector]) -> std::result::Result<Vec<Vec<f32>>, String> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let device = Default::default();
        let model = self.module::<InferenceBackend>(&device);

        let data: Vec<f32> = features
            .iter()
            .flat_map(|f| f.values().iter().copied())
            .collect();
        let x = Tensor::<InferenceBackend, 2>::from_data(
            TensorData::new(data, [features.len(), self.input_dim]),
            &device,
        );

        let rows = match &self.head {
            ModelHead::Classification { labels } => {
                let probs = linear::tensor_values(model.probabilities(x))?;
                probs.chunks(labels.len()).map(|r| r.to_vec()).collect()
            }
            ModelHead::Regression { normalization } => {
                let out = linear::tensor_values(model.forward(x))?;
                out.iter()
                    .map(|&v| vec![normalization.denormalize(v)])
                    .collect()
            }
        };
        Ok(rows)
    }
}
