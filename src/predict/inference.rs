//! Model inference for predictions

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::features::FeatureEncoder;
use crate::model::{store, ModelBundle, ModelHead};
use crate::{FootballError, MatchRecord, Result, UnknownCategoryPolicy};

/// Outcome of a single prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionResult {
    /// Most probable label, with the probability of every label in the domain
    Label {
        label: String,
        probabilities: Vec<(String, f32)>,
    },
    Score { value: f32 },
}

impl PredictionResult {
    pub fn label(&self) -> Option<&str> {
        match self {
            PredictionResult::Label { label, .. } => Some(label),
            PredictionResult::Score { .. } => None,
        }
    }

    pub fn score(&self) -> Option<f32> {
        match self {
            PredictionResult::Label { .. } => None,
            PredictionResult::Score { value } => Some(*value),
        }
    }

    /// Probability of the predicted label
    pub fn confidence(&self) -> Option<f32> {
        match self {
            PredictionResult::Label {
                label,
                probabilities,
            } => probabilities
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, p)| *p),
            PredictionResult::Score { .. } => None,
        }
    }
}

impl fmt::Display for PredictionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionResult::Label {
                label,
                probabilities,
            } => {
                write!(f, "{}", label)?;
                let parts: Vec<String> = probabilities
                    .iter()
                    .map(|(l, p)| format!("{}: {:.1}%", l, p * 100.0))
                    .collect();
                write!(f, " ({})", parts.join(", "))
            }
            PredictionResult::Score { value } => write!(f, "{:.2}", value),
        }
    }
}

/// Predict one record with a loaded bundle
pub fn predict(
    bundle: &ModelBundle,
    record: &MatchRecord,
    policy: UnknownCategoryPolicy,
) -> Result<PredictionResult> {
    let features = FeatureEncoder::transform(record, &bundle.encoder, policy)?;
    bundle
        .model
        .check_input(&features)
        .map_err(|message| FootballError::mismatch("features", message))?;

    let outputs = bundle
        .model
        .forward(std::slice::from_ref(&features))
        .map_err(|message| FootballError::mismatch("features", message))?;
    let row = outputs
        .into_iter()
        .next()
        .ok_or_else(|| FootballError::mismatch("features", "model produced no output"))?;

    let result = match bundle.model.head() {
        ModelHead::Classification { labels } => {
            let best = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .ok_or_else(|| FootballError::mismatch("features", "empty label domain"))?;
            PredictionResult::Label {
                label: labels[best].clone(),
                probabilities: labels.iter().cloned().zip(row.iter().copied()).collect(),
            }
        }
        ModelHead::Regression { .. } => PredictionResult::Score { value: row[0] },
    };

    log::debug!(
        "{} vs {}: {}",
        record.home_team.as_str(),
        record.away_team.as_str(),
        result
    );
    Ok(result)
}

/// Serves predictions from a persisted model bundle
pub struct Predictor {
    bundle: ModelBundle,
    policy: UnknownCategoryPolicy,
}

impl Predictor {
    /// Create a predictor with an explicit unknown-category policy
    pub fn new(bundle: ModelBundle, policy: UnknownCategoryPolicy) -> Self {
        Predictor { bundle, policy }
    }

    /// Load predictor from a saved artifact
    pub fn load(path: impl AsRef<Path>, policy: UnknownCategoryPolicy) -> Result<Self> {
        Ok(Self::new(store::load(path)?, policy))
    }

    /// Predict a single match
    pub fn predict(&self, record: &MatchRecord) -> Result<PredictionResult> {
        predict(&self.bundle, record, self.policy)
    }

    /// Predict several matches; a failing record does not affect the others
    pub fn predict_batch(&self, records: &[MatchRecord]) -> Vec<Result<PredictionResult>> {
        records.iter().map(|r| self.predict(r)).collect()
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    pub fn policy(&self) -> UnknownCategoryPolicy {
        self.policy
    }
}
