//! Held-out evaluation metrics

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::features::FeatureVector;
use crate::model::{ModelHead, TrainedModel};
use crate::training::trainer::Targets;
use crate::{FootballError, Result};

/// Probabilities are clamped to [EPS, 1 - EPS] before taking logs
const LOG_LOSS_EPS: f64 = 1e-15;

/// Multi-class classification quality
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationMetrics {
    /// Fraction of correct predictions
    pub micro_accuracy: f64,
    /// Unweighted mean of per-class accuracy over classes in the test set
    pub macro_accuracy: f64,
    /// Mean negative log-probability of the true class
    pub log_loss: f64,
    /// Improvement of log loss over predicting the test label frequencies
    pub log_loss_reduction: f64,
}

/// Regression quality
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionMetrics {
    pub r_squared: f64,
    pub root_mean_squared_error: f64,
    pub mean_absolute_error: f64,
}

/// Metrics appropriate to the model's task
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum EvaluationMetrics {
    Classification(ClassificationMetrics),
    Regression(RegressionMetrics),
}

impl fmt::Display for ClassificationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MicroAccuracy: {:.3} | MacroAccuracy: {:.3} | LogLoss: {:.3} | LogLossReduction: {:.3}",
            self.micro_accuracy, self.macro_accuracy, self.log_loss, self.log_loss_reduction
        )
    }
}

impl fmt::Display for RegressionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "R²: {:.3} | RMSE: {:.3} | MAE: {:.3}",
            self.r_squared, self.root_mean_squared_error, self.mean_absolute_error
        )
    }
}

impl fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationMetrics::Classification(m) => m.fmt(f),
            EvaluationMetrics::Regression(m) => m.fmt(f),
        }
    }
}

/// Score a fitted model on held-out encoded data
pub fn evaluate(
    model: &TrainedModel,
    features: &[FeatureVector],
    targets: &Targets,
) -> Result<EvaluationMetrics> {
    if features.is_empty() {
        return Err(FootballError::Evaluation("test set is empty".to_string()));
    }
    if features.len() != targets.len() {
        return Err(FootballError::Evaluation(format!(
            "{} feature vectors but {} targets",
            features.len(),
            targets.len()
        )));
    }
    if targets.task() != model.task() {
        return Err(FootballError::Evaluation(format!(
            "{} targets given to a {} model",
            targets.task(),
            model.task()
        )));
    }
    for (i, f) in features.iter().enumerate() {
        model
            .check_input(f)
            .map_err(|e| FootballError::Evaluation(format!("test vector {}: {}", i, e)))?;
    }

    let outputs = model.forward(features).map_err(FootballError::Evaluation)?;

    let metrics = match (model.head(), targets) {
        (ModelHead::Classification { labels }, Targets::Labels(truth)) => {
            EvaluationMetrics::Classification(classification_metrics(labels, &outputs, truth))
        }
        (ModelHead::Regression { .. }, Targets::Scores(truth)) => {
            let predictions: Vec<f32> = outputs.iter().map(|row| row[0]).collect();
            EvaluationMetrics::Regression(regression_metrics(&predictions, truth))
        }
        _ => unreachable!("task kinds were checked above"),
    };

    log::info!("Evaluated {} samples: {}", features.len(), metrics);
    Ok(metrics)
}

/// Compute classification metrics from per-row probabilities over `labels`
pub fn classification_metrics(
    labels: &[String],
    probabilities: &[Vec<f32>],
    truth: &[String],
) -> ClassificationMetrics {
    let n = truth.len() as f64;
    let mut correct = 0usize;
    let mut log_loss = 0.0f64;
    // class -> (correct, total)
    let mut per_class: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

    for (row, actual) in probabilities.iter().zip(truth) {
        let predicted = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| labels[i].as_str());
        let hit = predicted == Some(actual.as_str());

        let entry = per_class.entry(actual.as_str()).or_insert((0, 0));
        entry.1 += 1;
        if hit {
            correct += 1;
            entry.0 += 1;
        }

        // A label outside the domain gets probability zero
        let p_true = labels
            .iter()
            .position(|l| l == actual)
            .map(|i| row[i] as f64)
            .unwrap_or(0.0);
        log_loss -= p_true.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS).ln();
    }
    log_loss /= n;

    let macro_accuracy = per_class
        .values()
        .map(|&(c, t)| c as f64 / t as f64)
        .sum::<f64>()
        / per_class.len() as f64;

    let prior_log_loss: f64 = per_class
        .values()
        .map(|&(_, t)| {
            let p = t as f64 / n;
            -p * p.ln()
        })
        .sum();
    let log_loss_reduction = if prior_log_loss > 0.0 {
        1.0 - log_loss / prior_log_loss
    } else {
        0.0
    };

    ClassificationMetrics {
        micro_accuracy: correct as f64 / n,
        macro_accuracy,
        log_loss,
        log_loss_reduction,
    }
}

/// Compute regression metrics from predictions and true scores
pub fn regression_metrics(predictions: &[f32], truth: &[f32]) -> RegressionMetrics {
    let n = truth.len() as f64;
    let mean = truth.iter().map(|&t| t as f64).sum::<f64>() / n;

    let mut ss_res = 0.0f64;
    let mut ss_tot = 0.0f64;
    let mut abs_err = 0.0f64;
    for (&p, &t) in predictions.iter().zip(truth) {
        let residual = t as f64 - p as f64;
        ss_res += residual * residual;
        ss_tot += (t as f64 - mean).powi(2);
        abs_err += residual.abs();
    }

    // Constant targets: only a perfect fit explains them
    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    RegressionMetrics {
        r_squared,
        root_mean_squared_error: (ss_res / n).sqrt(),
        mean_absolute_error: abs_err / n,
    }
}
