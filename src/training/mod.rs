//! Model training and evaluation
//!
//! Seeded training loop, held-out metrics.

pub mod metrics;
pub mod trainer;

pub use metrics::{evaluate, ClassificationMetrics, EvaluationMetrics, RegressionMetrics};
pub use trainer::{Targets, Trainer};
