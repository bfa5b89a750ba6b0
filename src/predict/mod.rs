//! Prediction and inference
//!
//! Load trained model bundles and predict single fixtures.

pub mod inference;

pub use inference::{predict, PredictionResult, Predictor};
