//! Training loop for the linear classifier and regressor

use std::collections::BTreeSet;

use burn::optim::decay::WeightDecayConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::features::FeatureVector;
use crate::model::{LinearModel, ModelHead, ScoreNormalization, TrainedModel};
use crate::{FootballError, Result, TaskKind, TrainingConfig};

/// Range of the uniform initial weights
const INIT_SCALE: f32 = 0.01;

/// Training targets, one per feature vector
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    /// Outcome labels for classification
    Labels(Vec<String>),
    /// Numeric scores for regression
    Scores(Vec<f32>),
}

impl Targets {
    pub fn len(&self) -> usize {
        match self {
            Targets::Labels(l) => l.len(),
            Targets::Scores(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn task(&self) -> TaskKind {
        match self {
            Targets::Labels(_) => TaskKind::Classification,
            Targets::Scores(_) => TaskKind::Regression,
        }
    }
}

/// Fits a [`TrainedModel`] with seeded mini-batch SGD
pub struct Trainer<B: AutodiffBackend> {
    epochs: usize,
    batch_size: usize,
    learning_rate: f64,
    weight_decay: f64,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create a new trainer
    pub fn new(config: &TrainingConfig, device: B::Device) -> Self {
        Trainer {
            epochs: config.epochs,
            batch_size: config.batch_size,
            learning_rate: config.learning_rate,
            weight_decay: config.weight_decay,
            device,
        }
    }

    /// Fit a model over encoded features
    ///
    /// Identical features, targets and seed give bit-identical parameters.
    pub fn fit(
        &self,
        features: &[FeatureVector],
        targets: &Targets,
        seed: u64,
    ) -> Result<TrainedModel> {
        let (input_dim, fingerprint) = check_inputs(features, targets)?;

        let (head, rows, output_dim) = match targets {
            Targets::Labels(labels) => {
                let domain: Vec<String> = labels
                    .iter()
                    .cloned()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let k = domain.len();
                let mut rows = vec![0.0f32; labels.len() * k];
                for (i, label) in labels.iter().enumerate() {
                    // Domain is built from these labels, so the search cannot miss
                    if let Ok(j) = domain.binary_search(label) {
                        rows[i * k + j] = 1.0;
                    }
                }
                log::info!("Label domain: {:?}", domain);
                (ModelHead::Classification { labels: domain }, rows, k)
            }
            Targets::Scores(scores) => {
                if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
                    return Err(FootballError::Training(format!(
                        "regression target {} is not finite",
                        bad
                    )));
                }
                let normalization = ScoreNormalization::from_scores(scores);
                let rows = scores.iter().map(|&s| normalization.normalize(s)).collect();
                log::info!(
                    "Target normalization: mean={:.3}, std={:.3}",
                    normalization.mean,
                    normalization.std
                );
                (ModelHead::Regression { normalization }, rows, 1)
            }
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let init_weights: Vec<f32> = (0..input_dim * output_dim)
            .map(|_| rng.random_range(-INIT_SCALE..INIT_SCALE))
            .collect();
        let init_bias = vec![0.0f32; output_dim];
        let mut model = LinearModel::<B>::from_params(
            &self.device,
            input_dim,
            output_dim,
            &init_weights,
            &init_bias,
        );

        let mut sgd = SgdConfig::new();
        if self.weight_decay > 0.0 {
            sgd = sgd.with_weight_decay(Some(WeightDecayConfig::new(self.weight_decay as f32)));
        }
        let mut optimizer = sgd.init::<B, LinearModel<B>>();

        let n = features.len();
        let batch_size = if self.batch_size == 0 {
            n // Full batch
        } else {
            self.batch_size.min(n)
        };
        let inputs: Vec<f32> = features
            .iter()
            .flat_map(|f| f.values().iter().copied())
            .collect();
        let mut order: Vec<usize> = (0..n).collect();

        log::info!(
            "Training {} model: {} samples, {} features, {} outputs, {} epochs, batch size {}",
            targets.task(),
            n,
            input_dim,
            output_dim,
            self.epochs,
            batch_size
        );

        for epoch in 0..self.epochs {
            if batch_size < n {
                order.shuffle(&mut rng);
            }

            let mut epoch_loss = 0.0f64;
            for batch in order.chunks(batch_size) {
                let x = self.gather(&inputs, input_dim, batch);
                let y = self.gather(&rows, output_dim, batch);

                let output = model.forward(x);
                let loss = match &head {
                    ModelHead::Classification { .. } => cross_entropy(output, y),
                    ModelHead::Regression { .. } => (output - y).powf_scalar(2.0).mean(),
                };

                let loss_val: f32 = loss.clone().into_scalar().elem();
                if !loss_val.is_finite() {
                    return Err(FootballError::Training(format!(
                        "loss diverged at epoch {} (learning rate {} may be too high)",
                        epoch + 1,
                        self.learning_rate
                    )));
                }
                epoch_loss += loss_val as f64 * batch.len() as f64;

                // Backward pass
                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);

                // Update weights
                model = optimizer.step(self.learning_rate, model, grads);
            }

            if epoch % 10 == 0 || epoch == self.epochs - 1 {
                log::debug!(
                    "Epoch {}/{}: loss={:.4}",
                    epoch + 1,
                    self.epochs,
                    epoch_loss / n as f64
                );
            }
        }

        let (weights, bias) = model.params().map_err(FootballError::Training)?;
        Ok(TrainedModel::new(head, input_dim, fingerprint, weights, bias))
    }

    /// Build a [batch, width] tensor from the selected rows
    fn gather(&self, rows: &[f32], width: usize, batch: &[usize]) -> Tensor<B, 2> {
        let mut data = Vec::with_capacity(batch.len() * width);
        for &i in batch {
            data.extend_from_slice(&rows[i * width..(i + 1) * width]);
        }
        Tensor::<B, 2>::from_data(TensorData::new(data, [batch.len(), width]), &self.device)
    }
}

/// Mean negative log-likelihood of the one-hot targets under softmax
fn cross_entropy<B: AutodiffBackend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (log_probs * targets).sum_dim(1).mean().neg()
}

/// Validate training input, returning (input_dim, encoder fingerprint)
fn check_inputs(features: &[FeatureVector], targets: &Targets) -> Result<(usize, u32)> {
    let first = features
        .first()
        .ok_or_else(|| FootballError::Training("training set is empty".to_string()))?;
    if features.len() != targets.len() {
        return Err(FootballError::Training(format!(
            "{} feature vectors but {} targets",
            features.len(),
            targets.len()
        )));
    }

    let input_dim = first.len();
    let fingerprint = first.encoder_fingerprint();
    if input_dim == 0 {
        return Err(FootballError::Training(
            "feature vectors are empty".to_string(),
        ));
    }
    for (i, f) in features.iter().enumerate() {
        if f.len() != input_dim {
            return Err(FootballError::Training(format!(
                "feature vector {} has {} values, expected {}",
                i,
                f.len(),
                input_dim
            )));
        }
        if f.encoder_fingerprint() != fingerprint {
            return Err(FootballError::Training(format!(
                "feature vector {} was produced by encoder {:08x}, expected {:08x}",
                i,
                f.encoder_fingerprint(),
                fingerprint
            )));
        }
    }
    Ok((input_dim, fingerprint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{EncoderState, FeatureEncoder};
    use crate::{FeatureSpec, Field, MatchRecord, UnknownCategoryPolicy};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn trainer(config: &TrainingConfig) -> Trainer<TestBackend> {
        Trainer::new(config, Default::default())
    }

    fn encode(records: &[MatchRecord]) -> (EncoderState, Vec<FeatureVector>) {
        let state = FeatureEncoder::new(vec![
            FeatureSpec::one_hot(Field::HomeTeam),
            FeatureSpec::one_hot(Field::AwayTeam),
        ])
        .fit(records)
        .unwrap();
        let features =
            FeatureEncoder::transform_all(records, &state, UnknownCategoryPolicy::Fail).unwrap();
        (state, features)
    }

    fn results() -> (Vec<MatchRecord>, Targets) {
        let records = vec![
            MatchRecord::fixture("A", "B").with_result("H"),
            MatchRecord::fixture("A", "C").with_result("D"),
            MatchRecord::fixture("B", "C").with_result("A"),
        ];
        let labels = records.iter().map(|r| r.result.clone().unwrap()).collect();
        (records, Targets::Labels(labels))
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (records, targets) = results();
        let (_, features) = encode(&records);
        let config = TrainingConfig {
            batch_size: 2,
            ..TrainingConfig::default()
        };

        let a = trainer(&config).fit(&features, &targets, 0).unwrap();
        let b = trainer(&config).fit(&features, &targets, 0).unwrap();
        assert_eq!(a.weights(), b.weights());
        assert_eq!(a.bias(), b.bias());
        assert_eq!(a, b);
    }

    #[test]
    fn test_seed_changes_parameters() {
        let (records, targets) = results();
        let (_, features) = encode(&records);
        let config = TrainingConfig {
            epochs: 1,
            ..TrainingConfig::default()
        };

        let a = trainer(&config).fit(&features, &targets, 0).unwrap();
        let b = trainer(&config).fit(&features, &targets, 1).unwrap();
        assert_ne!(a.weights(), b.weights());
    }

    #[test]
    fn test_classifier_learns_training_set() {
        let (records, targets) = results();
        let (state, features) = encode(&records);
        let model = trainer(&TrainingConfig::default())
            .fit(&features, &targets, 0)
            .unwrap();

        assert_eq!(model.task(), TaskKind::Classification);
        assert_eq!(
            model.labels().unwrap(),
            &["A".to_string(), "D".to_string(), "H".to_string()]
        );
        assert_eq!(model.input_dim(), state.dimension());
        assert_eq!(model.encoder_fingerprint(), state.fingerprint());

        let probs = model.forward(&features).unwrap();
        // Each training row should favour its own label
        let expected = [2, 1, 0];
        for (row, want) in probs.iter().zip(expected) {
            let best = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap();
            assert_eq!(best, want, "probabilities {:?}", row);
        }
    }

    #[test]
    fn test_regressor_fits_scores() {
        let records = vec![
            MatchRecord::fixture("A", "B").with_score(3, 0),
            MatchRecord::fixture("B", "A").with_score(1, 1),
            MatchRecord::fixture("A", "C").with_score(3, 2),
            MatchRecord::fixture("C", "B").with_score(0, 2),
        ];
        let scores: Vec<f32> = records
            .iter()
            .map(|r| r.home_score.unwrap() as f32)
            .collect();
        let (_, features) = encode(&records);
        let config = TrainingConfig {
            epochs: 500,
            learning_rate: 0.1,
            weight_decay: 0.0,
            ..TrainingConfig::default()
        };
        let model = trainer(&config)
            .fit(&features, &Targets::Scores(scores.clone()), 3)
            .unwrap();

        assert_eq!(model.task(), TaskKind::Regression);
        let preds = model.forward(&features).unwrap();
        let mse: f32 = preds
            .iter()
            .zip(scores.iter())
            .map(|(p, s)| (p[0] - s).powi(2))
            .sum::<f32>()
            / scores.len() as f32;
        assert!(mse < 0.25, "mse {}", mse);
    }

    #[test]
    fn test_single_label_domain() {
        let records = vec![
            MatchRecord::fixture("A", "B"),
            MatchRecord::fixture("B", "A"),
        ];
        let (_, features) = encode(&records);
        let model = trainer(&TrainingConfig::default())
            .fit(&features, &Targets::Labels(vec!["H".into(), "H".into()]), 0)
            .unwrap();
        let probs = model.forward(&features).unwrap();
        assert!((probs[0][0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_empty_and_mismatched() {
        let t = trainer(&TrainingConfig::default());
        assert!(matches!(
            t.fit(&[], &Targets::Labels(vec![]), 0),
            Err(FootballError::Training(_))
        ));

        let (records, _) = results();
        let (_, features) = encode(&records);
        assert!(matches!(
            t.fit(&features, &Targets::Labels(vec!["H".into()]), 0),
            Err(FootballError::Training(_))
        ));
    }

    #[test]
    fn test_rejects_mixed_encoders() {
        let (records, targets) = results();
        let (_, mut features) = encode(&records);
        let mut other = records.clone();
        other.push(MatchRecord::fixture("Z", "Y"));
        let (_, foreign) = encode(&other);
        features[2] = foreign[0].clone();

        assert!(matches!(
            trainer(&TrainingConfig::default()).fit(&features, &targets, 0),
            Err(FootballError::Training(_))
        ));
    }

    #[test]
    fn test_rejects_non_finite_scores() {
        let (records, _) = results();
        let (_, features) = encode(&records);
        let targets = Targets::Scores(vec![1.0, f32::NAN, 2.0]);
        assert!(matches!(
            trainer(&TrainingConfig::default()).fit(&features, &targets, 0),
            Err(FootballError::Training(_))
        ));
    }
}
