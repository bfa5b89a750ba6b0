//! End-to-end train and evaluate stages over parsed records

use burn::backend::{Autodiff, NdArray};

use crate::features::FeatureEncoder;
use crate::model::ModelBundle;
use crate::training::{self, EvaluationMetrics, Targets, Trainer};
use crate::{
    Config, Field, FootballError, MatchRecord, Result, ScoreTarget, TaskKind,
    UnknownCategoryPolicy,
};

/// Backend used for fitting
pub type TrainingBackend = Autodiff<NdArray<f32>>;

/// Output of [`train`]
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub bundle: ModelBundle,
    /// Metrics on the training set itself
    pub training_metrics: EvaluationMetrics,
}

/// Extract the per-record training targets for a task
pub fn targets(records: &[MatchRecord], task: TaskKind, target: ScoreTarget) -> Result<Targets> {
    match task {
        TaskKind::Classification => {
            let labels = records
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    r.result.clone().ok_or_else(|| {
                        FootballError::schema(
                            Field::Result.name(),
                            format!("record {} has no result label", i),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Targets::Labels(labels))
        }
        TaskKind::Regression => {
            let scores = records
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    target.value(r).ok_or_else(|| {
                        FootballError::schema(
                            target.column().name(),
                            format!("record {} has no score", i),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Targets::Scores(scores))
        }
    }
}

fn leaks_target(config: &Config) -> bool {
    let target = config.training.regression_target;
    let used: &[Field] = match target {
        ScoreTarget::HomeScore => &[Field::HomeScore],
        ScoreTarget::AwayScore => &[Field::AwayScore],
        ScoreTarget::GoalDifference | ScoreTarget::TotalGoals => {
            &[Field::HomeScore, Field::AwayScore]
        }
    };
    config
        .features
        .columns
        .iter()
        .any(|spec| used.contains(&spec.field))
}

/// Fit the encoder and model on `records` and bundle them together
pub fn train(records: &[MatchRecord], config: &Config) -> Result<TrainingOutcome> {
    config.validate()?;
    if records.is_empty() {
        return Err(FootballError::Training("no training records".to_string()));
    }

    let task = config.training.task;
    let target = config.training.regression_target;
    if task == TaskKind::Regression && leaks_target(config) {
        log::warn!("Feature columns include the regression target {:?}", target);
    }

    let targets = targets(records, task, target)?;

    let encoder = FeatureEncoder::from_config(&config.features);
    let state = encoder.fit(records)?;
    log::info!(
        "Fitted encoder over {} records: {} columns, {} features",
        records.len(),
        state.columns().len(),
        state.dimension()
    );

    // Every training category is in the vocabulary, so the policy never triggers here
    let features =
        FeatureEncoder::transform_all(records, &state, UnknownCategoryPolicy::Fail)?;

    let trainer = Trainer::<TrainingBackend>::new(&config.training, Default::default());
    let model = trainer.fit(&features, &targets, config.training.seed)?;

    let training_metrics = training::evaluate(&model, &features, &targets)
        .map_err(|e| FootballError::Training(format!("training set evaluation failed: {}", e)))?;

    let bundle_target = match task {
        TaskKind::Classification => None,
        TaskKind::Regression => Some(target),
    };
    let bundle = ModelBundle::new(state, model, bundle_target)?;

    Ok(TrainingOutcome {
        bundle,
        training_metrics,
    })
}

/// Score a trained bundle against held-out records
pub fn evaluate(
    bundle: &ModelBundle,
    records: &[MatchRecord],
    config: &Config,
) -> Result<EvaluationMetrics> {
    if records.is_empty() {
        return Err(FootballError::Evaluation("test set is empty".to_string()));
    }

    let target = bundle
        .target
        .unwrap_or(config.training.regression_target);
    let targets = targets(records, bundle.task(), target)?;
    let features = FeatureEncoder::transform_all(
        records,
        &bundle.encoder,
        config.features.unknown_category_policy,
    )
    .map_err(|e| match e {
        FootballError::SchemaMismatch { column, message } => FootballError::Evaluation(format!(
            "test data does not match the model in column '{}': {}",
            column, message
        )),
        other => other,
    })?;

    training::evaluate(&bundle.model, &features, &targets)
}
