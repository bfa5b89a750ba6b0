//! Football match prediction
//!
//! Trains, evaluates, persists and serves linear models that predict either the
//! full-time result of a match or a numeric score from historical results.

pub mod data;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod training;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque team identifier as it appears in the source data
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TeamId(pub String);

impl TeamId {
    pub fn new(id: impl Into<String>) -> Self {
        TeamId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Team({})", self.0)
    }
}

/// Semantic type of a record column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Identifier,
    Numeric,
    Date,
    Label,
}

/// The fields of a [`MatchRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    HomeTeam,
    AwayTeam,
    MatchDate,
    HomeScore,
    AwayScore,
    Result,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::HomeTeam,
        Field::AwayTeam,
        Field::MatchDate,
        Field::HomeScore,
        Field::AwayScore,
        Field::Result,
    ];

    /// Column name used in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            Field::HomeTeam => "home_team",
            Field::AwayTeam => "away_team",
            Field::MatchDate => "match_date",
            Field::HomeScore => "home_score",
            Field::AwayScore => "away_score",
            Field::Result => "result",
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Field::HomeTeam | Field::AwayTeam => ColumnKind::Identifier,
            Field::MatchDate => ColumnKind::Date,
            Field::HomeScore | Field::AwayScore => ColumnKind::Numeric,
            Field::Result => ColumnKind::Label,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single historical (or upcoming) match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub home_team: TeamId,
    pub away_team: TeamId,
    pub match_date: Option<NaiveDate>,
    pub home_score: Option<u16>,
    pub away_score: Option<u16>,
    /// Full-time result label, e.g. `H`, `D` or `A`
    pub result: Option<String>,
}

impl MatchRecord {
    /// Fixture with only the two teams known
    pub fn fixture(home: impl Into<String>, away: impl Into<String>) -> Self {
        MatchRecord {
            home_team: TeamId::new(home),
            away_team: TeamId::new(away),
            match_date: None,
            home_score: None,
            away_score: None,
            result: None,
        }
    }

    /// Attach a result label
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Attach the final score
    pub fn with_score(mut self, home: u16, away: u16) -> Self {
        self.home_score = Some(home);
        self.away_score = Some(away);
        self
    }

    /// Attach the match date
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.match_date = Some(date);
        self
    }

    /// Score margin (positive = home win), if the score is known
    pub fn goal_difference(&self) -> Option<i32> {
        Some(self.home_score? as i32 - self.away_score? as i32)
    }

    /// Total goals scored, if the score is known
    pub fn total_goals(&self) -> Option<u32> {
        Some(self.home_score? as u32 + self.away_score? as u32)
    }

    /// Textual form of a field, used as the category key for one-hot encoding
    pub fn category(&self, field: Field) -> Option<String> {
        match field {
            Field::HomeTeam => Some(self.home_team.0.clone()),
            Field::AwayTeam => Some(self.away_team.0.clone()),
            Field::MatchDate => self.match_date.map(|d| d.format("%Y-%m-%d").to_string()),
            Field::HomeScore => self.home_score.map(|s| s.to_string()),
            Field::AwayScore => self.away_score.map(|s| s.to_string()),
            Field::Result => self.result.clone(),
        }
    }

    /// Numeric form of a field; dates are days since the Common Era
    pub fn numeric(&self, field: Field) -> Option<f64> {
        use chrono::Datelike;

        match field {
            Field::MatchDate => self.match_date.map(|d| d.num_days_from_ce() as f64),
            Field::HomeScore => self.home_score.map(f64::from),
            Field::AwayScore => self.away_score.map(f64::from),
            Field::HomeTeam | Field::AwayTeam | Field::Result => None,
        }
    }
}

/// What the model predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Classification,
    Regression,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Classification => write!(f, "classification"),
            TaskKind::Regression => write!(f, "regression"),
        }
    }
}

/// Numeric quantity predicted by a regression model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTarget {
    HomeScore,
    AwayScore,
    GoalDifference,
    TotalGoals,
}

impl ScoreTarget {
    /// Extract the target value from a record
    pub fn value(&self, record: &MatchRecord) -> Option<f32> {
        match self {
            ScoreTarget::HomeScore => record.home_score.map(f32::from),
            ScoreTarget::AwayScore => record.away_score.map(f32::from),
            ScoreTarget::GoalDifference => record.goal_difference().map(|d| d as f32),
            ScoreTarget::TotalGoals => record.total_goals().map(|t| t as f32),
        }
    }

    /// Column reported when the target cannot be computed
    pub fn column(&self) -> Field {
        match self {
            ScoreTarget::HomeScore | ScoreTarget::GoalDifference | ScoreTarget::TotalGoals => {
                Field::HomeScore
            }
            ScoreTarget::AwayScore => Field::AwayScore,
        }
    }
}

/// Behaviour when a category was never seen during training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCategoryPolicy {
    /// Leave the column's one-hot block all zero
    ZeroVector,
    /// Reject the record with [`FootballError::UnknownCategory`]
    Fail,
}

impl fmt::Display for UnknownCategoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownCategoryPolicy::ZeroVector => write!(f, "zero_vector"),
            UnknownCategoryPolicy::Fail => write!(f, "fail"),
        }
    }
}

/// How a feature column is turned into numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnEncoding {
    OneHot,
    /// Standardised raw value
    Passthrough,
}

/// One feature column of the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub field: Field,
    pub encoding: ColumnEncoding,
}

impl FeatureSpec {
    pub fn one_hot(field: Field) -> Self {
        FeatureSpec {
            field,
            encoding: ColumnEncoding::OneHot,
        }
    }

    pub fn passthrough(field: Field) -> Self {
        FeatureSpec {
            field,
            encoding: ColumnEncoding::Passthrough,
        }
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum FootballError {
    #[error("Schema error{} in column '{column}': {message}", .line.map(|l| format!(" on line {}", l)).unwrap_or_default())]
    Schema {
        line: Option<u64>,
        column: String,
        message: String,
    },

    #[error("Unknown category '{value}' in column '{column}'")]
    UnknownCategory { column: String, value: String },

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Corrupt model artifact{}: {message}", .version.map(|v| format!(" (version {})", v)).unwrap_or_default())]
    CorruptArtifact { version: Option<u32>, message: String },

    #[error("Record does not match model in column '{column}': {message}")]
    SchemaMismatch { column: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl FootballError {
    pub(crate) fn schema(column: impl Into<String>, message: impl Into<String>) -> Self {
        FootballError::Schema {
            line: None,
            column: column.into(),
            message: message.into(),
        }
    }

    pub(crate) fn mismatch(column: impl Into<String>, message: impl Into<String>) -> Self {
        FootballError::SchemaMismatch {
            column: column.into(),
            message: message.into(),
        }
    }

    pub(crate) fn corrupt(version: Option<u32>, message: impl Into<String>) -> Self {
        FootballError::CorruptArtifact {
            version,
            message: message.into(),
        }
    }

    /// Process exit code for the command line
    pub fn exit_code(&self) -> i32 {
        match self {
            FootballError::Schema { .. } => 2,
            FootballError::UnknownCategory { .. } => 3,
            FootballError::Training(_) => 4,
            FootballError::Evaluation(_) => 5,
            FootballError::CorruptArtifact { .. } => 6,
            FootballError::SchemaMismatch { .. } => 7,
            FootballError::Config(_) => 8,
            FootballError::Io(_) | FootballError::Csv(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, FootballError>;

/// Application configuration loaded from football.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub training: TrainingConfig,
    pub features: FeatureConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub task: TaskKind,
    pub seed: u64,
    pub epochs: usize,
    /// Mini-batch size, 0 for full batch
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Only used for regression
    pub regression_target: ScoreTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub unknown_category_policy: UnknownCategoryPolicy,
    pub columns: Vec<FeatureSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub has_header: bool,
    pub delimiter: char,
    pub columns: ColumnLayout,
}

/// Zero-based position of each field in an input row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnLayout {
    pub home_team: usize,
    pub away_team: usize,
    pub match_date: Option<usize>,
    pub home_score: Option<usize>,
    pub away_score: Option<usize>,
    pub result: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            task: TaskKind::Classification,
            seed: 0,
            epochs: 200,
            batch_size: 0,
            learning_rate: 0.5,
            weight_decay: 1e-4,
            regression_target: ScoreTarget::HomeScore,
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            unknown_category_policy: UnknownCategoryPolicy::ZeroVector,
            columns: vec![
                FeatureSpec::one_hot(Field::HomeTeam),
                FeatureSpec::one_hot(Field::AwayTeam),
            ],
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            has_header: true,
            delimiter: ',',
            columns: ColumnLayout::default(),
        }
    }
}

impl Default for ColumnLayout {
    fn default() -> Self {
        ColumnLayout {
            home_team: 0,
            away_team: 1,
            match_date: Some(2),
            home_score: Some(3),
            away_score: Some(4),
            result: Some(5),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FootballError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| FootballError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FootballError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject feature and data settings that cannot produce a model
    pub fn validate(&self) -> Result<()> {
        if self.features.columns.is_empty() {
            return Err(FootballError::Config(
                "at least one feature column is required".to_string(),
            ));
        }

        let mut seen = Vec::with_capacity(self.features.columns.len());
        for spec in &self.features.columns {
            if seen.contains(&spec.field) {
                return Err(FootballError::Config(format!(
                    "feature column '{}' is listed twice",
                    spec.field
                )));
            }
            seen.push(spec.field);

            match (spec.field.kind(), spec.encoding) {
                (ColumnKind::Label, _) => {
                    return Err(FootballError::Config(format!(
                        "label column '{}' cannot be a feature",
                        spec.field
                    )))
                }
                (ColumnKind::Identifier, ColumnEncoding::Passthrough) => {
                    return Err(FootballError::Config(format!(
                        "identifier column '{}' only supports one_hot encoding",
                        spec.field
                    )))
                }
                _ => {}
            }
        }

        if !self.data.delimiter.is_ascii() {
            return Err(FootballError::Config(format!(
                "delimiter '{}' must be a single ASCII character",
                self.data.delimiter
            )));
        }
        if self.training.epochs == 0 {
            return Err(FootballError::Config("epochs must be positive".to_string()));
        }
        if self.training.learning_rate.is_nan() || self.training.learning_rate <= 0.0 {
            return Err(FootballError::Config(
                "learning_rate must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
