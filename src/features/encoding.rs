//! Categorical and numeric feature encoding
//!
//! An [`EncoderState`] is fitted once from training records and then frozen.
//! One-hot blocks are laid out in feature-column order; within a block the
//! categories are sorted so the layout does not depend on row order.

use serde::{Deserialize, Serialize};

use crate::{
    ColumnEncoding, FeatureConfig, FeatureSpec, Field, FootballError, MatchRecord, Result,
    UnknownCategoryPolicy,
};

/// Smallest standard deviation used to scale a passthrough column
const MIN_STD: f64 = 0.001;

/// One encoded column of a fitted encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum EncodedColumn {
    OneHot {
        field: Field,
        offset: usize,
        /// Sorted categories; the position is the index within the block
        categories: Vec<String>,
    },
    Passthrough {
        field: Field,
        offset: usize,
        mean: f32,
        std: f32,
    },
}

impl EncodedColumn {
    pub fn field(&self) -> Field {
        match self {
            EncodedColumn::OneHot { field, .. } | EncodedColumn::Passthrough { field, .. } => {
                *field
            }
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            EncodedColumn::OneHot { offset, .. } | EncodedColumn::Passthrough { offset, .. } => {
                *offset
            }
        }
    }

    /// Number of output slots taken by this column
    pub fn width(&self) -> usize {
        match self {
            EncodedColumn::OneHot { categories, .. } => categories.len(),
            EncodedColumn::Passthrough { .. } => 1,
        }
    }
}

/// Frozen mapping from raw fields to feature slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderState {
    columns: Vec<EncodedColumn>,
    dimension: usize,
    fingerprint: u32,
}

impl EncoderState {
    fn new(columns: Vec<EncodedColumn>) -> Self {
        let dimension = columns.iter().map(|c| c.width()).sum();
        let fingerprint = fingerprint(&columns);
        EncoderState {
            columns,
            dimension,
            fingerprint,
        }
    }

    pub fn columns(&self) -> &[EncodedColumn] {
        &self.columns
    }

    /// Total width of every feature vector produced by this state
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Content hash identifying this encoding
    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    /// Slot of a category within its column's block
    pub fn category_index(&self, field: Field, value: &str) -> Option<usize> {
        self.columns.iter().find_map(|c| match c {
            EncodedColumn::OneHot {
                field: f,
                categories,
                ..
            } if *f == field => categories
                .binary_search_by(|c| c.as_str().cmp(value))
                .ok(),
            _ => None,
        })
    }

    /// Check internal consistency of a deserialized state
    pub fn check(&self) -> std::result::Result<(), String> {
        let mut offset = 0;
        for column in &self.columns {
            if column.offset() != offset {
                return Err(format!(
                    "column '{}' starts at {} but {} was expected",
                    column.field(),
                    column.offset(),
                    offset
                ));
            }
            if let EncodedColumn::OneHot {
                field, categories, ..
            } = column
            {
                if categories.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(format!("categories of column '{}' are not sorted", field));
                }
            }
            offset += column.width();
        }
        if offset != self.dimension {
            return Err(format!(
                "declared dimension {} does not match column widths {}",
                self.dimension, offset
            ));
        }
        let expected = fingerprint(&self.columns);
        if expected != self.fingerprint {
            return Err(format!(
                "encoder fingerprint {:08x} does not match content {:08x}",
                self.fingerprint, expected
            ));
        }
        Ok(())
    }
}

fn fingerprint(columns: &[EncodedColumn]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for column in columns {
        hasher.update(column.field().name().as_bytes());
        hasher.update(&(column.offset() as u64).to_le_bytes());
        match column {
            EncodedColumn::OneHot { categories, .. } => {
                hasher.update(b"one_hot");
                for category in categories {
                    hasher.update(&(category.len() as u64).to_le_bytes());
                    hasher.update(category.as_bytes());
                }
            }
            EncodedColumn::Passthrough { mean, std, .. } => {
                hasher.update(b"passthrough");
                hasher.update(&mean.to_le_bytes());
                hasher.update(&std.to_le_bytes());
            }
        }
    }
    hasher.finalize()
}

/// Encoded record, tied to the encoder state that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
    encoder: u32,
}

impl FeatureVector {
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fingerprint of the [`EncoderState`] that produced this vector
    pub fn encoder_fingerprint(&self) -> u32 {
        self.encoder
    }
}

/// Builds and applies feature encodings
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    specs: Vec<FeatureSpec>,
}

impl FeatureEncoder {
    pub fn new(specs: Vec<FeatureSpec>) -> Self {
        FeatureEncoder { specs }
    }

    pub fn from_config(config: &FeatureConfig) -> Self {
        Self::new(config.columns.clone())
    }

    pub fn specs(&self) -> &[FeatureSpec] {
        &self.specs
    }

    /// Fit the encoding from training records
    pub fn fit(&self, records: &[MatchRecord]) -> Result<EncoderState> {
        if records.is_empty() {
            return Err(FootballError::schema(
                "records",
                "cannot fit an encoder on an empty training set",
            ));
        }

        let mut columns = Vec::with_capacity(self.specs.len());
        let mut offset = 0;

        for spec in &self.specs {
            let column = match spec.encoding {
                ColumnEncoding::OneHot => {
                    let mut categories = records
                        .iter()
                        .map(|r| r.category(spec.field).ok_or_else(|| missing(spec.field)))
                        .collect::<Result<Vec<_>>>()?;
                    categories.sort();
                    categories.dedup();
                    EncodedColumn::OneHot {
                        field: spec.field,
                        offset,
                        categories,
                    }
                }
                ColumnEncoding::Passthrough => {
                    let values = records
                        .iter()
                        .map(|r| r.numeric(spec.field).ok_or_else(|| missing(spec.field)))
                        .collect::<Result<Vec<_>>>()?;
                    let n = values.len() as f64;
                    let mean = values.iter().sum::<f64>() / n;
                    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                    EncodedColumn::Passthrough {
                        field: spec.field,
                        offset,
                        mean: mean as f32,
                        std: var.sqrt().max(MIN_STD) as f32,
                    }
                }
            };
            offset += column.width();
            columns.push(column);
        }

        let state = EncoderState::new(columns);
        log::info!(
            "Fitted encoder: {} columns, dimension {}, fingerprint {:08x}",
            state.columns.len(),
            state.dimension,
            state.fingerprint
        );
        for column in &state.columns {
            log::debug!("  {} -> {} slot(s) at {}", column.field(), column.width(), column.offset());
        }
        Ok(state)
    }

    /// Encode one record with a fitted state
    pub fn transform(
        record: &MatchRecord,
        state: &EncoderState,
        policy: UnknownCategoryPolicy,
    ) -> Result<FeatureVector> {
        let mut values = vec![0.0f32; state.dimension];

        for column in &state.columns {
            match column {
                EncodedColumn::OneHot {
                    field,
                    offset,
                    categories,
                } => {
                    let value = record
                        .category(*field)
                        .ok_or_else(|| mismatch(*field))?;
                    match categories.binary_search(&value) {
                        Ok(index) => values[offset + index] = 1.0,
                        Err(_) => match policy {
                            UnknownCategoryPolicy::ZeroVector => {
                                log::debug!("Unseen {} '{}' encoded as zeros", field, value);
                            }
                            UnknownCategoryPolicy::Fail => {
                                return Err(FootballError::UnknownCategory {
                                    column: field.name().to_string(),
                                    value,
                                })
                            }
                        },
                    }
                }
                EncodedColumn::Passthrough {
                    field,
                    offset,
                    mean,
                    std,
                } => {
                    let value = record.numeric(*field).ok_or_else(|| mismatch(*field))?;
                    values[*offset] = ((value - *mean as f64) / *std as f64) as f32;
                }
            }
        }

        Ok(FeatureVector {
            values,
            encoder: state.fingerprint,
        })
    }

    /// Encode a batch of records, stopping at the first failure
    pub fn transform_all(
        records: &[MatchRecord],
        state: &EncoderState,
        policy: UnknownCategoryPolicy,
    ) -> Result<Vec<FeatureVector>> {
        records
            .iter()
            .map(|r| Self::transform(r, state, policy))
            .collect()
    }
}

fn missing(field: Field) -> FootballError {
    FootballError::schema(field.name(), "training record has no value for a feature column")
}

fn mismatch(field: Field) -> FootballError {
    FootballError::mismatch(field.name(), "record has no value for an encoded column")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn teams_encoder() -> FeatureEncoder {
        FeatureEncoder::new(vec![
            FeatureSpec::one_hot(Field::HomeTeam),
            FeatureSpec::one_hot(Field::AwayTeam),
        ])
    }

    fn training_set() -> Vec<MatchRecord> {
        vec![
            MatchRecord::fixture("A", "B").with_result("H"),
            MatchRecord::fixture("A", "C").with_result("D"),
            MatchRecord::fixture("B", "C").with_result("A"),
        ]
    }

    #[test]
    fn test_fit_dimension_and_order() {
        let state = teams_encoder().fit(&training_set()).unwrap();

        // home: {A, B}, away: {B, C}
        assert_eq!(state.dimension(), 4);
        assert_eq!(state.category_index(Field::HomeTeam, "A"), Some(0));
        assert_eq!(state.category_index(Field::HomeTeam, "B"), Some(1));
        assert_eq!(state.category_index(Field::AwayTeam, "C"), Some(1));
        assert_eq!(state.category_index(Field::AwayTeam, "A"), None);
        state.check().unwrap();
    }

    #[test]
    fn test_fit_ignores_row_order() {
        let mut records = training_set();
        let forward = teams_encoder().fit(&records).unwrap();
        records.reverse();
        records.swap(0, 1);
        let shuffled = teams_encoder().fit(&records).unwrap();

        assert_eq!(forward, shuffled);
        assert_eq!(forward.fingerprint(), shuffled.fingerprint());
    }

    #[test]
    fn test_transform_one_hot() {
        let state = teams_encoder().fit(&training_set()).unwrap();
        let v = FeatureEncoder::transform(
            &MatchRecord::fixture("B", "C"),
            &state,
            UnknownCategoryPolicy::Fail,
        )
        .unwrap();

        assert_eq!(v.values(), &[0.0, 1.0, 0.0, 1.0]);
        assert_eq!(v.encoder_fingerprint(), state.fingerprint());
    }

    #[test]
    fn test_unknown_category_zero_vector() {
        let state = teams_encoder().fit(&training_set()).unwrap();
        let v = FeatureEncoder::transform(
            &MatchRecord::fixture("Z", "B"),
            &state,
            UnknownCategoryPolicy::ZeroVector,
        )
        .unwrap();

        assert_eq!(v.values(), &[0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_unknown_category_fail() {
        let state = teams_encoder().fit(&training_set()).unwrap();
        let err = FeatureEncoder::transform(
            &MatchRecord::fixture("A", "Z"),
            &state,
            UnknownCategoryPolicy::Fail,
        )
        .unwrap_err();

        match err {
            FootballError::UnknownCategory { column, value } => {
                assert_eq!(column, "away_team");
                assert_eq!(value, "Z");
            }
            other => panic!("expected unknown category, got {:?}", other),
        }
    }

    #[test]
    fn test_passthrough_is_standardised() {
        let encoder = FeatureEncoder::new(vec![
            FeatureSpec::one_hot(Field::HomeTeam),
            FeatureSpec::passthrough(Field::HomeScore),
        ]);
        let records = vec![
            MatchRecord::fixture("A", "B").with_score(1, 0),
            MatchRecord::fixture("B", "A").with_score(3, 0),
        ];
        let state = encoder.fit(&records).unwrap();
        assert_eq!(state.dimension(), 3);

        let low = FeatureEncoder::transform(&records[0], &state, UnknownCategoryPolicy::Fail)
            .unwrap();
        let high = FeatureEncoder::transform(&records[1], &state, UnknownCategoryPolicy::Fail)
            .unwrap();
        assert!((low.values()[2] + 1.0).abs() < 1e-6);
        assert!((high.values()[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_score_as_category() {
        let encoder = FeatureEncoder::new(vec![FeatureSpec::one_hot(Field::AwayScore)]);
        let records = vec![
            MatchRecord::fixture("A", "B").with_score(0, 2),
            MatchRecord::fixture("B", "A").with_score(1, 0),
            MatchRecord::fixture("C", "A").with_score(1, 2),
        ];
        let state = encoder.fit(&records).unwrap();
        assert_eq!(state.dimension(), 2);
        assert_eq!(state.category_index(Field::AwayScore, "2"), Some(1));
    }

    #[test]
    fn test_passthrough_date() {
        let encoder = FeatureEncoder::new(vec![FeatureSpec::passthrough(Field::MatchDate)]);
        let d1 = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2020, 1, 3).unwrap();
        let records = vec![
            MatchRecord::fixture("A", "B").with_date(d1),
            MatchRecord::fixture("B", "A").with_date(d2),
        ];
        let state = encoder.fit(&records).unwrap();
        match &state.columns()[0] {
            EncodedColumn::Passthrough { std, .. } => assert!((std - 1.0).abs() < 1e-6),
            other => panic!("unexpected column {:?}", other),
        }
    }

    #[test]
    fn test_missing_value_in_transform() {
        let encoder = FeatureEncoder::new(vec![FeatureSpec::passthrough(Field::HomeScore)]);
        let state = encoder
            .fit(&[MatchRecord::fixture("A", "B").with_score(1, 0)])
            .unwrap();
        let err = FeatureEncoder::transform(
            &MatchRecord::fixture("A", "B"),
            &state,
            UnknownCategoryPolicy::ZeroVector,
        )
        .unwrap_err();
        assert!(matches!(err, FootballError::SchemaMismatch { ref column, .. } if column == "home_score"));
    }

    #[test]
    fn test_fit_rejects_empty_and_missing() {
        assert!(matches!(
            teams_encoder().fit(&[]),
            Err(FootballError::Schema { .. })
        ));

        let encoder = FeatureEncoder::new(vec![FeatureSpec::one_hot(Field::MatchDate)]);
        assert!(matches!(
            encoder.fit(&training_set()),
            Err(FootballError::Schema { .. })
        ));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = teams_encoder().fit(&training_set()).unwrap();
        let mut more = training_set();
        more.push(MatchRecord::fixture("D", "A"));
        let b = teams_encoder().fit(&more).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_check_detects_tampering() {
        let state = teams_encoder().fit(&training_set()).unwrap();
        let mut json = serde_json::to_value(&state).unwrap();
        json["dimension"] = serde_json::json!(5);
        let tampered: EncoderState = serde_json::from_value(json).unwrap();
        assert!(tampered.check().is_err());
    }
}
