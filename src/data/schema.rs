//! Column schema for match rows
//!
//! Each field is bound to a row position and a typed parse function. Nothing is
//! resolved by name at runtime: the descriptor is the single source of truth
//! for where a value lives and how it is converted.

use chrono::NaiveDate;

use crate::{ColumnKind, ColumnLayout, Field, FootballError, MatchRecord, Result, TeamId};

/// Accepted date formats with a four digit year, tried in order
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];
/// Day-first format with a two digit year
const SHORT_DATE_FORMAT: &str = "%d/%m/%y";

/// Typed parse function for one column
type ParseFn = fn(&str, &mut PartialRecord) -> std::result::Result<(), String>;

/// Fields collected while a row is being parsed
#[derive(Debug, Default)]
pub struct PartialRecord {
    home_team: Option<TeamId>,
    away_team: Option<TeamId>,
    match_date: Option<NaiveDate>,
    home_score: Option<u16>,
    away_score: Option<u16>,
    result: Option<String>,
}

/// Declaration of a single column
#[derive(Clone)]
pub struct ColumnSpec {
    pub field: Field,
    /// Zero-based position in the row
    pub index: usize,
    pub required: bool,
    parse: ParseFn,
}

impl ColumnSpec {
    pub fn new(field: Field, index: usize) -> Self {
        let (required, parse): (bool, ParseFn) = match field {
            Field::HomeTeam => (true, parse_home_team),
            Field::AwayTeam => (true, parse_away_team),
            Field::MatchDate => (false, parse_match_date),
            Field::HomeScore => (false, parse_home_score),
            Field::AwayScore => (false, parse_away_score),
            Field::Result => (false, parse_result),
        };
        ColumnSpec {
            field,
            index,
            required,
            parse,
        }
    }

    pub fn kind(&self) -> ColumnKind {
        self.field.kind()
    }
}

impl std::fmt::Debug for ColumnSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnSpec")
            .field("field", &self.field)
            .field("index", &self.index)
            .field("required", &self.required)
            .finish()
    }
}

/// Expected columns of a match row
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    columns: Vec<ColumnSpec>,
}

impl Default for SchemaDescriptor {
    fn default() -> Self {
        Self::from_layout(&ColumnLayout::default())
    }
}

impl SchemaDescriptor {
    /// Schema version written into model bundles
    pub const VERSION: u32 = 1;

    /// Build the schema from configured column positions
    pub fn from_layout(layout: &ColumnLayout) -> Self {
        let mut columns = vec![
            ColumnSpec::new(Field::HomeTeam, layout.home_team),
            ColumnSpec::new(Field::AwayTeam, layout.away_team),
        ];
        let optional = [
            (Field::MatchDate, layout.match_date),
            (Field::HomeScore, layout.home_score),
            (Field::AwayScore, layout.away_score),
            (Field::Result, layout.result),
        ];
        for (field, index) in optional {
            if let Some(index) = index {
                columns.push(ColumnSpec::new(field, index));
            }
        }
        SchemaDescriptor { columns }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// The column holding the classification label, if the layout has one
    pub fn label_column(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.kind() == ColumnKind::Label)
    }

    /// Whether a field is bound to a row position
    pub fn has_field(&self, field: Field) -> bool {
        self.columns.iter().any(|c| c.field == field)
    }

    /// Parse one raw row into a typed record
    pub fn parse(&self, row: &[&str]) -> Result<MatchRecord> {
        let mut partial = PartialRecord::default();

        for column in &self.columns {
            let raw = row.get(column.index).map(|v| v.trim()).unwrap_or("");
            if raw.is_empty() {
                if column.required {
                    return Err(FootballError::schema(
                        column.field.name(),
                        format!("required column at position {} is missing", column.index),
                    ));
                }
                continue;
            }
            (column.parse)(raw, &mut partial)
                .map_err(|message| FootballError::schema(column.field.name(), message))?;
        }

        let missing = |field: Field| {
            FootballError::schema(field.name(), "column is not declared in the schema")
        };

        Ok(MatchRecord {
            home_team: partial.home_team.ok_or_else(|| missing(Field::HomeTeam))?,
            away_team: partial.away_team.ok_or_else(|| missing(Field::AwayTeam))?,
            match_date: partial.match_date,
            home_score: partial.home_score,
            away_score: partial.away_score,
            result: partial.result,
        })
    }
}

fn parse_home_team(raw: &str, record: &mut PartialRecord) -> std::result::Result<(), String> {
    record.home_team = Some(TeamId::new(raw));
    Ok(())
}

fn parse_away_team(raw: &str, record: &mut PartialRecord) -> std::result::Result<(), String> {
    record.away_team = Some(TeamId::new(raw));
    Ok(())
}

fn parse_match_date(raw: &str, record: &mut PartialRecord) -> std::result::Result<(), String> {
    // %Y happily reads "19" as year 19, so short years are routed explicitly
    let short_year = raw.contains('/') && raw.rsplit('/').next().is_some_and(|y| y.len() == 2);
    let parsed = if short_year {
        NaiveDate::parse_from_str(raw, SHORT_DATE_FORMAT).ok()
    } else {
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
    };
    let date = parsed.ok_or_else(|| {
        format!(
            "'{}' is not a date (expected YYYY-MM-DD, DD/MM/YYYY or DD/MM/YY)",
            raw
        )
    })?;
    record.match_date = Some(date);
    Ok(())
}

fn parse_score(raw: &str) -> std::result::Result<u16, String> {
    raw.parse::<u16>()
        .map_err(|_| format!("'{}' is not a non-negative integer score", raw))
}

fn parse_home_score(raw: &str, record: &mut PartialRecord) -> std::result::Result<(), String> {
    record.home_score = Some(parse_score(raw)?);
    Ok(())
}

fn parse_away_score(raw: &str, record: &mut PartialRecord) -> std::result::Result<(), String> {
    record.away_score = Some(parse_score(raw)?);
    Ok(())
}

fn parse_result(raw: &str, record: &mut PartialRecord) -> std::result::Result<(), String> {
    record.result = Some(raw.to_string());
    Ok(())
}
