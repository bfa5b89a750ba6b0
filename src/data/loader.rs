//! Delimited text input

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};

use crate::data::schema::SchemaDescriptor;
use crate::{DataConfig, FootballError, MatchRecord, Result};

fn reader_builder(config: &DataConfig, has_headers: bool) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder
        .delimiter(config.delimiter as u8)
        .has_headers(has_headers)
        .flexible(true)
        .trim(csv::Trim::All);
    builder
}

fn parse_row(schema: &SchemaDescriptor, row: &StringRecord) -> Result<MatchRecord> {
    let fields: Vec<&str> = row.iter().collect();
    schema.parse(&fields).map_err(|e| match e {
        FootballError::Schema {
            column, message, ..
        } => FootballError::Schema {
            line: row.position().map(|p| p.line()),
            column,
            message,
        },
        other => other,
    })
}

/// Read every row of a delimited file into match records
pub fn load_records(
    path: impl AsRef<Path>,
    schema: &SchemaDescriptor,
    config: &DataConfig,
) -> Result<Vec<MatchRecord>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        FootballError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;

    let mut reader = reader_builder(config, config.has_header).from_reader(BufReader::new(file));

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        // Blank lines come through as a single empty field
        if row.iter().all(|f| f.is_empty()) {
            continue;
        }
        records.push(parse_row(schema, &row)?);
    }

    log::info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Parse a single inline record, e.g. `"10615,10586"`
pub fn parse_line(line: &str, schema: &SchemaDescriptor, config: &DataConfig) -> Result<MatchRecord> {
    let mut reader = reader_builder(config, false).from_reader(line.as_bytes());
    let row = reader
        .records()
        .next()
        .ok_or_else(|| FootballError::schema("record", "empty record"))??;
    parse_row(schema, &row)
}
