//! Pattern tables: comma-delimited `type,pattern,template` text with a header row.
//!
//! A cell only needs quoting when it contains a comma, a quote or a line
//! break; quotes inside a quoted cell are doubled (`""`).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// One authored rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRow {
    #[serde(rename = "type")]
    pub kind: String,
    pub pattern: String,
    pub template: String,
}

impl PatternRow {
    pub fn new(kind: &str, pattern: &str, template: &str) -> Self {
        Self {
            kind: kind.to_string(),
            pattern: pattern.to_string(),
            template: template.to_string(),
        }
    }
}

/// Read a whole table file.
pub fn load_table(path: &Path) -> Result<Vec<PatternRow>, TableError> {
    let text = fs::read_to_string(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_table(&text)
}

/// Parse table text, skipping the header and blank lines.
pub fn parse_table(text: &str) -> Result<Vec<PatternRow>, TableError> {
    let mut records = split_records(text)?.into_iter();
    if records.next().is_none() {
        return Err(TableError::MissingHeader);
    }

    records
        .map(|(line, cells)| match <[String; 3]>::try_from(cells) {
            Ok([kind, pattern, template]) => Ok(PatternRow {
                kind,
                pattern,
                template,
            }),
            Err(cells) => Err(TableError::ColumnCount {
                line,
                found: cells.len(),
            }),
        })
        .collect()
}

/// Split text into records of cells, each tagged with its 1-based start line.
fn split_records(text: &str) -> Result<Vec<(usize, Vec<String>)>, TableError> {
    let mut records = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    cell.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    cell.push(c);
                }
                _ => cell.push(c),
            }
            continue;
        }

        match c {
            '"' if cell.is_empty() => in_quotes = true,
            ',' => cells.push(std::mem::take(&mut cell)),
            '\r' => {}
            '\n' => {
                finish_record(&mut records, &mut cells, &mut cell, record_line);
                line += 1;
                record_line = line;
            }
            _ => cell.push(c),
        }
    }

    if in_quotes {
        return Err(TableError::UnterminatedQuote { line: record_line });
    }
    finish_record(&mut records, &mut cells, &mut cell, record_line);
    Ok(records)
}

fn finish_record(
    records: &mut Vec<(usize, Vec<String>)>,
    cells: &mut Vec<String>,
    cell: &mut String,
    line: usize,
) {
    if cells.is_empty() && cell.trim().is_empty() {
        cell.clear();
        return;
    }
    cells.push(std::mem::take(cell));
    records.push((line, std::mem::take(cells)));
}
