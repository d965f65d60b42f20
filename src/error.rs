//! Error families for loading pattern tables and building parsers.
//!
//! Only construction can fail: once a [`PatternParser`](crate::PatternParser)
//! exists, parsing never returns an error. A failing evaluator is recorded on
//! the offending span instead.

use std::path::PathBuf;

use thiserror::Error;

/// A malformed pattern cell, or a table whose rows are out of dependency order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("unbalanced `{brace}` at byte {offset} in pattern `{pattern}`")]
    UnbalancedBrace {
        pattern: String,
        brace: char,
        offset: usize,
    },
    #[error("empty sub-reference at byte {offset} in pattern `{pattern}`")]
    EmptyName { pattern: String, offset: usize },
    #[error("row {row} ({kind}) references `{reference}`, which is not declared before it")]
    UndeclaredType {
        row: usize,
        kind: String,
        reference: String,
    },
}

/// A pattern table file that cannot be read as `type,pattern,template` rows.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("cannot read pattern table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("pattern table has no header row")]
    MissingHeader,
    #[error("line {line}: expected 3 columns, found {found}")]
    ColumnCount { line: usize, found: usize },
    #[error("line {line}: unterminated quoted cell")]
    UnterminatedQuote { line: usize },
}

/// A language specification that cannot be turned into a parser graph.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("cannot read language specification {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid language specification {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("pattern type `{0}` is declared twice")]
    DuplicatePattern(String),
    #[error("pattern type `{pattern}` uses unknown evaluator `{evaluator}`")]
    UnknownEvaluator { pattern: String, evaluator: String },
    #[error("pattern type `{pattern}` depends on `{dependency}`, which is not built before it")]
    UnresolvedDependency { pattern: String, dependency: String },
}

/// Returned by evaluator plugins. Never escapes a parse: it becomes an
/// [`Evaluated::Error`](date_types::Evaluated::Error) marker on the span.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot evaluate `{expression}`: {reason}")]
pub struct EvaluationError {
    pub expression: String,
    pub reason: String,
}

impl EvaluationError {
    pub fn new(expression: &str, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
