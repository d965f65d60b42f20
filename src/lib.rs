//! Pattern-driven recognition of dates and numerals in short inscriptions.
//!
//! Language data lives in plain tables of `type,pattern,template` rows. A
//! [`PatternFactory`] turns a language's tables into [`PatternParser`]s that
//! find every reading of a text, fill in the matching templates and evaluate
//! them.

pub mod chart;
pub mod error;
pub mod eval;
pub mod factory;
pub mod grammar;
pub mod matcher;
pub mod pattern_parser;
pub mod table;
pub mod tokenizer;

pub use date_types::{Evaluated, SearchMatch, Segment};
pub use error::{ConfigurationError, Error, EvaluationError, GrammarError, TableError};
pub use eval::{Evaluator, EvaluatorRegistry};
pub use factory::{LanguageSpec, Parsers, PatternFactory, PatternSpec, languages};
pub use matcher::TokenSpan;
pub use pattern_parser::{ParseOptions, PatternParser};
pub use table::PatternRow;
pub use tokenizer::{FragmentedToken, Tokenizer};
