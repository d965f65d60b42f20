//! Builds the parsers of one language from its specification file.
//!
//! A pattern directory holds, per language, `<lang>.json`:
//!
//! ```json
//! { "patterns": [
//!     { "name": "numeral", "key": "number", "eval": "numeral" },
//!     { "name": "date", "key": "date", "eval": "dict", "dependencies": ["numeral"] }
//! ] }
//! ```
//!
//! and one `<lang>_<name>.csv` table per entry. Entries are built in the
//! order listed; a dependency must name an entry listed before it.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{ConfigurationError, Error};
use crate::eval::EvaluatorRegistry;
use crate::pattern_parser::PatternParser;
use crate::table::PatternRow;

/// Parsers by pattern type name.
pub type Parsers = BTreeMap<String, Arc<PatternParser>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LanguageSpec {
    pub patterns: Vec<PatternSpec>,
}

/// One pattern type of a language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternSpec {
    pub name: String,
    /// Annotation tag for this type; not used when matching
    pub key: String,
    /// Evaluator name
    pub eval: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PatternSpec {
    pub fn new(name: &str, key: &str, eval: &str, dependencies: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            key: key.to_string(),
            eval: eval.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatternFactory {
    root: PathBuf,
    evaluators: EvaluatorRegistry,
}

impl PatternFactory {
    /// A factory over the pattern directory `root`, with the default
    /// evaluators.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            evaluators: EvaluatorRegistry::default(),
        }
    }

    pub fn with_evaluators(mut self, evaluators: EvaluatorRegistry) -> Self {
        self.evaluators = evaluators;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn spec_path(&self, lang: &str) -> PathBuf {
        self.root.join(format!("{lang}.json"))
    }

    pub fn table_path(&self, lang: &str, name: &str) -> PathBuf {
        self.root.join(format!("{lang}_{name}.csv"))
    }

    pub fn load_spec(&self, lang: &str) -> Result<LanguageSpec, ConfigurationError> {
        let path = self.spec_path(lang);
        let text = fs::read_to_string(&path).map_err(|source| ConfigurationError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigurationError::Json { path, source })
    }

    /// Every parser of `lang`, built from the bundled tables.
    pub fn build(&self, lang: &str) -> Result<Parsers, Error> {
        self.build_with_overrides(lang, &HashMap::new())
    }

    /// Like [`build`](Self::build), with the rows of some pattern types
    /// replaced by unsaved edits.
    pub fn build_with_overrides(
        &self,
        lang: &str,
        overrides: &HashMap<String, Vec<PatternRow>>,
    ) -> Result<Parsers, Error> {
        let spec = self.load_spec(lang)?;
        self.build_spec(lang, &spec, overrides)
    }

    /// Build the parsers of an already loaded specification. Tables are read
    /// from the pattern directory unless `overrides` supplies their rows.
    pub fn build_spec(
        &self,
        lang: &str,
        spec: &LanguageSpec,
        overrides: &HashMap<String, Vec<PatternRow>>,
    ) -> Result<Parsers, Error> {
        let mut parsers = Parsers::new();

        for pattern in &spec.patterns {
            if parsers.contains_key(&pattern.name) {
                return Err(ConfigurationError::DuplicatePattern(pattern.name.clone()).into());
            }
            let evaluator = self.evaluators.get(&pattern.eval).ok_or_else(|| {
                ConfigurationError::UnknownEvaluator {
                    pattern: pattern.name.clone(),
                    evaluator: pattern.eval.clone(),
                }
            })?;
            let children = pattern
                .dependencies
                .iter()
                .map(|dependency| {
                    parsers.get(dependency).cloned().ok_or_else(|| {
                        ConfigurationError::UnresolvedDependency {
                            pattern: pattern.name.clone(),
                            dependency: dependency.clone(),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let parser = match overrides.get(&pattern.name) {
                Some(rows) => {
                    debug!(lang, pattern = %pattern.name, rows = rows.len(), "using override rows");
                    PatternParser::new(&pattern.name, rows, evaluator, children)?
                }
                None => PatternParser::from_file(
                    &pattern.name,
                    &self.table_path(lang, &pattern.name),
                    evaluator,
                    children,
                )?,
            };
            parsers.insert(pattern.name.clone(), Arc::new(parser));
        }

        info!(lang, parsers = parsers.len(), "language loaded");
        Ok(parsers)
    }
}

/// Languages with a specification file directly inside `root`, sorted.
pub fn languages(root: &Path) -> Vec<String> {
    let mut found: Vec<String> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
        .filter_map(|e| {
            e.path()
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .collect();
    found.sort();
    found
}
