//! Compiler for the pattern mini-language used in pattern-table cells.
//!
//! A pattern alternates free word runs with `{ }` sub-references:
//!
//!   `{day}e of month {month} in the year {year:numeral}`
//!
//! Word runs are split on whitespace and hyphens into lowercase [`Part::Word`]s.
//! A sub-reference is `{name}`, `{name:type}`, `{nameN}` or `{nameN:type}`;
//! the numeric suffix of an untyped `{nameN}` is dropped to find its type, so
//! `{day2}` binds `day2` to a `day` span. A type made only of digits
//! (`{1}`, `{rest:2}`) is a backreference that accepts any completed span.

use std::fmt;

use crate::error::GrammarError;

/// One element of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Part {
    /// A literal, already lowercased.
    Word(String),
    /// A completed span of type `kind`, bound under `name`.
    TypeRef { kind: String, name: String },
    /// Any completed span, bound under `name`.
    Backref { name: String },
}

impl Part {
    pub fn is_backref(&self) -> bool {
        matches!(self, Self::Backref { .. })
    }

    /// The name a sub-reference binds in the template, `None` for words.
    pub fn binding(&self) -> Option<&str> {
        match self {
            Self::Word(_) => None,
            Self::TypeRef { name, .. } | Self::Backref { name } => Some(name),
        }
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(text) => write!(f, "\"{text}\""),
            Self::TypeRef { kind, name } if kind == name => write!(f, "{{{name}}}"),
            Self::TypeRef { kind, name } => write!(f, "{{{name}:{kind}}}"),
            Self::Backref { name } => write!(f, "@{name}"),
        }
    }
}

/// Compile one pattern cell into its ordered parts.
pub fn compile_pattern(pattern: &str) -> Result<Vec<Part>, GrammarError> {
    let mut parts = Vec::new();
    let mut run_start = 0;
    let mut open: Option<usize> = None;

    for (offset, c) in pattern.char_indices() {
        match c {
            '{' => {
                if open.is_some() {
                    return Err(GrammarError::UnbalancedBrace {
                        pattern: pattern.to_string(),
                        brace: '{',
                        offset,
                    });
                }
                push_words(&pattern[run_start..offset], &mut parts);
                open = Some(offset);
            }
            '}' => {
                let Some(start) = open.take() else {
                    return Err(GrammarError::UnbalancedBrace {
                        pattern: pattern.to_string(),
                        brace: '}',
                        offset,
                    });
                };
                parts.push(compile_reference(pattern, &pattern[start + 1..offset], start)?);
                run_start = offset + 1;
            }
            _ => {}
        }
    }

    if let Some(offset) = open {
        return Err(GrammarError::UnbalancedBrace {
            pattern: pattern.to_string(),
            brace: '{',
            offset,
        });
    }
    push_words(&pattern[run_start..], &mut parts);
    Ok(parts)
}

fn push_words(run: &str, parts: &mut Vec<Part>) {
    parts.extend(
        run.split(|c: char| c.is_whitespace() || c == '-')
            .filter(|w| !w.is_empty())
            .map(|w| Part::Word(w.to_lowercase())),
    );
}

fn compile_reference(pattern: &str, body: &str, offset: usize) -> Result<Part, GrammarError> {
    let (name, declared) = match body.split_once(':') {
        Some((name, kind)) => (name.trim(), Some(kind.trim())),
        None => (body.trim(), None),
    };
    if name.is_empty() || declared == Some("") {
        return Err(GrammarError::EmptyName {
            pattern: pattern.to_string(),
            offset,
        });
    }

    let kind = declared.unwrap_or_else(|| strip_numeric_suffix(name));
    if kind.chars().all(|c| c.is_ascii_digit()) {
        Ok(Part::Backref {
            name: name.to_string(),
        })
    } else {
        Ok(Part::TypeRef {
            kind: kind.to_string(),
            name: name.to_string(),
        })
    }
}

/// `day2` → `day`; a name made only of digits is kept whole.
fn strip_numeric_suffix(name: &str) -> &str {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if stem.is_empty() { name } else { stem }
}
