use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Evaluated value ──────────────────────────────────────────────────────

/// The value an evaluator plugin produced for a rendered template.
///
/// Serialized untagged, so a numeral reads as `21`, a date record as
/// `{"day": 5, "month": 3}` and a failed evaluation as `{"#error": "..."}`.
/// Record keys never start with `#`, which keeps the error marker apart from
/// a record that happens to have an `error` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Evaluated {
    Number(i64),
    Text(String),
    /// Marker left on a span whose evaluator failed; the parse itself goes on.
    Error {
        #[serde(rename = "#error")]
        error: String,
    },
    Record(BTreeMap<String, Evaluated>),
}

impl Evaluated {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Look up a field of a record value.
    pub fn field(&self, key: &str) -> Option<&Evaluated> {
        match self {
            Self::Record(fields) => fields.get(key),
            _ => None,
        }
    }
}

/// Renders in the same flow notation the pattern templates use, so an
/// evaluated value can be substituted back into a parent template.
impl fmt::Display for Evaluated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(t) if needs_quotes(t) => {
                f.write_str("\"")?;
                for c in t.chars() {
                    match c {
                        '"' | '\\' => write!(f, "\\{c}")?,
                        '\n' => f.write_str("\\n")?,
                        _ => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
            Self::Text(t) => f.write_str(t),
            Self::Error { error } => write!(f, "#error({error})"),
            Self::Record(fields) => {
                f.write_str("{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Text that would not read back as the same plain scalar inside a flow
/// mapping.
fn needs_quotes(text: &str) -> bool {
    text.is_empty()
        || text.trim() != text
        || text.contains([
            ':', ',', '{', '}', '[', ']', '#', '&', '*', '!', '|', '>', '\'', '"', '%', '@', '`',
            '\\', '\n',
        ])
}

// ── Search stream ────────────────────────────────────────────────────────

/// One recognized span inside a matched segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// Template after placeholder substitution
    pub parsed: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval: Option<Evaluated>,
    /// The subtokens the match was read from (after wildcard and compound
    /// resolution)
    pub interpretation: Vec<String>,
}

/// An element of the boundary-annotated search stream: either a run of
/// unmatched text or a group of overlapping matches with the text they cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Matched {
        text: String,
        matches: Vec<SearchMatch>,
    },
    Text {
        text: String,
    },
}

impl Segment {
    pub fn text(&self) -> &str {
        match self {
            Self::Matched { text, .. } | Self::Text { text } => text,
        }
    }

    pub fn matches(&self) -> &[SearchMatch] {
        match self {
            Self::Matched { matches, .. } => matches,
            Self::Text { .. } => &[],
        }
    }
}
