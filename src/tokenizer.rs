//! Builds the token lattice: every whitespace-delimited fragment of the input
//! together with all the ways it can be read as dictionary words.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::debug;

// ── Lattice position ─────────────────────────────────────────────────────

/// One input fragment and its alternative readings. Each interpretation is a
/// sequence of subtokens spanning the whole fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentedToken {
    pub text: String,
    pub interpretations: Vec<Vec<String>>,
}

impl FragmentedToken {
    /// An unknown fragment, kept as a single subtoken.
    pub fn verbatim(text: &str) -> Self {
        Self {
            text: text.to_string(),
            interpretations: vec![vec![text.to_string()]],
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.interpretations.len() > 1
    }
}

// ── Tokenizer ────────────────────────────────────────────────────────────

/// Splits text against a fixed dictionary of known words.
///
/// Lookups are case-insensitive; matches are reported in the dictionary's
/// own spelling.
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    /// folded → canonical
    dictionary: BTreeMap<String, String>,
}

impl Tokenizer {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let dictionary = words
            .into_iter()
            .map(|w| w.as_ref().to_string())
            .filter(|w| !w.is_empty())
            .map(|w| (w.to_lowercase(), w))
            .collect();
        Self { dictionary }
    }

    /// The known words, in canonical spelling.
    pub fn dictionary(&self) -> BTreeSet<String> {
        self.dictionary.values().cloned().collect()
    }

    /// Build the lattice for `text`.
    ///
    /// A fragment containing `?` (one unknown character) or `.` (any run of
    /// characters) becomes one interpretation per matching dictionary word;
    /// when nothing matches the fragment is left out of the lattice.
    pub fn tokenize(&self, text: &str) -> Vec<FragmentedToken> {
        text.split_whitespace()
            .filter_map(|fragment| {
                let interpretations = if fragment.contains(['?', '.']) {
                    let found = self.wildcard(fragment);
                    if found.is_empty() {
                        debug!(fragment, "wildcard fragment matches no dictionary word");
                        return None;
                    }
                    found
                } else if let Some(known) = self.dictionary.get(&fragment.to_lowercase()) {
                    vec![vec![known.clone()]]
                } else {
                    let parts = self.subdivide(fragment);
                    if parts.is_empty() {
                        return Some(FragmentedToken::verbatim(fragment));
                    }
                    parts
                };
                Some(FragmentedToken {
                    text: fragment.to_string(),
                    interpretations,
                })
            })
            .collect()
    }

    fn wildcard(&self, fragment: &str) -> Vec<Vec<String>> {
        let Some(test) = wildcard_regex(fragment) else {
            return Vec::new();
        };
        self.dictionary
            .iter()
            .filter(|(folded, _)| test.is_match(folded))
            .map(|(_, canonical)| vec![canonical.clone()])
            .collect()
    }

    /// Every way to read `fragment` as a run of dictionary words, e.g.
    /// `"twentyfive"` → `[["twenty", "five"]]`. A hyphen between two words is
    /// skipped. Returns nothing when no complete decomposition exists.
    pub fn subdivide(&self, fragment: &str) -> Vec<Vec<String>> {
        let folded = fragment.to_lowercase();
        let mut memo = HashMap::new();
        self.decompose(&folded, 0, &mut memo)
    }

    /// Decompositions of `text[at..]`, memoized per suffix offset.
    fn decompose(
        &self,
        text: &str,
        at: usize,
        memo: &mut HashMap<usize, Vec<Vec<String>>>,
    ) -> Vec<Vec<String>> {
        if let Some(known) = memo.get(&at) {
            return known.clone();
        }

        let (from, rest) = match text[at..].strip_prefix('-') {
            Some(rest) => (at + 1, rest),
            None => (at, &text[at..]),
        };

        let mut found = Vec::new();
        for (folded, canonical) in &self.dictionary {
            if rest == folded {
                found.push(vec![canonical.clone()]);
            } else if rest.starts_with(folded.as_str()) {
                for tail in self.decompose(text, from + folded.len(), memo) {
                    let mut words = Vec::with_capacity(tail.len() + 1);
                    words.push(canonical.clone());
                    words.extend(tail);
                    found.push(words);
                }
            }
        }

        memo.insert(at, found.clone());
        found
    }
}

/// `jan?ary` → `^jan.ary$`, `j.ary` → `^j.*ary$`, case-insensitive.
fn wildcard_regex(fragment: &str) -> Option<Regex> {
    let mut pattern = String::from("^");
    for c in fragment.chars() {
        match c {
            '?' => pattern.push('.'),
            '.' => pattern.push_str(".*"),
            _ => pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    RegexBuilder::new(&pattern).case_insensitive(true).build().ok()
}
