//! Compiled patterns and the cursor that walks one of them across the lattice.

use std::collections::BTreeMap;

use date_types::Evaluated;
use serde::Serialize;

use crate::error::GrammarError;
use crate::grammar::{Part, compile_pattern};
use crate::table::PatternRow;
use crate::tokenizer::FragmentedToken;

/// Index of a span in a [`Chart`](crate::chart::Chart).
pub type SpanId = usize;

// ── Token span ───────────────────────────────────────────────────────────

/// An interval of the lattice, from a subtoken of one interpretation at
/// `start` up to and including a subtoken of one interpretation at `last`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenSpan {
    pub start: usize,
    pub start_interpretation: usize,
    pub start_subtoken: usize,
    pub last: usize,
    pub last_interpretation: usize,
    /// Number of subtokens in the interpretation `last_subtoken` belongs to
    pub last_interpretation_len: usize,
    pub last_subtoken: usize,
    /// `None` for a raw subtoken
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub tokens: Vec<String>,
    /// Template after placeholder substitution
    pub value: String,
    pub evaluated: Option<Evaluated>,
    /// Consumed by a larger completed match
    pub is_captured: bool,
    /// Produced by a dependency parser
    pub is_child: bool,
    #[serde(skip)]
    pub(crate) id: Option<SpanId>,
}

impl TokenSpan {
    /// The raw subtoken at one point of the lattice.
    pub fn leaf(
        lattice: &[FragmentedToken],
        position: usize,
        interpretation: usize,
        subtoken: usize,
    ) -> Self {
        let subtokens = &lattice[position].interpretations[interpretation];
        let text = subtokens[subtoken].clone();
        Self {
            start: position,
            start_interpretation: interpretation,
            start_subtoken: subtoken,
            last: position,
            last_interpretation: interpretation,
            last_interpretation_len: subtokens.len(),
            last_subtoken: subtoken,
            kind: None,
            tokens: vec![text.clone()],
            value: text,
            evaluated: None,
            is_captured: false,
            is_child: false,
            id: None,
        }
    }

    pub fn text(&self) -> String {
        self.tokens.join(" ")
    }

    /// Whether `following` starts right where this span ends: at the next
    /// subtoken of the same interpretation, or at the first subtoken of any
    /// interpretation of the next position.
    pub fn precedes(&self, following: &TokenSpan) -> bool {
        if self.last_subtoken + 1 < self.last_interpretation_len {
            following.start == self.last
                && following.start_interpretation == self.last_interpretation
                && following.start_subtoken == self.last_subtoken + 1
        } else {
            following.start == self.last + 1 && following.start_subtoken == 0
        }
    }

    /// The position a continuation of this span has to start at.
    pub fn continuation(&self) -> usize {
        if self.last_subtoken + 1 < self.last_interpretation_len {
            self.last
        } else {
            self.last + 1
        }
    }

    /// Whether `inner` lies within this span's positions and its text is
    /// part of this span's text.
    pub fn contains(&self, inner: &TokenSpan) -> bool {
        self.covers(inner) && self.text().contains(&inner.text())
    }

    /// Whether `inner`'s positions lie within this span's positions.
    pub fn covers(&self, inner: &TokenSpan) -> bool {
        self.start <= inner.start && inner.last <= self.last
    }

    /// The string a sub-reference binds: the evaluated value when there is a
    /// usable one, otherwise the rendered template.
    pub fn binding(&self) -> String {
        match &self.evaluated {
            Some(evaluated) if !evaluated.is_error() => evaluated.to_string(),
            _ => self.value.clone(),
        }
    }

    /// Same interval, type and value.
    pub(crate) fn same_match(&self, other: &TokenSpan) -> bool {
        self.start == other.start
            && self.start_interpretation == other.start_interpretation
            && self.start_subtoken == other.start_subtoken
            && self.last == other.last
            && self.last_interpretation == other.last_interpretation
            && self.last_subtoken == other.last_subtoken
            && self.kind == other.kind
            && self.value == other.value
    }

    /// Re-tag a dependency parser's result for use in a parent chart.
    pub(crate) fn into_child(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self.is_child = true;
        self.is_captured = false;
        self.id = None;
        self
    }
}

// ── Pattern matcher ──────────────────────────────────────────────────────

/// One compiled table row. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatcher {
    pub kind: String,
    pub template: String,
    pub parts: Vec<Part>,
}

impl PatternMatcher {
    pub fn compile(row: &PatternRow) -> Result<Self, GrammarError> {
        Ok(Self {
            kind: row.kind.clone(),
            template: row.template.clone(),
            parts: compile_pattern(&row.pattern)?,
        })
    }

    /// The literal words this pattern needs.
    pub fn dictionary(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            Part::Word(text) => Some(text.as_str()),
            _ => None,
        })
    }

    /// The types this pattern refers to by name.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            Part::TypeRef { kind, .. } => Some(kind.as_str()),
            _ => None,
        })
    }

    pub fn has_backref(&self) -> bool {
        self.parts.iter().any(Part::is_backref)
    }
}

// ── Matcher state ────────────────────────────────────────────────────────

/// Outcome of testing a span against a state's next part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    Miss,
    Direct,
    /// Accepted by a backreference; every completed span at the same point
    /// is a separate candidate.
    Backref,
}

impl Fit {
    pub fn matched(self) -> bool {
        self != Fit::Miss
    }
}

/// One linear parse hypothesis for a matcher from a fixed start. Cloned
/// whenever more than one continuation is possible.
#[derive(Debug, Clone)]
pub struct MatcherState<'m> {
    matcher: &'m PatternMatcher,
    parts_index: usize,
    spans: Vec<TokenSpan>,
    values: BTreeMap<String, String>,
}

impl<'m> MatcherState<'m> {
    pub fn new(matcher: &'m PatternMatcher) -> Self {
        Self {
            matcher,
            parts_index: 0,
            spans: Vec::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn spans(&self) -> &[TokenSpan] {
        &self.spans
    }

    /// Where the next span has to start, `None` before the first one.
    pub fn continuation(&self) -> Option<usize> {
        self.spans.last().map(TokenSpan::continuation)
    }

    pub fn test(&self, span: &TokenSpan) -> Fit {
        if let Some(last) = self.spans.last() {
            if !last.precedes(span) {
                return Fit::Miss;
            }
        }
        let Some(part) = self.matcher.parts.get(self.parts_index) else {
            return Fit::Miss;
        };

        match part {
            Part::Word(text) if span.kind.is_none() && span.value == *text => Fit::Direct,
            Part::TypeRef { kind, .. } if span.kind.as_deref() == Some(kind.as_str()) => {
                Fit::Direct
            }
            Part::Backref { .. } if span.kind.is_some() => Fit::Backref,
            _ => Fit::Miss,
        }
    }

    /// Consume `span` for the current part; assumes [`test`](Self::test)
    /// accepted it. Returns whether the pattern is complete, in which case
    /// every consumed span is flagged as captured.
    pub fn next(&mut self, span: &TokenSpan) -> bool {
        if let Some(name) = self.matcher.parts[self.parts_index].binding() {
            self.values.insert(name.to_string(), span.binding());
        }
        self.parts_index += 1;
        self.spans.push(span.clone());

        let complete = self.parts_index == self.matcher.parts.len();
        if complete {
            for span in &mut self.spans {
                span.is_captured = true;
            }
        }
        complete
    }

    /// Chart spans this state has consumed.
    pub fn consumed(&self) -> impl Iterator<Item = SpanId> + '_ {
        self.spans.iter().filter_map(|span| span.id)
    }

    /// The completed span, with the template filled in.
    pub fn emit(&self) -> TokenSpan {
        let first = &self.spans[0];
        let last = &self.spans[self.spans.len() - 1];

        let mut value = self.matcher.template.clone();
        for (name, bound) in &self.values {
            value = value.replace(&format!("{{{name}}}"), bound);
        }

        TokenSpan {
            start: first.start,
            start_interpretation: first.start_interpretation,
            start_subtoken: first.start_subtoken,
            last: last.last,
            last_interpretation: last.last_interpretation,
            last_interpretation_len: last.last_interpretation_len,
            last_subtoken: last.last_subtoken,
            kind: Some(self.matcher.kind.clone()),
            tokens: self.spans.iter().flat_map(|s| s.tokens.iter().cloned()).collect(),
            value,
            evaluated: None,
            is_captured: false,
            is_child: false,
            id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lattice(readings: Vec<Vec<Vec<&str>>>) -> Vec<FragmentedToken> {
        readings
            .into_iter()
            .map(|interpretations| FragmentedToken {
                text: interpretations[0].concat(),
                interpretations: interpretations
                    .iter()
                    .map(|subtokens| subtokens.iter().map(|s| s.to_string()).collect())
                    .collect(),
            })
            .collect()
    }

    fn completed(mut span: TokenSpan, kind: &str, value: &str, id: SpanId) -> TokenSpan {
        span.kind = Some(kind.to_string());
        span.value = value.to_string();
        span.id = Some(id);
        span
    }

    fn matcher(kind: &str, pattern: &str, template: &str) -> PatternMatcher {
        PatternMatcher::compile(&PatternRow::new(kind, pattern, template)).unwrap()
    }

    #[test]
    fn test_precedes_within_and_across_fragments() {
        let lattice = lattice(vec![vec![vec!["vijf", "en", "twintig"]], vec![vec!["maart"]]]);
        let vijf = TokenSpan::leaf(&lattice, 0, 0, 0);
        let en = TokenSpan::leaf(&lattice, 0, 0, 1);
        let twintig = TokenSpan::leaf(&lattice, 0, 0, 2);
        let maart = TokenSpan::leaf(&lattice, 1, 0, 0);

        assert!(vijf.precedes(&en));
        assert!(en.precedes(&twintig));
        assert!(twintig.precedes(&maart));
        assert!(!vijf.precedes(&twintig));
        assert!(!vijf.precedes(&maart));
        assert_eq!(vijf.continuation(), 0);
        assert_eq!(twintig.continuation(), 1);
    }

    #[test]
    fn test_precedes_rejects_other_interpretation() {
        let lattice = lattice(vec![vec![vec!["acht", "tien"], vec!["achttien"]]]);
        let acht = TokenSpan::leaf(&lattice, 0, 0, 0);
        let achttien = TokenSpan::leaf(&lattice, 0, 1, 0);
        assert!(!acht.precedes(&achttien));
    }

    #[test]
    fn test_state_walks_words_and_references() {
        let lattice = lattice(vec![vec![vec!["five"]], vec![vec!["of"]], vec![vec!["march"]]]);
        let date = matcher("date", "{n:numeral} of march", "{day: {n}, month: 3}");
        let mut state = MatcherState::new(&date);

        let five = TokenSpan::leaf(&lattice, 0, 0, 0);
        assert_eq!(state.test(&five), Fit::Miss);
        let numeral = completed(five, "numeral", "5", 7);
        assert_eq!(state.test(&numeral), Fit::Direct);
        assert!(!state.next(&numeral));

        let march = TokenSpan::leaf(&lattice, 2, 0, 0);
        assert_eq!(state.test(&march), Fit::Miss, "not adjacent");
        let of = TokenSpan::leaf(&lattice, 1, 0, 0);
        assert_eq!(state.test(&of), Fit::Direct);
        assert!(!state.next(&of));
        assert!(state.next(&march));

        assert!(state.spans().iter().all(|s| s.is_captured));
        assert_eq!(state.consumed().collect::<Vec<_>>(), vec![7]);

        let span = state.emit();
        assert_eq!(span.kind.as_deref(), Some("date"));
        assert_eq!(span.text(), "five of march");
        assert_eq!(span.value, "{day: 5, month: 3}");
        assert_eq!((span.start, span.last), (0, 2));
    }

    #[test]
    fn test_backref_accepts_any_completed_span() {
        let lattice = lattice(vec![vec![vec!["one"]]]);
        let numeral = matcher("numeral", "{1} and twenty", "{1}+20");
        let state = MatcherState::new(&numeral);

        let one = TokenSpan::leaf(&lattice, 0, 0, 0);
        assert_eq!(state.test(&one), Fit::Miss);
        assert_eq!(state.test(&completed(one.clone(), "digit", "1", 0)), Fit::Backref);
        assert_eq!(state.test(&completed(one, "teen", "1", 1)), Fit::Backref);
    }

    #[test]
    fn test_binding_prefers_evaluated_value() {
        let lattice = lattice(vec![vec![vec!["twenty"]]]);
        let mut span = completed(TokenSpan::leaf(&lattice, 0, 0, 0), "numeral", "2*10", 0);
        assert_eq!(span.binding(), "2*10");
        span.evaluated = Some(Evaluated::Number(20));
        assert_eq!(span.binding(), "20");
        span.evaluated = Some(Evaluated::Error {
            error: "bad".to_string(),
        });
        assert_eq!(span.binding(), "2*10");
    }

    #[test]
    fn test_matcher_dictionary_and_references() {
        let m = matcher("date", "the {d:numeral} of {m:month} {1}", "x");
        assert_eq!(m.dictionary().collect::<Vec<_>>(), vec!["the", "of"]);
        assert_eq!(m.references().collect::<Vec<_>>(), vec!["numeral", "month"]);
        assert!(m.has_backref());
    }
}
