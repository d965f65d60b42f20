//! One pattern type: its table, its dependencies and its evaluator.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use date_types::{Evaluated, SearchMatch, Segment};
use tracing::{debug, warn};

use crate::chart::ChartParser;
use crate::error::{Error, GrammarError};
use crate::eval::Evaluator;
use crate::matcher::{PatternMatcher, TokenSpan};
use crate::table::{PatternRow, load_table};
use crate::tokenizer::{FragmentedToken, Tokenizer};

/// Post-processing applied to the chart of a parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Drop spans consumed by a larger match.
    pub omit_captured: bool,
    /// Drop spans whose text lies inside a longer (or identical) span.
    pub hide_overlap: bool,
    /// Run the evaluator over every span of this parser's own type.
    pub eval_values: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            omit_captured: true,
            hide_overlap: true,
            eval_values: true,
        }
    }
}

/// A compiled pattern table plus the parsers of the types it refers to.
///
/// Immutable after construction; one instance may serve concurrent parses.
pub struct PatternParser {
    kind: String,
    matchers: Vec<PatternMatcher>,
    children: Vec<Arc<PatternParser>>,
    tokenizer: Tokenizer,
    evaluator: Evaluator,
}

impl PatternParser {
    /// Compile `rows` in order. A row may only refer to the types of
    /// `children` and to types declared by rows above it.
    pub fn new(
        kind: &str,
        rows: &[PatternRow],
        evaluator: Evaluator,
        children: Vec<Arc<PatternParser>>,
    ) -> Result<Self, GrammarError> {
        let mut declared: HashSet<&str> = children.iter().map(|c| c.kind()).collect();
        let mut matchers = Vec::with_capacity(rows.len());

        for (index, row) in rows.iter().enumerate() {
            let matcher = PatternMatcher::compile(row)?;
            if let Some(reference) = matcher.references().find(|r| !declared.contains(r)) {
                return Err(GrammarError::UndeclaredType {
                    row: index + 1,
                    kind: row.kind.clone(),
                    reference: reference.to_string(),
                });
            }
            declared.insert(&row.kind);
            matchers.push(matcher);
        }

        let words: BTreeSet<String> = matchers
            .iter()
            .flat_map(PatternMatcher::dictionary)
            .map(str::to_string)
            .chain(children.iter().flat_map(|c| c.dictionary()))
            .collect();

        debug!(
            kind,
            rows = matchers.len(),
            children = children.len(),
            words = words.len(),
            "pattern parser compiled"
        );

        Ok(Self {
            kind: kind.to_string(),
            tokenizer: Tokenizer::new(words),
            matchers,
            children,
            evaluator,
        })
    }

    /// Compile the table stored at `path`.
    pub fn from_file(
        kind: &str,
        path: &Path,
        evaluator: Evaluator,
        children: Vec<Arc<PatternParser>>,
    ) -> Result<Self, Error> {
        let rows = load_table(path)?;
        Ok(Self::new(kind, &rows, evaluator, children)?)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Every literal word this parser or its dependencies can match.
    pub fn dictionary(&self) -> BTreeSet<String> {
        self.tokenizer.dictionary()
    }

    pub fn tokenize(&self, text: &str) -> Vec<FragmentedToken> {
        self.tokenizer.tokenize(text)
    }

    /// Tokenize and parse `text`; one list of spans per lattice position.
    #[tracing::instrument(level = "debug", skip(self, options), fields(kind = %self.kind))]
    pub fn parse(&self, text: &str, options: ParseOptions) -> Vec<Vec<TokenSpan>> {
        let lattice = self.tokenize(text);
        self.parse_lattice(&lattice, options)
    }

    /// Parse an already tokenized lattice.
    pub fn parse_lattice(
        &self,
        lattice: &[FragmentedToken],
        options: ParseOptions,
    ) -> Vec<Vec<TokenSpan>> {
        let mut chart = ChartParser::new(&self.matchers);
        chart.input(lattice);

        for child in &self.children {
            let spans = child.parse_lattice(lattice, ParseOptions::default());
            for span in spans.into_iter().flatten().filter(|s| !s.is_child) {
                chart.inject(span.into_child(child.kind()));
            }
        }

        chart.process_all();
        let mut positions = chart.into_chart().into_positions(lattice.len());

        if options.omit_captured {
            for spans in &mut positions {
                spans.retain(|s| !s.is_captured);
            }
        }
        if options.hide_overlap {
            hide_overlap(&mut positions);
        }
        if options.eval_values {
            for span in positions.iter_mut().flatten().filter(|s| !s.is_child) {
                span.evaluated = Some(self.evaluate(&span.value));
            }
        }
        positions
    }

    fn evaluate(&self, value: &str) -> Evaluated {
        match (self.evaluator)(value) {
            Ok(evaluated) => evaluated,
            Err(error) => {
                warn!(kind = %self.kind, %error, "evaluation failed");
                Evaluated::Error {
                    error: error.to_string(),
                }
            }
        }
    }

    /// Parse `text` and lay the result out as alternating runs of unmatched
    /// text and groups of matches. Overlapping matches share one group, which
    /// reaches up to the furthest position any of them covers.
    pub fn search(&self, text: &str) -> Vec<Segment> {
        let lattice = self.tokenize(text);
        let positions = self.parse_lattice(&lattice, ParseOptions::default());

        let mut segments = Vec::new();
        let mut unmatched: Vec<&str> = Vec::new();
        let mut position = 0;

        while position < lattice.len() {
            if positions[position].is_empty() {
                unmatched.push(&lattice[position].text);
                position += 1;
                continue;
            }
            if !unmatched.is_empty() {
                segments.push(Segment::Text {
                    text: unmatched.join(" "),
                });
                unmatched.clear();
            }

            let mut end = position;
            let mut matches = Vec::new();
            let mut next = position;
            while next <= end {
                for span in &positions[next] {
                    end = end.max(span.last);
                    matches.push(SearchMatch {
                        parsed: span.value.clone(),
                        kind: span.kind.clone().unwrap_or_default(),
                        eval: span.evaluated.clone(),
                        interpretation: span.tokens.clone(),
                    });
                }
                next += 1;
            }

            let covered: Vec<&str> = lattice[position..=end]
                .iter()
                .map(|token| token.text.as_str())
                .collect();
            segments.push(Segment::Matched {
                text: covered.join(" "),
                matches,
            });
            position = end + 1;
        }

        if !unmatched.is_empty() {
            segments.push(Segment::Text {
                text: unmatched.join(" "),
            });
        }
        segments
    }
}

impl fmt::Debug for PatternParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternParser")
            .field("kind", &self.kind)
            .field("matchers", &self.matchers.len())
            .field(
                "children",
                &self.children.iter().map(|c| c.kind()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Remove every span another span contains, when the container's text is
/// longer or the two texts are identical. Of identical spans the first one
/// (by position, then completion order) stays.
fn hide_overlap(positions: &mut [Vec<TokenSpan>]) {
    let hidden = find_hidden(positions).hidden;
    for (p, spans) in positions.iter_mut().enumerate() {
        let mut i = 0;
        spans.retain(|_| {
            let keep = !hidden.contains(&(p, i));
            i += 1;
            keep
        });
    }
}

#[derive(Debug, Default)]
struct Overlap {
    hidden: HashSet<(usize, usize)>,
    /// Substring comparisons made
    text_checks: usize,
}

/// A container starts at or before the span it contains, so only positions
/// up to the inner span's start are searched. Texts are rendered once; the
/// substring test only runs for pairs whose positions and lengths allow it.
fn find_hidden(positions: &[Vec<TokenSpan>]) -> Overlap {
    let texts: Vec<Vec<String>> = positions
        .iter()
        .map(|spans| spans.iter().map(TokenSpan::text).collect())
        .collect();

    let mut overlap = Overlap::default();
    for (p, spans) in positions.iter().enumerate() {
        for (i, inner) in spans.iter().enumerate() {
            let inner_text = &texts[p][i];
            let covered = positions[..=p].iter().enumerate().any(|(q, outers)| {
                outers.iter().enumerate().any(|(j, outer)| {
                    if (q, j) == (p, i) || !outer.covers(inner) {
                        return false;
                    }
                    let outer_text = &texts[q][j];
                    if outer_text.len() > inner_text.len() {
                        overlap.text_checks += 1;
                        outer_text.contains(inner_text.as_str())
                    } else {
                        (q, j) < (p, i) && outer_text == inner_text
                    }
                })
            });
            if covered {
                overlap.hidden.insert((p, i));
            }
        }
    }
    overlap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{dict_value, numeral_value, text_value};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn rows(rows: &[(&str, &str, &str)]) -> Vec<PatternRow> {
        rows.iter()
            .map(|(kind, pattern, template)| PatternRow::new(kind, pattern, template))
            .collect()
    }

    fn numerals() -> Arc<PatternParser> {
        let rows = rows(&[
            ("digit", "one", "1"),
            ("digit", "two", "2"),
            ("digit", "five", "5"),
            ("tens", "twenty", "20"),
            ("tens", "thirty", "30"),
            ("numeral", "{tens} {digit}", "{tens}+{digit}"),
            ("numeral", "{tens}", "{tens}"),
            ("numeral", "{digit}", "{digit}"),
            ("numeral", "{1} and twenty", "{1}+20"),
        ]);
        Arc::new(PatternParser::new("numeral", &rows, Arc::new(numeral_value), vec![]).unwrap())
    }

    fn dates() -> PatternParser {
        let rows = rows(&[("date", "{n:numeral} of march", "{day: {n}, month: 3}")]);
        PatternParser::new("date", &rows, Arc::new(dict_value), vec![numerals()]).unwrap()
    }

    fn values(positions: &[Vec<TokenSpan>]) -> Vec<(String, String)> {
        positions
            .iter()
            .flatten()
            .map(|s| (s.kind.clone().unwrap_or_default(), s.value.clone()))
            .collect()
    }

    #[test]
    fn test_child_resolves_before_parent() {
        let positions = dates().parse("five of March", ParseOptions::default());
        let spans: Vec<&TokenSpan> = positions.iter().flatten().collect();
        assert_eq!(spans.len(), 1);
        let date = spans[0];
        assert_eq!(date.kind.as_deref(), Some("date"));
        assert_eq!(date.value, "{day: 5, month: 3}");
        let evaluated = date.evaluated.as_ref().unwrap();
        assert_eq!(evaluated.field("day"), Some(&Evaluated::Number(5)));
        assert_eq!(evaluated.field("month"), Some(&Evaluated::Number(3)));
    }

    #[test]
    fn test_child_value_is_bound_evaluated() {
        let positions = dates().parse("twenty five of march", ParseOptions::default());
        let date = positions.iter().flatten().next().unwrap();
        assert_eq!(date.value, "{day: 25, month: 3}");
        assert_eq!(date.text(), "twenty five of march");
    }

    #[test]
    fn test_backref_composition_evaluates() {
        let positions = numerals().parse("one and twenty", ParseOptions::default());
        let spans: Vec<&TokenSpan> = positions.iter().flatten().collect();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].value, "1+20");
        assert_eq!(spans[0].evaluated, Some(Evaluated::Number(21)));
    }

    #[test]
    fn test_options_keep_intermediate_spans() {
        let options = ParseOptions {
            omit_captured: false,
            hide_overlap: false,
            eval_values: false,
        };
        let positions = numerals().parse("twenty five", options);
        let all = values(&positions);
        assert!(all.contains(&("tens".to_string(), "20".to_string())));
        assert!(all.contains(&("digit".to_string(), "5".to_string())));
        assert!(all.contains(&("numeral".to_string(), "20+5".to_string())));
        assert!(positions.iter().flatten().all(|s| s.evaluated.is_none()));

        let positions = numerals().parse("twenty five", ParseOptions::default());
        assert_eq!(
            values(&positions),
            vec![("numeral".to_string(), "20+5".to_string())]
        );
    }

    #[test]
    fn test_parse_is_idempotent() {
        let parser = dates();
        let first = parser.parse("on five of march one and twenty", ParseOptions::default());
        let second = parser.parse("on five of march one and twenty", ParseOptions::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        let rows = rows(&[("date", "{n:numeral} of march", "x"), ("numeral", "five", "5")]);
        let error = PatternParser::new("date", &rows, Arc::new(text_value), vec![]).unwrap_err();
        assert_eq!(
            error,
            GrammarError::UndeclaredType {
                row: 1,
                kind: "date".to_string(),
                reference: "numeral".to_string(),
            }
        );
    }

    #[test]
    fn test_evaluation_failure_is_marked_on_span() {
        let rows = rows(&[("numeral", "many", "lots")]);
        let parser = PatternParser::new("numeral", &rows, Arc::new(numeral_value), vec![]).unwrap();
        let positions = parser.parse("many many", ParseOptions::default());
        assert_eq!(positions.iter().flatten().count(), 2);
        assert!(
            positions
                .iter()
                .flatten()
                .all(|s| s.evaluated.as_ref().is_some_and(Evaluated::is_error))
        );
    }

    #[test]
    fn test_dictionary_includes_children() {
        let dictionary = dates().dictionary();
        for word in ["of", "march", "twenty", "five", "and"] {
            assert!(dictionary.contains(word), "{word}");
        }
    }

    #[test]
    fn test_search_groups_matches() {
        let segments = dates().search("died on five of March and buried");
        assert_eq!(segments.len(), 3);
        assert_eq!(
            segments[0],
            Segment::Text {
                text: "died on".to_string()
            }
        );
        assert_eq!(segments[1].text(), "five of March");
        assert_eq!(segments[1].matches().len(), 1);
        assert_eq!(segments[1].matches()[0].kind, "date");
        assert_eq!(segments[1].matches()[0].interpretation, vec!["five", "of", "march"]);
        assert_eq!(segments[2].text(), "and buried");
    }

    #[test]
    fn test_hide_overlap_keeps_first_of_identical() {
        let rows = rows(&[("numeral", "five", "5"), ("numeral", "five", "05")]);
        let parser = PatternParser::new("numeral", &rows, Arc::new(numeral_value), vec![]).unwrap();
        let positions = parser.parse("five", ParseOptions::default());
        assert_eq!(values(&positions), vec![("numeral".to_string(), "5".to_string())]);
    }

    #[test]
    fn test_overlap_only_compares_covering_spans() {
        let unfiltered = ParseOptions {
            hide_overlap: false,
            eval_values: false,
            ..ParseOptions::default()
        };

        let text = vec!["five"; 300].join(" ");
        let positions = numerals().parse(&text, unfiltered);
        assert_eq!(positions.iter().flatten().count(), 300);
        let overlap = find_hidden(&positions);
        assert!(overlap.hidden.is_empty());
        assert_eq!(overlap.text_checks, 0);

        let positions = numerals().parse("twenty five", unfiltered);
        assert_eq!(positions.iter().flatten().count(), 3);
        let overlap = find_hidden(&positions);
        assert_eq!(overlap.hidden.len(), 2);
        assert_eq!(overlap.text_checks, 2);
    }

    #[test]
    fn test_parser_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PatternParser>();
    }

    const VOCABULARY: &[&str] = &["one", "two", "five", "twenty", "thirty", "and", "of", "march", "on"];

    proptest! {
        #[test]
        fn prop_no_surviving_span_contains_a_shorter_one(
            words in prop::collection::vec(prop::sample::select(VOCABULARY), 0..8)
        ) {
            let positions = dates().parse(&words.join(" "), ParseOptions::default());
            let spans: Vec<&TokenSpan> = positions.iter().flatten().collect();
            for (i, outer) in spans.iter().enumerate() {
                for (j, inner) in spans.iter().enumerate() {
                    if i != j && outer.contains(inner) {
                        prop_assert!(outer.text().len() <= inner.text().len());
                    }
                }
            }
        }

        #[test]
        fn prop_captured_spans_never_surface(
            words in prop::collection::vec(prop::sample::select(VOCABULARY), 0..8)
        ) {
            let text = words.join(" ");
            let keep = ParseOptions { omit_captured: false, hide_overlap: false, eval_values: false };
            let omit = ParseOptions { hide_overlap: false, eval_values: false, ..ParseOptions::default() };

            let all = numerals().parse(&text, keep);
            let top = numerals().parse(&text, omit);
            prop_assert!(top.iter().flatten().all(|s| !s.is_captured));

            let uncaptured: Vec<Vec<TokenSpan>> = all
                .into_iter()
                .map(|spans| spans.into_iter().filter(|s| !s.is_captured).collect())
                .collect();
            prop_assert_eq!(uncaptured, top);
        }
    }
}
