//! Incremental chart parser over the token lattice.
//!
//! The agenda is the ordered list of compiled rows. Rows are grouped into
//! layers: a row that contains a backreference, or that refers to a type
//! produced earlier in the current layer, opens a new one. Each layer makes
//! one left-to-right pass over the lattice (position by position, then
//! interpretation by interpretation, then subtoken by subtoken) and every
//! span it completes lands in the chart before the next layer starts. A
//! reference therefore always finds its spans already complete, without any
//! backtracking.

use std::collections::{BTreeMap, HashSet};
use std::iter;
use std::ops::Range;

use tracing::{debug, trace};

use crate::matcher::{Fit, MatcherState, PatternMatcher, SpanId, TokenSpan};
use crate::tokenizer::FragmentedToken;

// ── Chart ────────────────────────────────────────────────────────────────

/// Completed spans, indexed by start position.
#[derive(Debug, Clone, Default)]
pub struct Chart {
    spans: Vec<TokenSpan>,
    starts: BTreeMap<usize, Vec<SpanId>>,
}

impl Chart {
    /// Store a completed span. A span with the same interval, type and value
    /// is only stored once; its id is returned instead.
    pub fn insert(&mut self, mut span: TokenSpan) -> SpanId {
        if let Some(existing) = self.find(&span) {
            return existing;
        }
        let id = self.spans.len();
        span.id = Some(id);
        self.starts.entry(span.start).or_default().push(id);
        self.spans.push(span);
        id
    }

    fn find(&self, span: &TokenSpan) -> Option<SpanId> {
        self.starts
            .get(&span.start)?
            .iter()
            .copied()
            .find(|&id| self.spans[id].same_match(span))
    }

    pub fn starting_at(&self, position: usize) -> impl Iterator<Item = &TokenSpan> {
        self.starts
            .get(&position)
            .into_iter()
            .flatten()
            .map(|&id| &self.spans[id])
    }

    /// Spans starting exactly at one subtoken of one interpretation.
    fn at(&self, position: usize, interpretation: usize, subtoken: usize) -> Vec<TokenSpan> {
        self.starting_at(position)
            .filter(|s| s.start_interpretation == interpretation && s.start_subtoken == subtoken)
            .cloned()
            .collect()
    }

    pub fn capture(&mut self, ids: impl IntoIterator<Item = SpanId>) {
        for id in ids {
            if let Some(span) = self.spans.get_mut(id) {
                span.is_captured = true;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Per-position lists of completed spans, in the order they completed.
    pub fn into_positions(self, positions: usize) -> Vec<Vec<TokenSpan>> {
        let mut slots: Vec<Option<TokenSpan>> = self.spans.into_iter().map(Some).collect();
        (0..positions)
            .map(|position| {
                self.starts
                    .get(&position)
                    .into_iter()
                    .flatten()
                    .filter_map(|&id| slots[id].take())
                    .collect()
            })
            .collect()
    }
}

// ── Counters ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    steps: usize,
    advanced: usize,
    backref_branches: usize,
    completed: usize,
}

// ── Chart parser ─────────────────────────────────────────────────────────

/// Drives the matchers of one agenda across one lattice. Created per parse;
/// the agenda is borrowed from the immutable parser configuration.
pub struct ChartParser<'a> {
    agenda: &'a [PatternMatcher],
    layers: Vec<Range<usize>>,
    lattice: &'a [FragmentedToken],
    chart: Chart,
    stats: Stats,
}

impl<'a> ChartParser<'a> {
    pub fn new(agenda: &'a [PatternMatcher]) -> Self {
        Self {
            agenda,
            layers: plan_layers(agenda),
            lattice: &[],
            chart: Chart::default(),
            stats: Stats::default(),
        }
    }

    /// Forget the lattice and every completed span.
    pub fn reset(&mut self) {
        self.lattice = &[];
        self.chart = Chart::default();
        self.stats = Stats::default();
    }

    pub fn input(&mut self, lattice: &'a [FragmentedToken]) {
        self.lattice = lattice;
    }

    /// Add a span completed elsewhere (a dependency parser's result) before
    /// processing starts.
    pub fn inject(&mut self, span: TokenSpan) -> SpanId {
        self.chart.insert(span)
    }

    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    pub fn into_chart(self) -> Chart {
        self.chart
    }

    pub fn layers(&self) -> &[Range<usize>] {
        &self.layers
    }

    /// Run every layer over the whole lattice.
    pub fn process_all(&mut self) {
        let agenda = self.agenda;
        for layer in self.layers.clone() {
            self.process_layer(&agenda[layer]);
        }
        debug!(
            positions = self.lattice.len(),
            layers = self.layers.len(),
            steps = self.stats.steps,
            advanced = self.stats.advanced,
            backref_branches = self.stats.backref_branches,
            completed = self.stats.completed,
            spans = self.chart.len(),
            "chart parsed"
        );
    }

    fn process_layer(&mut self, matchers: &'a [PatternMatcher]) {
        let mut active: Vec<MatcherState<'a>> = Vec::new();
        let lattice = self.lattice;

        for (position, token) in lattice.iter().enumerate() {
            for (interpretation, subtokens) in token.interpretations.iter().enumerate() {
                for subtoken in 0..subtokens.len() {
                    self.step(matchers, &mut active, position, interpretation, subtoken);
                }
            }
            // a state that found no continuation within this position is dead
            active.retain(|state| state.continuation().is_some_and(|next| next > position));
        }
    }

    /// Offer the subtoken at one lattice point, and every span completed at
    /// that point, to the carried-over states and to one fresh state per
    /// matcher of the layer.
    fn step(
        &mut self,
        matchers: &'a [PatternMatcher],
        active: &mut Vec<MatcherState<'a>>,
        position: usize,
        interpretation: usize,
        subtoken: usize,
    ) {
        self.stats.steps += 1;
        let leaf = TokenSpan::leaf(self.lattice, position, interpretation, subtoken);
        let completed = self.chart.at(position, interpretation, subtoken);
        let fresh: Vec<MatcherState<'a>> = matchers.iter().map(MatcherState::new).collect();

        let mut advanced = Vec::new();
        let mut finished = Vec::new();
        for state in active.iter().chain(fresh.iter()) {
            for span in iter::once(&leaf).chain(completed.iter()) {
                let fit = state.test(span);
                if !fit.matched() {
                    continue;
                }
                if fit == Fit::Backref {
                    self.stats.backref_branches += 1;
                }
                let mut next = state.clone();
                if next.next(span) {
                    finished.push(next);
                } else {
                    advanced.push(next);
                }
            }
        }

        self.stats.advanced += advanced.len();
        active.extend(advanced);

        // committed after the step, so a layer never consumes its own spans
        for state in finished {
            self.chart.capture(state.consumed());
            let span = state.emit();
            trace!(
                kind = span.kind.as_deref().unwrap_or_default(),
                start = span.start,
                last = span.last,
                text = %span.text(),
                value = %span.value,
                "completed"
            );
            self.stats.completed += 1;
            self.chart.insert(span);
        }
    }
}

/// Split the agenda wherever a row depends on spans the current layer
/// produces.
fn plan_layers(agenda: &[PatternMatcher]) -> Vec<Range<usize>> {
    let mut layers = Vec::new();
    let mut start = 0;
    let mut produced: HashSet<&str> = HashSet::new();

    for (index, matcher) in agenda.iter().enumerate() {
        let depends_on_layer =
            matcher.has_backref() || matcher.references().any(|kind| produced.contains(kind));
        if depends_on_layer && index > start {
            layers.push(start..index);
            start = index;
            produced.clear();
        }
        produced.insert(&matcher.kind);
    }
    if start < agenda.len() {
        layers.push(start..agenda.len());
    }
    layers
}
