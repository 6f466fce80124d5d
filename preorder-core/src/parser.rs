use std::collections::BinaryHeap;

use rayon::prelude::*;

use crate::constraint::Constraint;
use crate::features::{self, MAX_FEATURES};
use crate::fingerprint::Fingerprint;
use crate::model::Model;
use crate::sentence::Sentence;

/// Orientation of a split: straight keeps the children in source order,
/// inverted swaps them in the output permutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Orientation {
    Straight,
    Inverted,
}

impl Orientation {
    /// Index into the orientation-parallel weight tables.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Orientation::Straight => 0,
            Orientation::Inverted => 1,
        }
    }
}

/// One transition: split the top-of-stack span at `pivot` with the given
/// orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParserAction {
    pub pivot: usize,
    pub orientation: Orientation,
}

impl ParserAction {
    pub fn new(pivot: usize, orientation: Orientation) -> ParserAction {
        ParserAction { pivot, orientation }
    }
}

/// A contiguous span of source positions awaiting a split, tagged with the
/// index of the action that created it (`None` for the root span).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParserSpan {
    pub begin: usize,
    pub end: usize,
    pub action_id: Option<usize>,
}

impl ParserSpan {
    pub fn new(begin: usize, end: usize, action_id: usize) -> ParserSpan {
        ParserSpan {
            begin,
            end,
            action_id: Some(action_id),
        }
    }

    pub fn root(len: usize) -> ParserSpan {
        ParserSpan {
            begin: 0,
            end: len,
            action_id: None,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.end - self.begin
    }
}

/// A partial bracketing: the stack of open spans, the action history, the
/// accumulated score, and whether the history is still consistent with the
/// active constraint.
#[derive(Clone, Debug)]
pub struct ParserState {
    pub stack: Vec<ParserSpan>,
    pub actions: Vec<ParserAction>,
    pub score: f32,
    pub valid: bool,
}

impl ParserState {
    /// Initial state for a sentence of `len` tokens.
    pub fn new(len: usize) -> ParserState {
        let mut stack = Vec::new();
        if len >= 2 {
            stack.push(ParserSpan::root(len));
        }
        ParserState {
            stack,
            actions: Vec::new(),
            score: 0.0,
            valid: true,
        }
    }

    /// Apply `action` to the top-of-stack span: pop it, push the children
    /// that still need splitting (width >= 2, left first so the right child
    /// is split next), and append the action.
    pub fn advance(&mut self, action: ParserAction, score: f32, valid: bool) {
        self.score = score;
        self.valid = valid;
        let span = self.stack.pop().expect("advancing a state with no open span");
        if action.pivot - span.begin >= 2 {
            self.stack
                .push(ParserSpan::new(span.begin, action.pivot, self.actions.len()));
        }
        if span.end - action.pivot >= 2 {
            self.stack
                .push(ParserSpan::new(action.pivot, span.end, self.actions.len()));
        }
        self.actions.push(action);
    }

    fn derived(&self, action: ParserAction, score: f32, valid: bool) -> ParserState {
        let mut next = self.clone();
        next.advance(action, score, valid);
        next
    }
}

/// Bounded max-priority beam of parser states. Internally a min-heap on
/// score, so the weakest state is the eviction candidate; also tracks how
/// many constraint-consistent states it currently holds.
struct Agenda {
    heap: BinaryHeap<AgendaEntry>,
    capacity: usize,
    num_valid: usize,
}

struct AgendaEntry(ParserState);

impl PartialEq for AgendaEntry {
    fn eq(&self, other: &AgendaEntry) -> bool {
        self.0.score == other.0.score
    }
}
impl Eq for AgendaEntry {}
impl PartialOrd for AgendaEntry {
    fn partial_cmp(&self, other: &AgendaEntry) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for AgendaEntry {
    fn cmp(&self, other: &AgendaEntry) -> std::cmp::Ordering {
        // Reversed so the heap root is the lowest-scoring state.
        other.0.score.total_cmp(&self.0.score)
    }
}

impl Agenda {
    fn new(capacity: usize) -> Agenda {
        assert!(capacity >= 1, "beam width must be at least 1");
        Agenda {
            heap: BinaryHeap::with_capacity(capacity + 1),
            capacity,
            num_valid: 0,
        }
    }

    fn seed(&mut self, state: ParserState) {
        self.heap.push(AgendaEntry(state));
    }

    /// Admit the candidate derived from `state` by `action` if it beats the
    /// current minimum (or the beam has room), evicting the minimum if full.
    ///
    /// Ties go to the states already in the beam; a valid candidate gets no
    /// preference over an invalid one with the same score. Under an all-tied
    /// model this can displace every valid candidate on wide spans and force
    /// an early update even for a parsable constraint.
    fn offer(&mut self, state: &ParserState, action: ParserAction, score: f32, valid: bool) {
        if self.heap.len() >= self.capacity {
            match self.heap.peek() {
                Some(weakest) if score <= weakest.0.score => return,
                _ => {
                    if let Some(evicted) = self.heap.pop() {
                        if evicted.0.valid {
                            self.num_valid -= 1;
                        }
                    }
                }
            }
        }
        if valid {
            self.num_valid += 1;
        }
        self.heap.push(AgendaEntry(state.derived(action, score, valid)));
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn num_valid(&self) -> usize {
        self.num_valid
    }

    fn drain(&mut self) -> impl Iterator<Item = ParserState> + '_ {
        self.heap.drain().map(|entry| entry.0)
    }

    /// All states in descending score order.
    fn into_sorted(self) -> Vec<ParserState> {
        let mut states: Vec<ParserState> = self.heap.into_iter().map(|entry| entry.0).collect();
        states.sort_by(|a, b| b.score.total_cmp(&a.score));
        states
    }

    /// The highest-scoring state.
    fn into_best(self) -> ParserState {
        self.heap
            .into_iter()
            .map(|entry| entry.0)
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .expect("taking the best state of an empty agenda")
    }
}

/// Per-position running min/max of constraint tiers over a span, from the
/// left (`lmin`/`lmax`) and from the right (`rmin`/`rmax`); -1 where no
/// constrained position has been seen yet.
fn precalculate_span(span: &ParserSpan, constraint: &Constraint) -> [Vec<i32>; 4] {
    let width = span.width();
    let mut lmin = vec![-1i32; width];
    let mut lmax = vec![-1i32; width];
    let mut rmin = vec![-1i32; width];
    let mut rmax = vec![-1i32; width];
    let mut cur_min = -1i32;
    let mut cur_max = -1i32;
    for i in 0..width {
        let tier = constraint.tier(span.begin + i);
        if tier >= 0 {
            if cur_min < 0 || tier < cur_min {
                cur_min = tier;
            }
            if cur_max < 0 || tier > cur_max {
                cur_max = tier;
            }
        }
        lmin[i] = cur_min;
        lmax[i] = cur_max;
    }
    cur_min = -1;
    cur_max = -1;
    for i in (0..width).rev() {
        let tier = constraint.tier(span.begin + i);
        if tier >= 0 {
            if cur_min < 0 || tier < cur_min {
                cur_min = tier;
            }
            if cur_max < 0 || tier > cur_max {
                cur_max = tier;
            }
        }
        rmin[i] = cur_min;
        rmax[i] = cur_max;
    }
    [lmin, lmax, rmin, rmax]
}

/// Output of one beam search: the surviving action sequences in descending
/// score order and, when a constraint was supplied, the best
/// constraint-consistent sequence reached (empty if none survived the first
/// transition).
#[derive(Debug)]
pub struct ParseResult {
    pub nbest: Vec<Vec<ParserAction>>,
    pub oracle: Vec<ParserAction>,
}

/// Output rendering for parsed sentences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Space-separated `pivot-orientation` transitions.
    Action,
    /// The permuted original token indices.
    Order,
}

/// Agenda-based best-first transition parser over binary bracketings.
pub struct Parser {
    beam: usize,
}

impl Parser {
    pub fn new(beam: usize) -> Parser {
        Parser { beam }
    }

    /// Beam-search the highest-scoring action sequences for `sentence`.
    ///
    /// With a constraint, additionally tracks the best constraint-consistent
    /// candidate per depth as the oracle and stops early the moment no
    /// consistent candidate survives in the beam (early update).
    pub fn parse(
        &self,
        sentence: &Sentence,
        constraint: Option<&Constraint>,
        model: &Model,
    ) -> ParseResult {
        let length = sentence.len();
        let mut old_agenda = Agenda::new(self.beam);
        old_agenda.seed(ParserState::new(length));
        let mut oracle: Vec<ParserAction> = Vec::new();
        let mut features: Vec<Fingerprint> = Vec::with_capacity(MAX_FEATURES);

        for depth in 0..length.saturating_sub(1) {
            let mut new_agenda = Agenda::new(self.beam);
            let mut oracle_score = f32::NEG_INFINITY;
            if constraint.is_some() {
                oracle.clear();
            }
            for state in old_agenda.drain() {
                let span = *state
                    .stack
                    .last()
                    .expect("parser state ran out of open spans mid-search");
                let parent = span.action_id.map(|id| state.actions[id]);
                let bounds = constraint.map(|c| precalculate_span(&span, c));
                for pivot in span.begin + 1..span.end {
                    features::extract(sentence, parent.as_ref(), &span, pivot, &mut features);
                    let (straight_ok, inverted_ok) = match &bounds {
                        None => (false, false),
                        Some([lmin, lmax, rmin, rmax]) => {
                            let li = pivot - 1 - span.begin;
                            let ri = pivot - span.begin;
                            (
                                state.valid
                                    && (lmax[li] < 0 || rmin[ri] < 0 || lmax[li] <= rmin[ri]),
                                state.valid
                                    && (rmax[ri] < 0 || lmin[li] < 0 || rmax[ri] <= lmin[li]),
                            )
                        }
                    };
                    self.add_state(
                        &state,
                        &features,
                        ParserAction::new(pivot, Orientation::Straight),
                        straight_ok,
                        &mut new_agenda,
                        &mut oracle_score,
                        &mut oracle,
                        model,
                    );
                    self.add_state(
                        &state,
                        &features,
                        ParserAction::new(pivot, Orientation::Inverted),
                        inverted_ok,
                        &mut new_agenda,
                        &mut oracle_score,
                        &mut oracle,
                        model,
                    );
                }
            }
            assert!(
                !new_agenda.is_empty(),
                "no candidates produced at depth {depth} for a {length}-token sentence"
            );
            old_agenda = new_agenda;
            if constraint.is_some() && old_agenda.num_valid() == 0 {
                // Early update: no consistent candidate survived; return the
                // best wrong continuation against the oracle prefix.
                return ParseResult {
                    nbest: vec![old_agenda.into_best().actions],
                    oracle,
                };
            }
        }

        let mut nbest = Vec::new();
        for state in old_agenda.into_sorted() {
            assert!(
                length == 0 || state.actions.len() == length - 1,
                "final state has {} actions for a {}-token sentence",
                state.actions.len(),
                length
            );
            assert!(state.stack.is_empty(), "final state left open spans");
            nbest.push(state.actions);
        }
        ParseResult { nbest, oracle }
    }

    /// Score one candidate, fold it into the oracle accumulator if it is the
    /// best valid candidate of this depth, and offer it to the beam.
    #[allow(clippy::too_many_arguments)]
    fn add_state(
        &self,
        state: &ParserState,
        features: &[Fingerprint],
        action: ParserAction,
        valid: bool,
        agenda: &mut Agenda,
        oracle_score: &mut f32,
        oracle: &mut Vec<ParserAction>,
        model: &Model,
    ) {
        let mut score = state.score;
        for &feature in features {
            score += model.weight(action.orientation, feature);
        }
        if valid && score > *oracle_score {
            *oracle_score = score;
            oracle.clear();
            oracle.extend_from_slice(&state.actions);
            oracle.push(action);
        }
        agenda.offer(state, action, score, valid);
    }

    /// Parse many sentences in parallel (beam search itself stays
    /// single-threaded per sentence) and render each one.
    pub fn permute(
        &self,
        sentences: &[Sentence],
        format: OutputFormat,
        model: &Model,
    ) -> Vec<String> {
        sentences
            .par_iter()
            .map(|sentence| self.render(sentence, format, model))
            .collect()
    }

    fn render(&self, sentence: &Sentence, format: OutputFormat, model: &Model) -> String {
        let result = self.parse(sentence, None, model);
        let actions = &result.nbest[0];
        match format {
            OutputFormat::Action => actions_to_string(actions),
            OutputFormat::Order => indices_to_string(&reordered_indices(actions)),
        }
    }
}

/// Render an action sequence as space-separated `pivot-orientation` tokens,
/// orientation written as 0 (straight) or 1 (inverted).
pub fn actions_to_string(actions: &[ParserAction]) -> String {
    let mut out = String::new();
    for (i, action) in actions.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{}-{}", action.pivot, action.orientation.index()));
    }
    out
}

/// Permutation of the original token indices induced by an action sequence.
///
/// Replays the action tree, then traverses its nodes bottom-up and
/// right-to-left; every inverted node swaps the order of its children's index
/// ranges in the output.
pub fn reordered_indices(actions: &[ParserAction]) -> Vec<usize> {
    let mut state = ParserState::new(actions.len() + 1);
    let mut subtrees = Vec::with_capacity(actions.len());
    for action in actions {
        let span = *state.stack.last().expect("action replay ran out of spans");
        subtrees.push((span.begin, span.end, action.pivot, action.orientation));
        state.advance(*action, 0.0, false);
    }
    let mut order: Vec<usize> = (0..actions.len() + 1).collect();
    for &(begin, end, pivot, orientation) in subtrees.iter().rev() {
        if orientation == Orientation::Inverted {
            order[begin..end].rotate_left(pivot - begin);
        }
    }
    order
}

/// Space-joined indices with a trailing separator (the line format downstream
/// reordering scripts consume).
pub fn indices_to_string(order: &[usize]) -> String {
    let mut out = String::new();
    for index in order {
        out.push_str(&format!("{index} "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::Alignment;

    fn sentence(tokens: &str) -> Sentence {
        Sentence::from_line(tokens, 1)
    }

    fn constraint(line: &str) -> Constraint {
        Constraint::derive(&Alignment::parse(line).unwrap()).unwrap()
    }

    #[test]
    fn unconstrained_parse_produces_complete_derivations() {
        let s = sentence("a b c d e");
        let parser = Parser::new(20);
        let result = parser.parse(&s, None, &Model::new());
        assert!(!result.nbest.is_empty());
        for actions in &result.nbest {
            assert_eq!(actions.len(), s.len() - 1);
        }
        // Without a constraint no oracle is tracked.
        assert!(result.oracle.is_empty());
    }

    #[test]
    fn nbest_is_sorted_by_score() {
        let s = sentence("a b c d");
        let parser = Parser::new(20);
        let mut model = Model::new();
        // Bias a few splits so scores differ.
        let mut feats = Vec::new();
        features::extract(&s, None, &ParserSpan::root(4), 2, &mut feats);
        model.bump_raw(Orientation::Straight, feats[0], 1.5);
        let result = parser.parse(&s, None, &model);
        let parser_scores: Vec<f32> = result
            .nbest
            .iter()
            .map(|actions| {
                // Rescore by replay.
                let mut state = ParserState::new(s.len());
                let mut total = 0.0;
                for action in actions {
                    let span = *state.stack.last().unwrap();
                    let parent = span.action_id.map(|id| state.actions[id]);
                    let mut fs = Vec::new();
                    features::extract(&s, parent.as_ref(), &span, action.pivot, &mut fs);
                    for f in fs {
                        total += model.weight(action.orientation, f);
                    }
                    state.advance(*action, 0.0, false);
                }
                total
            })
            .collect();
        for pair in parser_scores.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn beam_width_bounds_the_nbest_list() {
        let s = sentence("a b c d e f");
        let parser = Parser::new(3);
        let result = parser.parse(&s, None, &Model::new());
        assert!(result.nbest.len() <= 3);
    }

    #[test]
    fn self_consistent_constraint_reaches_full_length() {
        // Short enough that every candidate of every depth fits in the beam,
        // so score ties cannot push the valid states out.
        let s = sentence("a b c d");
        let c = constraint("4-4 ||| 0-3 1-2 2-1 3-0");
        let parser = Parser::new(20);
        let result = parser.parse(&s, Some(&c), &Model::new());
        assert_eq!(result.oracle.len(), s.len() - 1);
        // The oracle derivation must reorder into the reversed sentence.
        assert_eq!(reordered_indices(&result.oracle), vec![3, 2, 1, 0]);
    }

    #[test]
    fn tied_scores_can_evict_all_valid_candidates() {
        // With an all-zero model every candidate ties and the beam keeps its
        // current members on ties, so once a depth produces more candidates
        // than the beam holds, the constraint-consistent states can all be
        // displaced and the parse ends in an early update.
        let s = sentence("a b c d e f");
        let c = constraint("6-6 ||| 0-5 1-4 2-3 3-2 4-1 5-0");
        let parser = Parser::new(20);
        let result = parser.parse(&s, Some(&c), &Model::new());
        assert_eq!(result.nbest.len(), 1);
        assert!(result.oracle.len() < s.len() - 1);
    }

    #[test]
    fn monotonic_constraint_oracle_is_identity() {
        let s = sentence("a b c");
        let c = constraint("3-3 ||| 0-0 1-1 2-2");
        let parser = Parser::new(20);
        let result = parser.parse(&s, Some(&c), &Model::new());
        assert_eq!(result.oracle.len(), 2);
        assert_eq!(reordered_indices(&result.oracle), vec![0, 1, 2]);
    }

    #[test]
    fn single_token_sentence_has_an_empty_derivation() {
        let s = sentence("a");
        let parser = Parser::new(20);
        let result = parser.parse(&s, None, &Model::new());
        assert_eq!(result.nbest.len(), 1);
        assert!(result.nbest[0].is_empty());
        assert_eq!(indices_to_string(&reordered_indices(&result.nbest[0])), "0 ");
    }

    #[test]
    fn zero_model_order_output_is_identity() {
        let s = sentence("a b c");
        let parser = Parser::new(20);
        let out = parser.permute(&[s], OutputFormat::Order, &Model::new());
        assert_eq!(out[0], "0 1 2 ");
    }

    #[test]
    fn action_format_renders_pivot_and_orientation() {
        let actions = vec![
            ParserAction::new(2, Orientation::Straight),
            ParserAction::new(1, Orientation::Inverted),
        ];
        assert_eq!(actions_to_string(&actions), "2-0 1-1");
        assert_eq!(actions_to_string(&[]), "");
    }

    #[test]
    fn inverted_nodes_swap_child_ranges() {
        // Root inverted at pivot 1 over 3 tokens: right child [1,3) is split
        // next; straight there. Output moves token 0 to the end.
        let actions = vec![
            ParserAction::new(1, Orientation::Inverted),
            ParserAction::new(2, Orientation::Straight),
        ];
        assert_eq!(reordered_indices(&actions), vec![1, 2, 0]);
    }
}
