//! Feature functions and weighted scoring of rule applications.
//!
//! The chart only sees features through [`FeatureFunction`]: a load-time
//! lower bound (`estimate`) and an exact, side-effect-free transition
//! (`compute`) that may carry dynamic-programming state. Stateless features
//! are folded into each rule's `stateless_cost` when the rule is estimated,
//! so only stateful features are evaluated while parsing.

use crate::hypergraph::{Item, Span};
use crate::rule::Rule;
use crate::symbol::{Symbol, SymbolId};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Boundary context an item exposes to stateful features.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DpState {
    pub left: Vec<SymbolId>,
    pub right: Vec<SymbolId>,
}

/// Result of applying one feature to one rule application.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transition {
    pub cost: f64,
    pub future_cost: f64,
    pub state: DpState,
}

impl Transition {
    pub fn stateless(cost: f64) -> Self {
        Transition {
            cost,
            ..Transition::default()
        }
    }
}

/// A weighted feature.
///
/// For stateless features `estimate` must be exact: it is the only value the
/// chart ever asks for.
pub trait FeatureFunction: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn weight(&self) -> f64;

    fn is_stateful(&self) -> bool {
        false
    }

    /// Unweighted context-free lower bound of this feature on `rule`.
    fn estimate(&self, rule: &Rule) -> f64;

    /// Unweighted exact value of applying `rule` over `span` to antecedents
    /// whose states (for this feature) are `antecedents`, in source order.
    fn compute(&self, rule: &Rule, antecedents: &[&DpState], span: Span) -> Transition {
        let _ = (antecedents, span);
        Transition::stateless(self.estimate(rule))
    }

    /// Unweighted cost of closing off a complete derivation with `state`.
    fn final_cost(&self, state: &DpState) -> f64 {
        let _ = state;
        0.0
    }
}

/// Costs of one candidate node before it is placed in a bin.
#[derive(Clone, Debug, PartialEq)]
pub struct Scored {
    /// Cost of the best derivation through this deduction.
    pub best_cost: f64,
    /// Part of `best_cost` added by this rule application.
    pub transition_cost: f64,
    /// Outside estimate carried by the resulting item.
    pub future_cost: f64,
    /// One state per stateful feature.
    pub states: Vec<DpState>,
}

impl Scored {
    /// Ranking cost used by pruning.
    pub fn est_total_cost(&self) -> f64 {
        self.best_cost + self.future_cost
    }
}

/// The ordered list of features a decoder scores with.
#[derive(Clone, Debug, Default)]
pub struct FeatureSet {
    features: Vec<Arc<dyn FeatureFunction>>,
    stateful: Vec<usize>,
}

impl FeatureSet {
    pub fn new(features: Vec<Arc<dyn FeatureFunction>>) -> Self {
        let stateful = features
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_stateful())
            .map(|(i, _)| i)
            .collect();
        FeatureSet { features, stateful }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Number of state slots every item carries.
    pub fn num_states(&self) -> usize {
        self.stateful.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FeatureFunction>> {
        self.features.iter()
    }

    /// Fill in a rule's estimated and stateless costs.
    pub fn estimate(&self, rule: &mut Rule) {
        let mut est = 0.0;
        let mut stateless = 0.0;
        for ff in &self.features {
            let cost = ff.weight() * ff.estimate(rule);
            est += cost;
            if !ff.is_stateful() {
                stateless += cost;
            }
        }
        rule.set_costs(est, stateless);
    }

    /// Exact costs and states of applying `rule` over `span` to `antecedents`.
    pub fn score(&self, rule: &Rule, antecedents: &[&Item], span: Span) -> Scored {
        let inside: f64 = antecedents.iter().map(|a| a.best_cost()).sum();
        let mut transition = rule.stateless_cost();
        let mut future = 0.0;
        let mut states = Vec::with_capacity(self.stateful.len());

        for (slot, &f) in self.stateful.iter().enumerate() {
            let ff = &self.features[f];
            let ant_states: Vec<&DpState> = antecedents.iter().map(|a| &a.states()[slot]).collect();
            let t = ff.compute(rule, &ant_states, span);
            transition += ff.weight() * t.cost;
            future += ff.weight() * t.future_cost;
            states.push(t.state);
        }

        Scored {
            best_cost: inside + transition,
            transition_cost: transition,
            future_cost: future,
            states,
        }
    }

    /// Weighted cost of turning `item` into a complete derivation.
    pub fn final_cost(&self, item: &Item) -> f64 {
        self.stateful
            .iter()
            .enumerate()
            .map(|(slot, &f)| {
                let ff = &self.features[f];
                ff.weight() * ff.final_cost(&item.states()[slot])
            })
            .sum()
    }
}

/// Weighted sum of a rule's own translation-model scores.
#[derive(Clone, Debug)]
pub struct PhraseModel {
    weights: Vec<f64>,
}

impl PhraseModel {
    pub fn new(weights: Vec<f64>) -> Self {
        PhraseModel { weights }
    }
}

impl FeatureFunction for PhraseModel {
    fn name(&self) -> &str {
        "phrase_model"
    }

    fn weight(&self) -> f64 {
        1.0
    }

    fn estimate(&self, rule: &Rule) -> f64 {
        self.weights
            .iter()
            .zip(rule.scores())
            .map(|(w, s)| w * s)
            .sum()
    }
}

/// Counts target words.
#[derive(Clone, Debug)]
pub struct WordPenalty {
    weight: f64,
}

impl WordPenalty {
    pub fn new(weight: f64) -> Self {
        WordPenalty { weight }
    }
}

impl FeatureFunction for WordPenalty {
    fn name(&self) -> &str {
        "word_penalty"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn estimate(&self, rule: &Rule) -> f64 {
        rule.target_words() as f64
    }
}

/// Bigram cost over target word boundaries.
///
/// Items remember their first and last target word, so two derivations of
/// the same span and lhs only merge when they agree on both. Costs should be
/// non-negative for `estimate` to be a lower bound.
#[derive(Clone, Debug)]
pub struct BoundaryBigram {
    weight: f64,
    costs: FxHashMap<(SymbolId, SymbolId), f64>,
    unseen_cost: f64,
}

impl BoundaryBigram {
    pub fn new(weight: f64, unseen_cost: f64) -> Self {
        BoundaryBigram {
            weight,
            costs: FxHashMap::default(),
            unseen_cost,
        }
    }

    pub fn with_bigram(mut self, prev: SymbolId, next: SymbolId, cost: f64) -> Self {
        self.costs.insert((prev, next), cost);
        self
    }

    fn bigram(&self, prev: SymbolId, next: SymbolId) -> f64 {
        self.costs.get(&(prev, next)).copied().unwrap_or(self.unseen_cost)
    }
}

impl FeatureFunction for BoundaryBigram {
    fn name(&self) -> &str {
        "boundary_bigram"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn estimate(&self, rule: &Rule) -> f64 {
        rule.target()
            .windows(2)
            .map(|pair| match (pair[0], pair[1]) {
                (Symbol::Word(a), Symbol::Word(b)) => self.bigram(a, b),
                _ => 0.0,
            })
            .sum()
    }

    fn compute(&self, rule: &Rule, antecedents: &[&DpState], _span: Span) -> Transition {
        let mut cost = 0.0;
        let mut first = None;
        let mut last: Option<SymbolId> = None;

        let mut join = |left: SymbolId, right: SymbolId| {
            match last {
                Some(prev) => cost += self.bigram(prev, left),
                None => first = Some(left),
            }
            last = Some(right);
        };

        for symbol in rule.target() {
            match *symbol {
                Symbol::Word(w) => join(w, w),
                Symbol::Slot { index, .. } => {
                    let state = rule.antecedent_position(index).and_then(|p| antecedents.get(p));
                    if let Some((&l, &r)) =
                        state.and_then(|s| s.left.first().zip(s.right.last()))
                    {
                        join(l, r);
                    }
                }
            }
        }

        Transition {
            cost,
            future_cost: 0.0,
            state: DpState {
                left: first.into_iter().collect(),
                right: last.into_iter().collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Vocabulary;

    fn rule(vocab: &mut Vocabulary, src: &str, tgt: &str, scores: Vec<f64>) -> Rule {
        let x = vocab.nonterminal("X");
        Rule::new(x, vocab.pattern(src), vocab.pattern(tgt), scores)
    }

    #[test]
    fn test_estimate_splits_stateless_cost() {
        let mut vocab = Vocabulary::new();
        let the = vocab.terminal("the");
        let cat = vocab.terminal("cat");
        let features = FeatureSet::new(vec![
            Arc::new(PhraseModel::new(vec![1.0, 0.5])),
            Arc::new(WordPenalty::new(0.25)),
            Arc::new(BoundaryBigram::new(2.0, 1.0).with_bigram(the, cat, 0.1)),
        ]);
        let mut r = rule(&mut vocab, "le chat", "the cat", vec![2.0, 2.0]);
        features.estimate(&mut r);

        // phrase 3.0, penalty 0.5, bigram 2.0 * 0.1
        assert!((r.stateless_cost() - 3.5).abs() < 1e-10);
        assert!((r.est_cost() - 3.7).abs() < 1e-10);
        assert_eq!(features.num_states(), 1);
    }

    #[test]
    fn test_bigram_joins_antecedent_boundaries() {
        let mut vocab = Vocabulary::new();
        let a = vocab.terminal("a");
        let b = vocab.terminal("b");
        let c = vocab.terminal("c");
        let lm = BoundaryBigram::new(1.0, 5.0).with_bigram(a, b, 1.0).with_bigram(b, c, 2.0);
        let r = rule(&mut vocab, "[X,1] [X,2]", "[X,2] c", vec![]);

        let left = DpState { left: vec![a], right: vec![a] };
        let right = DpState { left: vec![a], right: vec![b] };
        let t = lm.compute(&r, &[&left, &right], Span::new(0, 2));

        // target yield: (a .. b) c  -> only the b c junction is new
        assert!((t.cost - 2.0).abs() < 1e-10);
        assert_eq!(t.state.left, vec![a]);
        assert_eq!(t.state.right, vec![c]);
    }

    #[test]
    fn test_bigram_follows_permuted_source_slots() {
        let mut vocab = Vocabulary::new();
        let a = vocab.terminal("a");
        let c = vocab.terminal("c");
        let of = vocab.terminal("of");
        let lm = BoundaryBigram::new(1.0, 5.0).with_bigram(a, of, 1.0).with_bigram(of, c, 2.0);
        let r = rule(&mut vocab, "[X,2] de [X,1]", "[X,1] of [X,2]", vec![]);

        // antecedents in source order: [X,2] spans "c", [X,1] spans "a"
        let first = DpState { left: vec![c], right: vec![c] };
        let second = DpState { left: vec![a], right: vec![a] };
        let t = lm.compute(&r, &[&first, &second], Span::new(0, 3));

        // target yield: a of c
        assert!((t.cost - 3.0).abs() < 1e-10);
        assert_eq!(t.state.left, vec![a]);
        assert_eq!(t.state.right, vec![c]);
    }

    #[test]
    fn test_bigram_unseen_cost() {
        let mut vocab = Vocabulary::new();
        let lm = BoundaryBigram::new(1.0, 5.0);
        let r = rule(&mut vocab, "x y", "p q r", vec![]);
        let t = lm.compute(&r, &[], Span::new(0, 2));
        assert!((t.cost - 10.0).abs() < 1e-10);
        assert!((lm.estimate(&r) - 10.0).abs() < 1e-10);
    }
}
