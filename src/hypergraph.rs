//! Packed derivation forest.
//!
//! Items (OR-nodes) and deductions (AND-nodes / hyperedges) of one sentence
//! live in a single [`Forest`] arena and refer to each other by index. The
//! structure is a DAG ordered by span containment; dropping the
//! [`HyperGraph`] drops every node at once.

use crate::feature::DpState;
use crate::rule::{Rule, RuleId};
use crate::symbol::SymbolId;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;

/// Half-open input range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[inline]
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Span { start, end }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.start, self.end)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u32);

impl ItemId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeductionId(u32);

impl DeductionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Merge key of an item within one bin: two derivations with the same lhs
/// and the same feature states are interchangeable for every larger span.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub lhs: SymbolId,
    pub states: Vec<DpState>,
}

/// One rule application.
#[derive(Clone, Debug)]
pub struct Deduction {
    /// `None` for the synthetic edges that unwrap the goal item.
    rule: Option<Arc<Rule>>,
    antecedents: Vec<ItemId>,
    best_cost: f64,
    transition_cost: f64,
}

impl Deduction {
    pub fn new(rule: Option<Arc<Rule>>, antecedents: Vec<ItemId>, best_cost: f64, transition_cost: f64) -> Self {
        Deduction {
            rule,
            antecedents,
            best_cost,
            transition_cost,
        }
    }

    pub fn rule(&self) -> Option<&Arc<Rule>> {
        self.rule.as_ref()
    }

    pub fn rule_id(&self) -> Option<RuleId> {
        self.rule.as_ref().map(|r| r.id())
    }

    pub fn antecedents(&self) -> &[ItemId] {
        &self.antecedents
    }

    /// Cost of the best derivation that uses this deduction at the top.
    pub fn best_cost(&self) -> f64 {
        self.best_cost
    }

    /// `best_cost` minus the best costs of the antecedents.
    pub fn transition_cost(&self) -> f64 {
        self.transition_cost
    }

    /// Strictly cheaper, or equally cheap with a lower rule id.
    fn beats(&self, other: &Deduction) -> bool {
        self.best_cost < other.best_cost
            || (self.best_cost == other.best_cost && self.rule_id() < other.rule_id())
    }
}

/// An equivalence class of derivations over one span.
#[derive(Clone, Debug)]
pub struct Item {
    span: Span,
    signature: Signature,
    deductions: Vec<DeductionId>,
    best: DeductionId,
    best_cost: f64,
    future_cost: f64,
}

impl Item {
    pub fn span(&self) -> Span {
        self.span
    }

    pub fn lhs(&self) -> SymbolId {
        self.signature.lhs
    }

    pub fn states(&self) -> &[DpState] {
        &self.signature.states
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn deductions(&self) -> &[DeductionId] {
        &self.deductions
    }

    pub fn best_deduction(&self) -> DeductionId {
        self.best
    }

    pub fn best_cost(&self) -> f64 {
        self.best_cost
    }

    pub fn future_cost(&self) -> f64 {
        self.future_cost
    }

    /// Inside cost plus outside estimate; the key bins sort and prune by.
    pub fn est_total_cost(&self) -> f64 {
        self.best_cost + self.future_cost
    }
}

/// Arena holding every item and deduction built for one sentence.
#[derive(Clone, Debug, Default)]
pub struct Forest {
    items: Vec<Item>,
    deductions: Vec<Deduction>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(&self, id: ItemId) -> &Item {
        &self.items[id.index()]
    }

    pub fn deduction(&self, id: DeductionId) -> &Deduction {
        &self.deductions[id.index()]
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn num_deductions(&self) -> usize {
        self.deductions.len()
    }

    fn push_deduction(&mut self, deduction: Deduction) -> DeductionId {
        let id = DeductionId(self.deductions.len() as u32);
        self.deductions.push(deduction);
        id
    }

    /// Create an item whose first deduction is `deduction`.
    pub fn new_item(&mut self, span: Span, signature: Signature, future_cost: f64, deduction: Deduction) -> ItemId {
        let best_cost = deduction.best_cost;
        let best = self.push_deduction(deduction);
        let id = ItemId(self.items.len() as u32);
        self.items.push(Item {
            span,
            signature,
            deductions: vec![best],
            best,
            best_cost,
            future_cost,
        });
        id
    }

    /// Append a deduction to `item`; returns true if it became the best one.
    pub fn add_deduction(&mut self, item: ItemId, deduction: Deduction) -> bool {
        self.attach(item, deduction).1
    }

    /// Like [`Forest::add_deduction`], also returning the new deduction's id.
    pub fn attach(&mut self, item: ItemId, deduction: Deduction) -> (DeductionId, bool) {
        let improves = deduction.beats(self.deduction(self.item(item).best));
        let cost = deduction.best_cost;
        let dt = self.push_deduction(deduction);

        let node = &mut self.items[item.index()];
        node.deductions.push(dt);
        if improves {
            node.best = dt;
            node.best_cost = cost;
        }
        (dt, improves)
    }

    /// Recompute `dt`'s cost from the current best costs of its antecedents.
    ///
    /// Costs only go down. Returns true if `item`, the owner of `dt`, ends up
    /// with a cheaper best deduction.
    pub fn refresh_deduction(&mut self, item: ItemId, dt: DeductionId) -> bool {
        let deduction = &self.deductions[dt.index()];
        let inside: f64 = deduction
            .antecedents
            .iter()
            .map(|&a| self.items[a.index()].best_cost)
            .sum();
        let cost = inside + deduction.transition_cost;
        if cost >= deduction.best_cost {
            return false;
        }
        self.deductions[dt.index()].best_cost = cost;

        let best = self.item(item).best;
        let improves = best == dt || self.deduction(dt).beats(self.deduction(best));
        if improves {
            let node = &mut self.items[item.index()];
            node.best = dt;
            node.best_cost = cost;
        }
        improves
    }

    /// True if `target` is `from` or lies below it through deductions over
    /// the same span. Attaching a deduction from `from` to `target` would
    /// then close a cycle.
    pub fn reaches(&self, from: ItemId, target: ItemId) -> bool {
        let span = self.item(target).span;
        if self.item(from).span != span {
            return false;
        }
        let mut seen = FxHashSet::default();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            for &dt in &self.item(id).deductions {
                stack.extend(
                    self.deduction(dt)
                        .antecedents
                        .iter()
                        .copied()
                        .filter(|&a| self.item(a).span == span),
                );
            }
        }
        false
    }
}

/// A read-only tree of best deductions.
#[derive(Clone, Debug)]
pub struct Derivation {
    pub span: Span,
    pub lhs: SymbolId,
    pub rule: Option<Arc<Rule>>,
    pub cost: f64,
    pub children: Vec<Derivation>,
}

impl Derivation {
    /// Rule ids in pre-order; `None` marks unwrap edges.
    pub fn rule_ids(&self) -> Vec<Option<RuleId>> {
        let mut out = Vec::new();
        self.collect_rule_ids(&mut out);
        out
    }

    fn collect_rule_ids(&self, out: &mut Vec<Option<RuleId>>) {
        out.push(self.rule.as_ref().map(|r| r.id()));
        for child in &self.children {
            child.collect_rule_ids(out);
        }
    }

    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Derivation::size).sum::<usize>()
    }
}

/// The forest of one sentence rooted at a synthetic goal item.
#[derive(Clone, Debug)]
pub struct HyperGraph {
    forest: Forest,
    goal: ItemId,
    sentence_id: usize,
    sentence_len: usize,
}

impl HyperGraph {
    pub fn new(forest: Forest, goal: ItemId, sentence_id: usize, sentence_len: usize) -> Self {
        HyperGraph {
            forest,
            goal,
            sentence_id,
            sentence_len,
        }
    }

    pub fn goal(&self) -> ItemId {
        self.goal
    }

    pub fn goal_item(&self) -> &Item {
        self.forest.item(self.goal)
    }

    pub fn best_cost(&self) -> f64 {
        self.goal_item().best_cost()
    }

    pub fn sentence_id(&self) -> usize {
        self.sentence_id
    }

    pub fn sentence_len(&self) -> usize {
        self.sentence_len
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn item(&self, id: ItemId) -> &Item {
        self.forest.item(id)
    }

    pub fn deduction(&self, id: DeductionId) -> &Deduction {
        self.forest.deduction(id)
    }

    /// Items reachable from the goal, each listed once, children before
    /// parents.
    pub fn reachable_items(&self) -> Vec<ItemId> {
        let mut seen = vec![false; self.forest.num_items()];
        let mut order = Vec::new();
        // explicit stack: (item, expanded)
        let mut stack = vec![(self.goal, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if seen[id.index()] {
                continue;
            }
            seen[id.index()] = true;
            stack.push((id, true));
            for &dt in self.forest.item(id).deductions() {
                for &ant in self.forest.deduction(dt).antecedents() {
                    if !seen[ant.index()] {
                        stack.push((ant, false));
                    }
                }
            }
        }
        order
    }

    /// Follow best deductions down from the goal.
    pub fn best_derivation(&self) -> Derivation {
        self.derivation_of(self.goal)
    }

    fn derivation_of(&self, id: ItemId) -> Derivation {
        let item = self.forest.item(id);
        let dt = self.forest.deduction(item.best_deduction());
        Derivation {
            span: item.span(),
            lhs: item.lhs(),
            rule: dt.rule().cloned(),
            cost: dt.best_cost(),
            children: dt.antecedents().iter().map(|&a| self.derivation_of(a)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::GrammarId;
    use crate::symbol::Vocabulary;

    fn rule_with_id(vocab: &mut Vocabulary, seq: u32) -> Arc<Rule> {
        let x = vocab.nonterminal("X");
        let mut r = Rule::new(x, vocab.pattern("a"), vocab.pattern("a"), vec![]);
        r.set_id(RuleId { grammar: GrammarId(0), seq });
        Arc::new(r)
    }

    fn signature(vocab: &mut Vocabulary) -> Signature {
        Signature {
            lhs: vocab.nonterminal("X"),
            states: vec![],
        }
    }

    #[test]
    fn test_best_pointer_tracks_minimum() {
        let mut vocab = Vocabulary::new();
        let r = rule_with_id(&mut vocab, 0);
        let mut forest = Forest::new();
        let span = Span::new(0, 1);
        let item = forest.new_item(
            span,
            signature(&mut vocab),
            0.0,
            Deduction::new(Some(r.clone()), vec![], 3.0, 3.0),
        );

        assert!(!forest.add_deduction(item, Deduction::new(Some(r.clone()), vec![], 4.0, 4.0)));
        assert!(forest.add_deduction(item, Deduction::new(Some(r.clone()), vec![], 1.5, 1.5)));
        assert!(!forest.add_deduction(item, Deduction::new(Some(r), vec![], 2.0, 2.0)));

        let node = forest.item(item);
        assert_eq!(node.deductions().len(), 4);
        let min = node
            .deductions()
            .iter()
            .map(|&d| forest.deduction(d).best_cost())
            .fold(f64::INFINITY, f64::min);
        assert_eq!(forest.deduction(node.best_deduction()).best_cost(), min);
        assert_eq!(node.best_cost(), 1.5);
    }

    #[test]
    fn test_tie_prefers_lower_rule_id() {
        let mut vocab = Vocabulary::new();
        let late = rule_with_id(&mut vocab, 7);
        let early = rule_with_id(&mut vocab, 2);
        let later_still = rule_with_id(&mut vocab, 9);
        let mut forest = Forest::new();
        let item = forest.new_item(
            Span::new(0, 1),
            signature(&mut vocab),
            0.0,
            Deduction::new(Some(late), vec![], 1.0, 1.0),
        );

        assert!(forest.add_deduction(item, Deduction::new(Some(early), vec![], 1.0, 1.0)));
        assert!(!forest.add_deduction(item, Deduction::new(Some(later_still), vec![], 1.0, 1.0)));
        let best = forest.item(item).best_deduction();
        assert_eq!(forest.deduction(best).rule_id().map(|id| id.seq), Some(2));
    }

    #[test]
    fn test_reachable_and_derivation() {
        let mut vocab = Vocabulary::new();
        let r = rule_with_id(&mut vocab, 0);
        let mut forest = Forest::new();
        let sig = signature(&mut vocab);
        let a = forest.new_item(Span::new(0, 1), sig.clone(), 0.0, Deduction::new(Some(r.clone()), vec![], 1.0, 1.0));
        let b = forest.new_item(Span::new(1, 2), sig.clone(), 0.0, Deduction::new(Some(r.clone()), vec![], 1.0, 1.0));
        let top = forest.new_item(Span::new(0, 2), sig.clone(), 0.0, Deduction::new(Some(r), vec![a, b], 2.0, 0.0));
        let goal = forest.new_item(Span::new(0, 2), sig, 0.0, Deduction::new(None, vec![top], 2.0, 0.0));

        let hg = HyperGraph::new(forest, goal, 7, 2);
        let order = hg.reachable_items();
        assert_eq!(order.len(), 4);
        assert_eq!(*order.last().unwrap(), goal);

        let d = hg.best_derivation();
        assert_eq!(d.size(), 4);
        assert!(d.rule.is_none());
        assert_eq!(d.children[0].children.len(), 2);
        assert_eq!(hg.best_cost(), 2.0);
        assert_eq!(hg.sentence_id(), 7);
    }

    #[test]
    fn test_refresh_lowers_dependent_costs() {
        let mut vocab = Vocabulary::new();
        let r = rule_with_id(&mut vocab, 0);
        let mut forest = Forest::new();
        let sig = signature(&mut vocab);
        let span = Span::new(0, 1);
        let x = forest.new_item(span, sig.clone(), 0.0, Deduction::new(Some(r.clone()), vec![], 5.0, 5.0));
        let y = forest.new_item(span, sig.clone(), 0.0, Deduction::new(Some(r.clone()), vec![x], 5.5, 0.5));
        let fed = forest.item(y).best_deduction();

        // nothing changed below y
        assert!(!forest.refresh_deduction(y, fed));

        assert!(forest.add_deduction(x, Deduction::new(Some(r), vec![], 1.0, 1.0)));
        assert!(forest.refresh_deduction(y, fed));
        assert_eq!(forest.item(y).best_cost(), 1.5);
        let d = forest.deduction(fed);
        assert_eq!(d.best_cost(), d.transition_cost() + forest.item(x).best_cost());
    }

    #[test]
    fn test_reaches_within_span() {
        let mut vocab = Vocabulary::new();
        let r = rule_with_id(&mut vocab, 0);
        let mut forest = Forest::new();
        let sig = signature(&mut vocab);
        let a = forest.new_item(Span::new(0, 1), sig.clone(), 0.0, Deduction::new(Some(r.clone()), vec![], 1.0, 1.0));
        let x = forest.new_item(Span::new(0, 2), sig.clone(), 0.0, Deduction::new(Some(r.clone()), vec![a], 1.0, 0.0));
        let y = forest.new_item(Span::new(0, 2), sig, 0.0, Deduction::new(Some(r), vec![x], 1.0, 0.0));

        assert!(forest.reaches(y, x));
        assert!(forest.reaches(x, x));
        assert!(!forest.reaches(x, y));
        // a smaller span never closes a cycle
        assert!(!forest.reaches(a, x));
    }
}
