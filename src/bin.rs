//! Per-span item containers.
//!
//! A [`Bin`] holds the items of one span. New deductions are scored, merged
//! into an existing item when their signature matches, and the bin is pruned
//! to a relative beam and a histogram cap after every insertion. Once a span
//! is complete the bin is sorted and its items grouped by lhs into
//! [`SuperItem`]s, the axes cube pruning walks along.

use crate::chart::ChartStats;
use crate::config::BeamConfig;
use crate::feature::FeatureSet;
use crate::hypergraph::{Deduction, DeductionId, Forest, Item, ItemId, Signature, Span};
use crate::rule::Rule;
use crate::symbol::SymbolId;
use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Slack above the worst survivor's cost once a bin is full. Anything
/// costlier is rejected on arrival; an exact tie is admitted and then
/// evicted by the (cost, id) order, which favours the older item.
const EPSILON: f64 = 1e-6;

/// All surviving items of one span with the same lhs, cheapest first.
#[derive(Clone, Debug)]
pub struct SuperItem {
    pub lhs: SymbolId,
    pub items: Vec<ItemId>,
}

/// Where a deduction landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Insertion {
    pub item: ItemId,
    pub deduction: DeductionId,
    /// The item is new or its best deduction changed.
    pub improved: bool,
}

/// Shared state a bin needs while inserting.
pub struct BinContext<'a> {
    pub forest: &'a mut Forest,
    pub features: &'a FeatureSet,
    pub stats: &'a mut ChartStats,
}

#[derive(Debug)]
pub struct Bin {
    span: Span,
    beam: BeamConfig,
    table: FxHashMap<Signature, ItemId>,
    /// Max-heap on (est_total_cost, id): the worst item is on top.
    heap: PriorityQueue<ItemId, (OrderedFloat<f64>, ItemId)>,
    cutoff: f64,
    sorted: Option<Vec<ItemId>>,
    super_items: Vec<SuperItem>,
    super_index: FxHashMap<SymbolId, usize>,
}

impl Default for Bin {
    fn default() -> Self {
        Bin::new(Span::new(0, 0), BeamConfig::default())
    }
}

fn key(item: &Item, id: ItemId) -> (OrderedFloat<f64>, ItemId) {
    (OrderedFloat(item.est_total_cost()), id)
}

impl Bin {
    pub fn new(span: Span, beam: BeamConfig) -> Self {
        Bin {
            span,
            beam,
            table: FxHashMap::default(),
            heap: PriorityQueue::new(),
            cutoff: f64::INFINITY,
            sorted: None,
            super_items: Vec::new(),
            super_index: FxHashMap::default(),
        }
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Candidates whose estimated total cost reaches this are discarded.
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// True while `id` has not been pruned from this bin.
    pub fn contains(&self, id: ItemId) -> bool {
        self.heap.get(&id).is_some()
    }

    pub fn get(&self, signature: &Signature) -> Option<ItemId> {
        self.table.get(signature).copied()
    }

    /// Live items in no particular order.
    pub fn items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.table.values().copied()
    }

    /// Apply a zero-arity rule.
    pub fn add_axiom(&mut self, cx: &mut BinContext<'_>, rule: &Arc<Rule>) -> Option<ItemId> {
        self.add_deduction(cx, rule, &[])
    }

    /// Score `rule` applied to `antecedents` and merge the result.
    ///
    /// Returns the item that now holds the deduction, or `None` if it was
    /// pruned before or after insertion.
    pub fn add_deduction(&mut self, cx: &mut BinContext<'_>, rule: &Arc<Rule>, antecedents: &[ItemId]) -> Option<ItemId> {
        self.insert(cx, rule, antecedents).map(|ins| ins.item)
    }

    /// [`Bin::add_deduction`] reporting which deduction was created.
    ///
    /// A deduction whose single antecedent already derives the matching item
    /// within this span is rejected, so unary chains never form a cycle.
    pub fn insert(&mut self, cx: &mut BinContext<'_>, rule: &Arc<Rule>, antecedents: &[ItemId]) -> Option<Insertion> {
        let scored = {
            let ants: Vec<&Item> = antecedents.iter().map(|&a| cx.forest.item(a)).collect();
            cx.features.score(rule, &ants, self.span)
        };
        cx.stats.scored_nodes += 1;

        let est = scored.est_total_cost();
        if est >= self.cutoff {
            cx.stats.prepruned_edges += 1;
            return None;
        }

        let deduction = Deduction::new(
            Some(Arc::clone(rule)),
            antecedents.to_vec(),
            scored.best_cost,
            scored.transition_cost,
        );
        let signature = Signature {
            lhs: rule.lhs(),
            states: scored.states,
        };

        let insertion = match self.table.get(&signature) {
            Some(&id) => {
                if let [ant] = antecedents {
                    if cx.forest.reaches(*ant, id) {
                        cx.stats.unary_cycles += 1;
                        return None;
                    }
                }
                cx.stats.merged += 1;
                let (dt, improved) = cx.forest.attach(id, deduction);
                if improved {
                    self.heap.change_priority(&id, key(cx.forest.item(id), id));
                }
                Insertion {
                    item: id,
                    deduction: dt,
                    improved,
                }
            }
            None => {
                cx.stats.added += 1;
                let id = cx.forest.new_item(self.span, signature.clone(), scored.future_cost, deduction);
                self.table.insert(signature, id);
                self.heap.push(id, key(cx.forest.item(id), id));
                Insertion {
                    item: id,
                    deduction: cx.forest.item(id).best_deduction(),
                    improved: true,
                }
            }
        };
        self.settle(cx, insertion.item);

        self.contains(insertion.item).then_some(insertion)
    }

    /// Re-cost `deduction` of `item` after one of its antecedents improved.
    /// Returns true if `item` is still live with a cheaper best deduction.
    pub fn refresh(&mut self, cx: &mut BinContext<'_>, item: ItemId, deduction: DeductionId) -> bool {
        if !self.contains(item) || !cx.forest.refresh_deduction(item, deduction) {
            return false;
        }
        self.heap.change_priority(&item, key(cx.forest.item(item), item));
        self.settle(cx, item);
        self.contains(item)
    }

    /// Tighten the cutoff around `changed` and prune.
    fn settle(&mut self, cx: &mut BinContext<'_>, changed: ItemId) {
        self.sorted = None;
        let est = cx.forest.item(changed).est_total_cost();
        self.cutoff = self.cutoff.min(est + self.beam.relative_threshold);
        self.prune(cx);
    }

    fn prune(&mut self, cx: &mut BinContext<'_>) {
        while let Some((_, &(worst, _))) = self.heap.peek() {
            if self.heap.len() <= self.beam.max_items && worst.0 < self.cutoff {
                break;
            }
            if let Some((id, _)) = self.heap.pop() {
                self.table.remove(cx.forest.item(id).signature());
                cx.stats.pruned_items += 1;
            }
        }
        if self.heap.len() == self.beam.max_items {
            if let Some((_, &(worst, _))) = self.heap.peek() {
                self.cutoff = self.cutoff.min(worst.0 + EPSILON);
            }
        }
    }

    /// Sort the live items by (est_total_cost, id) and regroup the super
    /// items. A no-op if nothing changed since the last call.
    pub fn ensure_sorted(&mut self, forest: &Forest) {
        if self.sorted.is_some() {
            return;
        }
        let mut items: Vec<ItemId> = self.table.values().copied().collect();
        items.sort_by_key(|&id| key(forest.item(id), id));

        self.super_items.clear();
        self.super_index.clear();
        for &id in &items {
            let lhs = forest.item(id).lhs();
            let slot = *self.super_index.entry(lhs).or_insert_with(|| {
                self.super_items.push(SuperItem { lhs, items: Vec::new() });
                self.super_items.len() - 1
            });
            self.super_items[slot].items.push(id);
        }
        self.sorted = Some(items);
    }

    /// Items cheapest first; empty until [`Bin::ensure_sorted`] has run.
    pub fn sorted_items(&self) -> &[ItemId] {
        debug_assert!(self.sorted.is_some() || self.table.is_empty());
        self.sorted.as_deref().unwrap_or(&[])
    }

    /// Super items in order of their cheapest member.
    pub fn super_items(&self) -> &[SuperItem] {
        &self.super_items
    }

    pub fn super_item(&self, lhs: SymbolId) -> Option<&SuperItem> {
        self.super_index.get(&lhs).map(|&i| &self.super_items[i])
    }
}

/// The `(n + 1) x (n + 1)` upper-triangular grid of bins of one sentence.
#[derive(Debug)]
pub struct BinGrid {
    n: usize,
    bins: Vec<Bin>,
}

impl BinGrid {
    pub fn new(n: usize, beam: &BeamConfig) -> Self {
        let mut bins = Vec::with_capacity((n + 1) * (n + 1));
        for i in 0..=n {
            for j in 0..=n {
                bins.push(Bin::new(Span::new(i, i.max(j)), beam.clone()));
            }
        }
        BinGrid { n, bins }
    }

    #[inline]
    fn index(&self, span: Span) -> usize {
        debug_assert!(span.end <= self.n);
        span.start * (self.n + 1) + span.end
    }

    pub fn get(&self, span: Span) -> &Bin {
        &self.bins[self.index(span)]
    }

    pub fn get_mut(&mut self, span: Span) -> &mut Bin {
        let i = self.index(span);
        &mut self.bins[i]
    }

    /// Move a bin out so it can be filled while its sub-spans are read.
    pub fn take(&mut self, span: Span) -> Bin {
        std::mem::take(self.get_mut(span))
    }

    pub fn put(&mut self, bin: Bin) {
        let span = bin.span();
        *self.get_mut(span) = bin;
    }
}
