//! CKY chart driver.
//!
//! Spans are completed in order of increasing width. For each span every
//! grammar's dot chart is advanced, complete matches are combined with their
//! antecedents (exhaustively or by cube pruning), unary rules are closed over
//! the new bin, and matches that begin with the new items are started for
//! wider spans. The top bin is finally wrapped in a goal item.

use crate::bin::{Bin, BinContext, BinGrid};
use crate::config::Combination;
use crate::decoder::Decoder;
use crate::dot_chart::DotChart;
use crate::error::ChartError;
use crate::hypergraph::{Deduction, DeductionId, Forest, HyperGraph, ItemId, Signature, Span};
use crate::rule::{Rule, RuleId};
use crate::symbol::SymbolId;
use crate::trie::Grammar;
use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::VecDeque;
use std::sync::Arc;

/// Search counters of one chart.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChartStats {
    /// New items created.
    pub added: usize,
    /// Deductions attached to an existing item.
    pub merged: usize,
    /// Items evicted by beam or histogram pruning.
    pub pruned_items: usize,
    /// Deductions rejected before insertion.
    pub prepruned_edges: usize,
    /// Cube pruning loops stopped by the pop margin.
    pub prepruned_fuzz1: usize,
    /// Cube neighbours not enqueued because of the push margin.
    pub prepruned_fuzz2: usize,
    pub dot_items_added: usize,
    /// Calls into the feature functions.
    pub scored_nodes: usize,
    pub cube_pops: usize,
    pub unary_added: usize,
    /// Unary deductions dropped because they would close a cycle.
    pub unary_cycles: usize,
    /// Items whose unary re-costing hit the expansion cap.
    pub unary_capped: usize,
    /// Spans in the order they were completed.
    pub cells_completed: Vec<Span>,
}

/// A parsed sentence.
#[derive(Clone, Debug)]
pub struct ParseOutcome {
    pub hypergraph: HyperGraph,
    pub stats: ChartStats,
}

/// Parse state of one sentence.
pub struct Chart<'a> {
    decoder: &'a Decoder,
    sentence_id: usize,
    words: &'a [SymbolId],
    bins: BinGrid,
    dot_charts: Vec<DotChart>,
    forest: Forest,
    stats: ChartStats,
}

impl<'a> Chart<'a> {
    /// Set up a chart and seed fallback axioms and root dot items.
    pub fn new(decoder: &'a Decoder, sentence_id: usize, words: &'a [SymbolId]) -> Result<Self, ChartError> {
        if words.is_empty() {
            return Err(ChartError::EmptySentence);
        }
        let n = words.len();
        let mut chart = Chart {
            decoder,
            sentence_id,
            words,
            bins: BinGrid::new(n, &decoder.config().beam),
            dot_charts: Vec::with_capacity(decoder.grammars().len()),
            forest: Forest::new(),
            stats: ChartStats::default(),
        };

        for grammar in decoder.grammars() {
            let mut dots = DotChart::new(n);
            dots.seed(grammar.as_ref(), &mut chart.stats);
            chart.dot_charts.push(dots);
        }
        chart.seed_oov();

        tracing::debug!(sentence_id, length = n, items = chart.stats.added, "chart seeded");
        Ok(chart)
    }

    /// Fallback axioms `oov_lhs -> <w, w>` for each input word.
    fn seed_oov(&mut self) {
        let decoder = self.decoder;
        let oov = &decoder.config().oov;
        if !oov.enabled {
            return;
        }

        for (position, &word) in self.words.iter().enumerate() {
            if oov.true_oovs_only && translates(decoder.grammars(), word) {
                continue;
            }
            let mut scores = vec![0.0; oov.feature_index + 1];
            scores[oov.feature_index] = oov.cost;
            let mut rule = Rule::oov(decoder.oov_lhs(), word, word, scores, position);
            decoder.features().estimate(&mut rule);
            let rule = Arc::new(rule);

            let mut cx = BinContext {
                forest: &mut self.forest,
                features: decoder.features(),
                stats: &mut self.stats,
            };
            let span = Span::new(position, position + 1);
            self.bins.get_mut(span).add_axiom(&mut cx, &rule);
            tracing::trace!(%span, word = %word, "oov axiom");
        }
    }

    /// Fill every span and assemble the goal item.
    pub fn expand(mut self) -> Result<ParseOutcome, ChartError> {
        let n = self.words.len();
        for width in 1..=n {
            for i in 0..=n - width {
                self.complete_span(Span::new(i, i + width));
            }
        }
        self.finish()
    }

    fn complete_span(&mut self, span: Span) {
        tracing::debug!(%span, "completing span");
        let decoder = self.decoder;
        let grammars = decoder.grammars();
        let config = decoder.config();

        for (g, grammar) in grammars.iter().enumerate() {
            if grammar.has_rule_for_span(span) {
                self.dot_charts[g].expand_cell(grammar.as_ref(), span, self.words, &self.bins, &mut self.stats);
            }
        }

        let mut bin = self.bins.take(span);
        {
            let mut cx = BinContext {
                forest: &mut self.forest,
                features: decoder.features(),
                stats: &mut self.stats,
            };

            for (g, grammar) in grammars.iter().enumerate() {
                if !grammar.has_rule_for_span(span) {
                    continue;
                }
                for dot in self.dot_charts[g].cell(span) {
                    let Some(rules) = grammar.rules(dot.node) else {
                        continue;
                    };
                    if rules.arity == 0 {
                        for rule in rules.rules {
                            bin.add_axiom(&mut cx, rule);
                        }
                        continue;
                    }

                    debug_assert_eq!(rules.arity, dot.ants.len());
                    let axes: Vec<&[ItemId]> = dot
                        .ants
                        .iter()
                        .map(|a| {
                            self.bins
                                .get(a.span)
                                .super_item(a.lhs)
                                .map_or(&[][..], |s| s.items.as_slice())
                        })
                        .collect();
                    if axes.iter().any(|axis| axis.is_empty()) {
                        continue;
                    }

                    match config.combination {
                        Combination::Exhaustive => combine_exhaustive(&mut bin, &mut cx, rules.rules, &axes),
                        Combination::CubePrune { pop_limit } => {
                            let margins = (config.fuzz1, config.fuzz2);
                            combine_cube(&mut bin, &mut cx, rules.rules, &axes, pop_limit, margins)
                        }
                    }
                }
            }

            unary_closure(&mut bin, &mut cx, grammars, span);
            bin.ensure_sorted(cx.forest);
        }
        self.bins.put(bin);

        for (g, grammar) in grammars.iter().enumerate() {
            if grammar.has_rule_for_span(span) {
                self.dot_charts[g].start_dot_items(grammar.as_ref(), span, &self.bins, &mut self.stats);
            }
        }
        self.stats.cells_completed.push(span);
    }

    /// Wrap the top bin's items into a goal item with one unwrap deduction
    /// each.
    fn finish(mut self) -> Result<ParseOutcome, ChartError> {
        let n = self.words.len();
        let top = Span::new(0, n);
        let decoder = self.decoder;
        let features = decoder.features();

        let candidates: Vec<ItemId> = self
            .bins
            .get(top)
            .sorted_items()
            .iter()
            .copied()
            .filter(|&id| decoder.goal().map_or(true, |goal| self.forest.item(id).lhs() == goal))
            .collect();

        let Some((&first, rest)) = candidates.split_first() else {
            tracing::error!(
                sentence_id = self.sentence_id,
                length = n,
                "no complete item in the top cell; the grammar has no derivation \
                 covering the input or pruning was too aggressive"
            );
            return Err(ChartError::EmptyGoalCell {
                sentence_id: self.sentence_id,
                length: n,
            });
        };

        let unwrap_edge = |forest: &Forest, id: ItemId| {
            let item = forest.item(id);
            let final_cost = features.final_cost(item);
            Deduction::new(None, vec![id], item.best_cost() + final_cost, final_cost)
        };

        let signature = Signature {
            lhs: decoder.goal().unwrap_or_else(|| self.forest.item(first).lhs()),
            states: Vec::new(),
        };
        let first_edge = unwrap_edge(&self.forest, first);
        let goal = self.forest.new_item(top, signature, 0.0, first_edge);
        for &id in rest {
            let edge = unwrap_edge(&self.forest, id);
            self.forest.add_deduction(goal, edge);
        }

        let stats = self.stats;
        tracing::info!(
            sentence_id = self.sentence_id,
            length = n,
            added = stats.added,
            merged = stats.merged,
            pruned = stats.pruned_items,
            prepruned = stats.prepruned_edges,
            fuzz1 = stats.prepruned_fuzz1,
            fuzz2 = stats.prepruned_fuzz2,
            dot_items = stats.dot_items_added,
            best_cost = self.forest.item(goal).best_cost(),
            "sentence parsed"
        );

        Ok(ParseOutcome {
            hypergraph: HyperGraph::new(self.forest, goal, self.sentence_id, n),
            stats,
        })
    }
}

/// True if some grammar has a lexical rule for exactly `word`.
fn translates(grammars: &[Arc<dyn Grammar>], word: SymbolId) -> bool {
    grammars
        .iter()
        .any(|g| g.match_symbol(g.root(), word).is_some_and(|node| g.has_rules(node)))
}

/// Every rule with every combination of antecedents.
fn combine_exhaustive(bin: &mut Bin, cx: &mut BinContext<'_>, rules: &[Arc<Rule>], axes: &[&[ItemId]]) {
    let mut coord = vec![0usize; axes.len()];
    let mut ants = Vec::with_capacity(axes.len());
    for rule in rules {
        coord.fill(0);
        loop {
            ants.clear();
            ants.extend(axes.iter().zip(&coord).map(|(axis, &k)| axis[k]));
            bin.add_deduction(cx, rule, &ants);
            if !advance(&mut coord, axes) {
                break;
            }
        }
    }
}

/// Odometer step over the antecedent axes; false once it wraps around.
fn advance<T>(coord: &mut [usize], axes: &[&[T]]) -> bool {
    for (k, axis) in coord.iter_mut().zip(axes).rev() {
        *k += 1;
        if *k < axis.len() {
            return true;
        }
        *k = 0;
    }
    false
}

/// Lower bound of the candidate at `coord`: coordinate 0 indexes the rules,
/// coordinate `d + 1` indexes axis `d`.
fn cube_priority(forest: &Forest, rules: &[Arc<Rule>], axes: &[&[ItemId]], coord: &[usize]) -> f64 {
    let inside: f64 = axes
        .iter()
        .zip(&coord[1..])
        .map(|(axis, &k)| forest.item(axis[k]).best_cost())
        .sum();
    rules[coord[0]].est_cost() + inside
}

/// Best-first walk of the rule x antecedent cube from its cheapest corner.
fn combine_cube(
    bin: &mut Bin,
    cx: &mut BinContext<'_>,
    rules: &[Arc<Rule>],
    axes: &[&[ItemId]],
    pop_limit: usize,
    (fuzz1, fuzz2): (f64, f64),
) {
    let mut queue: PriorityQueue<Vec<usize>, Reverse<(OrderedFloat<f64>, u64)>> = PriorityQueue::new();
    let mut visited: FxHashSet<Vec<usize>> = FxHashSet::default();
    let mut seq = 0u64;

    let origin = vec![0usize; axes.len() + 1];
    let priority = cube_priority(cx.forest, rules, axes, &origin);
    visited.insert(origin.clone());
    queue.push(origin, Reverse((OrderedFloat(priority), seq)));

    let mut pops = 0;
    let mut ants = Vec::with_capacity(axes.len());
    while let Some((coord, Reverse((priority, _)))) = queue.pop() {
        if priority.0 >= bin.cutoff() + fuzz1 {
            cx.stats.prepruned_fuzz1 += 1;
            break;
        }
        pops += 1;
        cx.stats.cube_pops += 1;

        ants.clear();
        ants.extend(axes.iter().zip(&coord[1..]).map(|(axis, &k)| axis[k]));
        bin.add_deduction(cx, &rules[coord[0]], &ants);
        if pops >= pop_limit {
            break;
        }

        for dim in 0..coord.len() {
            let len = if dim == 0 { rules.len() } else { axes[dim - 1].len() };
            if coord[dim] + 1 >= len {
                continue;
            }
            let mut next = coord.clone();
            next[dim] += 1;
            if !visited.insert(next.clone()) {
                continue;
            }
            let priority = cube_priority(cx.forest, rules, axes, &next);
            if priority >= bin.cutoff() + fuzz2 {
                cx.stats.prepruned_fuzz2 += 1;
                continue;
            }
            seq += 1;
            queue.push(next, Reverse((OrderedFloat(priority), seq)));
        }
    }
}

/// Times one item may be expanded by the unary closure of a span.
const MAX_UNARY_EXPANSIONS: usize = 16;

/// Apply single-slot rules to the items of `bin` until the agenda is empty.
///
/// New items are queued, and so are items whose best deduction got cheaper.
/// Re-expanding an item re-costs the unary deductions it already fed instead
/// of adding them again. The bin rejects deductions that would close a
/// cycle, so every item is expanded at least once and the forest stays
/// acyclic.
fn unary_closure(bin: &mut Bin, cx: &mut BinContext<'_>, grammars: &[Arc<dyn Grammar>], span: Span) {
    bin.ensure_sorted(cx.forest);
    let mut agenda: VecDeque<ItemId> = bin.sorted_items().iter().copied().collect();
    let mut queued: FxHashSet<ItemId> = agenda.iter().copied().collect();
    let mut expansions: FxHashMap<ItemId, usize> = FxHashMap::default();
    let mut fed: FxHashMap<(RuleId, ItemId), (ItemId, DeductionId)> = FxHashMap::default();

    while let Some(id) = agenda.pop_front() {
        queued.remove(&id);
        if !bin.contains(id) {
            continue;
        }
        let count = expansions.entry(id).or_insert(0);
        if *count == MAX_UNARY_EXPANSIONS {
            cx.stats.unary_capped += 1;
            tracing::warn!(%span, item = id.index(), "unary closure stopped re-costing an item");
            continue;
        }
        *count += 1;

        let lhs = cx.forest.item(id).lhs();
        let mut changed = Vec::new();
        for grammar in grammars {
            if !grammar.has_rule_for_span(span) {
                continue;
            }
            let Some(node) = grammar.match_symbol(grammar.root(), lhs) else {
                continue;
            };
            let Some(rules) = grammar.rules(node) else {
                continue;
            };
            for rule in rules.rules.iter().filter(|r| r.is_unary()) {
                if let Some(&(item, deduction)) = fed.get(&(rule.id(), id)) {
                    if bin.refresh(cx, item, deduction) {
                        changed.push(item);
                    }
                    continue;
                }
                let Some(ins) = bin.insert(cx, rule, &[id]) else {
                    continue;
                };
                cx.stats.unary_added += 1;
                fed.insert((rule.id(), id), (ins.item, ins.deduction));
                tracing::trace!(%span, rule = %rule.id(), lhs = %cx.forest.item(ins.item).lhs(), "unary");
                if ins.improved {
                    changed.push(ins.item);
                }
            }
        }
        for item in changed {
            if queued.insert(item) {
                agenda.push_back(item);
            }
        }
    }
}
