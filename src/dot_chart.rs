//! Incremental grammar matching.
//!
//! A dot item records how far into the trie a source-side prefix has been
//! matched over some span. Dot items over (i, j) are built from dot items
//! over (i, k) by consuming either the word at j - 1 or the lhs of a super
//! item over (k, j), so each trie edge is walked once per span instead of
//! once per rule.

use crate::bin::BinGrid;
use crate::chart::ChartStats;
use crate::hypergraph::Span;
use crate::symbol::SymbolId;
use crate::trie::{Grammar, NodeId};

/// Names the super item an antecedent slot was matched against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SuperItemRef {
    pub span: Span,
    pub lhs: SymbolId,
}

/// A partial match: trie position plus one antecedent per slot consumed.
#[derive(Clone, Debug, PartialEq)]
pub struct DotItem {
    pub node: NodeId,
    pub ants: Vec<SuperItemRef>,
}

impl DotItem {
    fn extend(&self, node: NodeId, ant: Option<SuperItemRef>) -> DotItem {
        let mut ants = self.ants.clone();
        ants.extend(ant);
        DotItem { node, ants }
    }
}

/// Dot items of one grammar over every span of one sentence.
#[derive(Debug)]
pub struct DotChart {
    n: usize,
    cells: Vec<Vec<DotItem>>,
}

impl DotChart {
    pub fn new(n: usize) -> Self {
        DotChart {
            n,
            cells: vec![Vec::new(); (n + 1) * (n + 1)],
        }
    }

    #[inline]
    fn index(&self, i: usize, j: usize) -> usize {
        i * (self.n + 1) + j
    }

    pub fn cell(&self, span: Span) -> &[DotItem] {
        &self.cells[self.index(span.start, span.end)]
    }

    fn push(&mut self, span: Span, item: DotItem, stats: &mut ChartStats) {
        tracing::trace!(%span, node = item.node.index(), ants = item.ants.len(), "dot item");
        let idx = self.index(span.start, span.end);
        self.cells[idx].push(item);
        stats.dot_items_added += 1;
    }

    /// Place an empty match at the trie root before every word.
    pub fn seed(&mut self, grammar: &dyn Grammar, stats: &mut ChartStats) {
        for j in 0..self.n {
            let span = Span::new(j, j);
            if grammar.has_rule_for_span(span) {
                let root = DotItem {
                    node: grammar.root(),
                    ants: Vec::new(),
                };
                self.push(span, root, stats);
            }
        }
    }

    /// Build the dot items over `span` from completed sub-spans and the
    /// word at `span.end - 1`.
    pub fn expand_cell(&mut self, grammar: &dyn Grammar, span: Span, words: &[SymbolId], bins: &BinGrid, stats: &mut ChartStats) {
        let (i, j) = (span.start, span.end);

        for k in i + 1..j {
            let tail = bins.get(Span::new(k, j));
            if tail.super_items().is_empty() {
                continue;
            }
            let mut added = Vec::new();
            for dot in self.cell(Span::new(i, k)) {
                if !grammar.has_extensions(dot.node) {
                    continue;
                }
                for sup in tail.super_items() {
                    if let Some(child) = grammar.match_symbol(dot.node, sup.lhs) {
                        let ant = SuperItemRef {
                            span: Span::new(k, j),
                            lhs: sup.lhs,
                        };
                        added.push(dot.extend(child, Some(ant)));
                    }
                }
            }
            for item in added {
                self.push(span, item, stats);
            }
        }

        let word = words[j - 1];
        let added: Vec<DotItem> = self
            .cell(Span::new(i, j - 1))
            .iter()
            .filter_map(|dot| grammar.match_symbol(dot.node, word).map(|child| dot.extend(child, None)))
            .collect();
        for item in added {
            self.push(span, item, stats);
        }
    }

    /// Start matches whose first symbol is a nonterminal over the just
    /// completed `span`. Only prefixes that can still grow are kept; rules
    /// consisting of a single slot are applied by unary closure.
    pub fn start_dot_items(&mut self, grammar: &dyn Grammar, span: Span, bins: &BinGrid, stats: &mut ChartStats) {
        let bin = bins.get(span);
        let mut added = Vec::new();
        for dot in self.cell(Span::new(span.start, span.start)) {
            for sup in bin.super_items() {
                if let Some(child) = grammar.match_symbol(dot.node, sup.lhs) {
                    if grammar.has_extensions(child) {
                        added.push(dot.extend(child, Some(SuperItemRef { span, lhs: sup.lhs })));
                    }
                }
            }
        }
        for item in added {
            self.push(span, item, stats);
        }
    }
}
