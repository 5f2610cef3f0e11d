//! Grammar indexes.
//!
//! Rules are stored in a trie keyed by their source pattern: terminals by
//! word id, nonterminal slots by label. The node reached by a full pattern
//! owns a [`RuleBin`] holding every rule with that pattern.
//!
//! Grammars are built single-threaded and then shared read-only between
//! charts; the chart only talks to them through the [`Grammar`] trait.

use crate::config::RuleBinConfig;
use crate::error::GrammarError;
use crate::feature::FeatureSet;
use crate::hypergraph::Span;
use crate::rule::{GrammarId, Rule, RuleId};
use crate::symbol::{Symbol, SymbolId};
use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Slack above the worst retained cost once a bin is full. Costlier rules
/// are rejected on arrival; a rule tying the worst survivor is admitted and
/// then evicted by the (cost, id) order, which keeps the earlier rule.
const EPSILON: f64 = 1e-6;

/// Handle to a trie node within one grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(index: u32) -> Self {
        NodeId(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Which spans a grammar may build items over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SpanLimit {
    #[default]
    Unlimited,
    /// Spans no wider than this.
    MaxWidth(usize),
    /// Only spans starting at the first word (glue grammars).
    StartOnly,
}

impl SpanLimit {
    pub fn allows(&self, span: Span) -> bool {
        match *self {
            SpanLimit::Unlimited => true,
            SpanLimit::MaxWidth(w) => span.width() <= w,
            SpanLimit::StartOnly => span.start == 0,
        }
    }
}

/// Load-time counters of one grammar.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrammarStats {
    pub rules_added: usize,
    pub rules_pruned: usize,
    pub arity_rejections: usize,
}

/// Rules sharing one source pattern, pruned as they arrive.
#[derive(Debug)]
pub struct RuleBin {
    arity: usize,
    rules: FxHashMap<RuleId, Arc<Rule>>,
    /// Max-heap on (est_cost, id): the worst rule is on top.
    heap: PriorityQueue<RuleId, (OrderedFloat<f64>, RuleId)>,
    cutoff: f64,
    sorted: OnceLock<Vec<Arc<Rule>>>,
}

impl RuleBin {
    pub fn new(arity: usize) -> Self {
        RuleBin {
            arity,
            rules: FxHashMap::default(),
            heap: PriorityQueue::new(),
            cutoff: f64::INFINITY,
            sorted: OnceLock::new(),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules costing this much or more are rejected.
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn contains(&self, id: RuleId) -> bool {
        self.rules.contains_key(&id)
    }

    /// Insert an estimated rule and re-apply beam and histogram pruning.
    ///
    /// Returns how many rules (the new one included) were dropped.
    pub fn add_rule(&mut self, rule: Arc<Rule>, config: &RuleBinConfig) -> Result<usize, GrammarError> {
        if rule.arity() != self.arity {
            tracing::warn!(
                rule = %rule.id(),
                expected = self.arity,
                found = rule.arity(),
                "rejecting rule with mismatched arity"
            );
            return Err(GrammarError::ArityMismatch {
                rule: rule.id(),
                expected: self.arity,
                found: rule.arity(),
            });
        }

        let est = rule.est_cost();
        if est >= self.cutoff {
            return Ok(1);
        }
        self.sorted.take();
        self.cutoff = self.cutoff.min(est + config.relative_threshold);
        self.heap.push(rule.id(), (OrderedFloat(est), rule.id()));
        self.rules.insert(rule.id(), rule);

        Ok(self.prune(config.max_rules))
    }

    fn prune(&mut self, max_rules: usize) -> usize {
        let mut dropped = 0;
        while let Some((_, &(worst, _))) = self.heap.peek() {
            if self.heap.len() <= max_rules && worst.0 < self.cutoff {
                break;
            }
            if let Some((id, _)) = self.heap.pop() {
                self.rules.remove(&id);
                dropped += 1;
            }
        }
        if self.heap.len() == max_rules {
            if let Some((_, &(worst, _))) = self.heap.peek() {
                self.cutoff = self.cutoff.min(worst.0 + EPSILON);
            }
        }
        dropped
    }

    /// Surviving rules, ascending by estimated cost then id. Sorted once.
    pub fn sorted_rules(&self) -> &[Arc<Rule>] {
        self.sorted.get_or_init(|| {
            let mut rules: Vec<Arc<Rule>> = self.rules.values().cloned().collect();
            rules.sort_by_key(|r| (OrderedFloat(r.est_cost()), r.id()));
            rules
        })
    }
}

/// Sorted rules of one trie node as seen by the chart.
#[derive(Clone, Copy, Debug)]
pub struct RuleSlice<'a> {
    pub arity: usize,
    pub rules: &'a [Arc<Rule>],
}

/// Read-only view of a grammar the chart parses with.
pub trait Grammar: Send + Sync + fmt::Debug {
    fn id(&self) -> GrammarId;

    fn root(&self) -> NodeId;

    /// Child of `node` reached by `symbol`, if any.
    fn match_symbol(&self, node: NodeId, symbol: SymbolId) -> Option<NodeId>;

    /// True if some longer pattern continues through `node`.
    fn has_extensions(&self, node: NodeId) -> bool;

    /// Rules whose source pattern ends at `node`, cheapest first.
    fn rules(&self, node: NodeId) -> Option<RuleSlice<'_>>;

    fn has_rules(&self, node: NodeId) -> bool {
        self.rules(node).is_some()
    }

    fn span_limit(&self) -> SpanLimit;

    fn has_rule_for_span(&self, span: Span) -> bool {
        self.span_limit().allows(span)
    }

    fn rule_count(&self) -> usize;
}

#[derive(Debug, Default)]
struct TrieNode {
    children: FxHashMap<SymbolId, NodeId>,
    rules: Option<RuleBin>,
}

/// Mutable trie grammar rules are loaded into.
#[derive(Debug)]
pub struct MemoryTrie {
    id: GrammarId,
    nodes: Vec<TrieNode>,
    span_limit: SpanLimit,
    config: RuleBinConfig,
    stats: GrammarStats,
    next_seq: u32,
}

impl MemoryTrie {
    pub fn new(id: GrammarId, span_limit: SpanLimit, config: RuleBinConfig) -> Self {
        MemoryTrie {
            id,
            nodes: vec![TrieNode::default()],
            span_limit,
            config,
            stats: GrammarStats::default(),
            next_seq: 0,
        }
    }

    /// Two-rule glue grammar `goal -> [x,1]`, `goal -> [goal,1] [x,2]`,
    /// restricted to spans starting at the first word.
    pub fn glue(id: GrammarId, goal: SymbolId, x: SymbolId, features: &FeatureSet) -> Result<Self, GrammarError> {
        let mut trie = MemoryTrie::new(id, SpanLimit::StartOnly, RuleBinConfig::unpruned());
        let start = vec![Symbol::Slot { label: x, index: 0 }];
        trie.add_rule(Rule::new(goal, start.clone(), start, vec![]), features)?;

        let extend = vec![
            Symbol::Slot { label: goal, index: 0 },
            Symbol::Slot { label: x, index: 1 },
        ];
        trie.add_rule(Rule::new(goal, extend.clone(), extend, vec![]), features)?;
        Ok(trie)
    }

    pub fn stats(&self) -> &GrammarStats {
        &self.stats
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Estimate `rule`, give it an id and index it by its source pattern.
    ///
    /// A rule pruned on arrival still consumes an id.
    pub fn add_rule(&mut self, mut rule: Rule, features: &FeatureSet) -> Result<RuleId, GrammarError> {
        if rule.source().is_empty() {
            return Err(GrammarError::EmptySourcePattern);
        }
        let id = RuleId {
            grammar: self.id,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        rule.set_id(id);
        features.estimate(&mut rule);

        let mut node = NodeId(0);
        for symbol in rule.source() {
            let next = NodeId(self.nodes.len() as u32);
            let child = *self.nodes[node.index()].children.entry(symbol.key()).or_insert(next);
            if child == next {
                self.nodes.push(TrieNode::default());
            }
            node = child;
        }

        let arity = rule.arity();
        let bin = self.nodes[node.index()].rules.get_or_insert_with(|| RuleBin::new(arity));
        match bin.add_rule(Arc::new(rule), &self.config) {
            Ok(dropped) => {
                self.stats.rules_added += 1;
                self.stats.rules_pruned += dropped;
                Ok(id)
            }
            Err(e) => {
                self.stats.arity_rejections += 1;
                Err(e)
            }
        }
    }

    fn bin(&self, node: NodeId) -> Option<&RuleBin> {
        self.nodes.get(node.index()).and_then(|n| n.rules.as_ref())
    }
}

impl Grammar for MemoryTrie {
    fn id(&self) -> GrammarId {
        self.id
    }

    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn match_symbol(&self, node: NodeId, symbol: SymbolId) -> Option<NodeId> {
        self.nodes[node.index()].children.get(&symbol).copied()
    }

    fn has_extensions(&self, node: NodeId) -> bool {
        !self.nodes[node.index()].children.is_empty()
    }

    fn rules(&self, node: NodeId) -> Option<RuleSlice<'_>> {
        self.bin(node).filter(|b| !b.is_empty()).map(|b| RuleSlice {
            arity: b.arity(),
            rules: b.sorted_rules(),
        })
    }

    fn span_limit(&self) -> SpanLimit {
        self.span_limit
    }

    fn rule_count(&self) -> usize {
        self.nodes.iter().filter_map(|n| n.rules.as_ref()).map(RuleBin::len).sum()
    }
}

#[derive(Clone, Copy, Debug)]
struct PackedNode {
    first_child: u32,
    num_children: u32,
    /// Index into `PackedTrie::bins`, or `u32::MAX`.
    bin: u32,
}

#[derive(Debug)]
struct PackedBin {
    arity: usize,
    rules: Vec<Arc<Rule>>,
}

/// Frozen trie in flat arrays.
///
/// Nodes are laid out breadth-first; the children of a node are a
/// contiguous run of `child_keys`, sorted so lookups are a binary search.
#[derive(Debug)]
pub struct PackedTrie {
    id: GrammarId,
    nodes: Vec<PackedNode>,
    child_keys: Vec<SymbolId>,
    child_nodes: Vec<NodeId>,
    bins: Vec<PackedBin>,
    span_limit: SpanLimit,
}

impl PackedTrie {
    pub fn from_memory(trie: &MemoryTrie) -> Self {
        let mut nodes = Vec::with_capacity(trie.nodes.len());
        let mut child_keys = Vec::new();
        let mut child_nodes = Vec::new();
        let mut bins = Vec::new();

        // Packed ids are assigned in visiting order, so the id of the next
        // enqueued node is always `queued`.
        let mut queue = VecDeque::from([NodeId(0)]);
        let mut queued: u32 = 1;
        while let Some(old) = queue.pop_front() {
            let source = &trie.nodes[old.index()];

            let mut children: Vec<(SymbolId, NodeId)> =
                source.children.iter().map(|(&k, &v)| (k, v)).collect();
            children.sort_unstable_by_key(|&(k, _)| k);

            let first_child = child_keys.len() as u32;
            for (key, child) in children {
                child_keys.push(key);
                child_nodes.push(NodeId(queued));
                queued += 1;
                queue.push_back(child);
            }

            let bin = match source.rules.as_ref().filter(|b| !b.is_empty()) {
                Some(b) => {
                    bins.push(PackedBin {
                        arity: b.arity(),
                        rules: b.sorted_rules().to_vec(),
                    });
                    (bins.len() - 1) as u32
                }
                None => u32::MAX,
            };

            nodes.push(PackedNode {
                first_child,
                num_children: child_keys.len() as u32 - first_child,
                bin,
            });
        }

        PackedTrie {
            id: trie.id,
            nodes,
            child_keys,
            child_nodes,
            bins,
            span_limit: trie.span_limit,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}

impl Grammar for PackedTrie {
    fn id(&self) -> GrammarId {
        self.id
    }

    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn match_symbol(&self, node: NodeId, symbol: SymbolId) -> Option<NodeId> {
        let n = self.nodes[node.index()];
        let lo = n.first_child as usize;
        let hi = lo + n.num_children as usize;
        self.child_keys[lo..hi]
            .binary_search(&symbol)
            .ok()
            .map(|i| self.child_nodes[lo + i])
    }

    fn has_extensions(&self, node: NodeId) -> bool {
        self.nodes[node.index()].num_children > 0
    }

    fn rules(&self, node: NodeId) -> Option<RuleSlice<'_>> {
        self.bins.get(self.nodes[node.index()].bin as usize).map(|b| RuleSlice {
            arity: b.arity,
            rules: &b.rules,
        })
    }

    fn span_limit(&self) -> SpanLimit {
        self.span_limit
    }

    fn rule_count(&self) -> usize {
        self.bins.iter().map(|b| b.rules.len()).sum()
    }
}
