//! Synchronous translation rules.
//!
//! A rule rewrites `lhs` into a source pattern paired with a target pattern.
//! Nonterminal slots link the two sides; the number of slots on the source
//! side is the rule's arity.

use crate::symbol::{Symbol, SymbolId};
use std::fmt;

/// Identifies the grammar that owns a rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GrammarId(pub u16);

impl GrammarId {
    /// Owner of the fallback rules a chart builds for untranslatable words.
    pub const OOV: GrammarId = GrammarId(u16::MAX);
    /// Owner of the glue grammar a decoder supplies itself.
    pub const GLUE: GrammarId = GrammarId(u16::MAX - 1);
}

/// Rule identity, unique across all grammars of one decoder.
///
/// The derived ordering is the deterministic tie-break between equal-cost
/// deductions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RuleId {
    pub grammar: GrammarId,
    pub seq: u32,
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.grammar.0, self.seq)
    }
}

/// A synchronous rule: `lhs -> <source, target>` with feature scores.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    id: RuleId,
    lhs: SymbolId,
    source: Vec<Symbol>,
    target: Vec<Symbol>,
    arity: usize,
    scores: Vec<f64>,
    /// Lower bound on the cost of any application of this rule.
    est_cost: f64,
    /// Cost contributed by features that do not depend on context.
    stateless_cost: f64,
}

impl Rule {
    /// Create a rule. Costs stay at zero until a `FeatureSet` estimates them.
    pub fn new(lhs: SymbolId, source: Vec<Symbol>, target: Vec<Symbol>, scores: Vec<f64>) -> Self {
        let arity = source.iter().filter(|s| s.is_slot()).count();
        Rule {
            id: RuleId::default(),
            lhs,
            source,
            target,
            arity,
            scores,
            est_cost: 0.0,
            stateless_cost: 0.0,
        }
    }

    /// Fallback rule translating `word` (at sentence position `position`)
    /// into `target`.
    pub fn oov(lhs: SymbolId, word: SymbolId, target: SymbolId, scores: Vec<f64>, position: usize) -> Self {
        let mut rule = Rule::new(lhs, vec![Symbol::Word(word)], vec![Symbol::Word(target)], scores);
        rule.id = RuleId {
            grammar: GrammarId::OOV,
            seq: position as u32,
        };
        rule
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: RuleId) {
        self.id = id;
    }

    pub fn lhs(&self) -> SymbolId {
        self.lhs
    }

    pub fn source(&self) -> &[Symbol] {
        &self.source
    }

    pub fn target(&self) -> &[Symbol] {
        &self.target
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn est_cost(&self) -> f64 {
        self.est_cost
    }

    pub fn stateless_cost(&self) -> f64 {
        self.stateless_cost
    }

    pub(crate) fn set_costs(&mut self, est_cost: f64, stateless_cost: f64) {
        self.est_cost = est_cost;
        self.stateless_cost = stateless_cost;
    }

    /// Number of target-side words.
    pub fn target_words(&self) -> usize {
        self.target.iter().filter(|s| !s.is_slot()).count()
    }

    /// True for rules whose source side is a single nonterminal.
    pub fn is_unary(&self) -> bool {
        self.arity == 1 && self.source.len() == 1
    }

    /// Source-order position of the antecedent bound to slot `index`.
    ///
    /// Antecedents always arrive in source order, while `[X,k]` numbering
    /// may be permuted on the source side.
    pub fn antecedent_position(&self, index: u8) -> Option<usize> {
        self.source
            .iter()
            .filter(|s| s.is_slot())
            .position(|s| matches!(*s, Symbol::Slot { index: i, .. } if i == index))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn side(f: &mut fmt::Formatter<'_>, pattern: &[Symbol]) -> fmt::Result {
            for (i, s) in pattern.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                match s {
                    Symbol::Word(id) => write!(f, "{}", id)?,
                    Symbol::Slot { label, index } => write!(f, "[{},{}]", label, index + 1)?,
                }
            }
            Ok(())
        }

        write!(f, "{} {} -> ", self.id, self.lhs)?;
        side(f, &self.source)?;
        write!(f, " ||| ")?;
        side(f, &self.target)?;
        write!(f, " ||| est={:.3}", self.est_cost)
    }
}
