//! synchart: synchronous CKY chart parsing into packed translation forests.
//!
//! This crate provides:
//! - Symbol interning and synchronous rules
//! - Grammar tries with pruned, lazily sorted rule bins (in-memory and packed)
//! - Incremental trie matching with dot charts
//! - Per-span bins that merge equivalent derivations and prune
//! - Exhaustive and cube-pruned rule combination with unary closure
//! - An arena hypergraph rooted at a goal item
//! - Sentence-level parallel decoding

pub mod bin;
pub mod chart;
pub mod config;
pub mod decoder;
pub mod dot_chart;
pub mod error;
pub mod feature;
pub mod hypergraph;
pub mod rule;
pub mod symbol;
pub mod trie;

// Re-exports for convenience
pub use bin::{Bin, Insertion, SuperItem};
pub use chart::{Chart, ChartStats, ParseOutcome};
pub use config::{BeamConfig, ChartConfig, Combination, OovConfig, RuleBinConfig};
pub use decoder::{Decoder, DecoderBuilder};
pub use dot_chart::{DotChart, DotItem, SuperItemRef};
pub use error::{ChartError, ConfigError, GrammarError};
pub use feature::{BoundaryBigram, DpState, FeatureFunction, FeatureSet, PhraseModel, Transition, WordPenalty};
pub use hypergraph::{Deduction, DeductionId, Derivation, Forest, HyperGraph, Item, ItemId, Signature, Span};
pub use rule::{GrammarId, Rule, RuleId};
pub use symbol::{Symbol, SymbolId, Vocabulary};
pub use trie::{Grammar, GrammarStats, MemoryTrie, NodeId, PackedTrie, RuleBin, SpanLimit};
