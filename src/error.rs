//! Error types for grammar loading, configuration and chart expansion.

use crate::rule::RuleId;
use thiserror::Error;

/// Errors raised while indexing rules into a grammar.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GrammarError {
    #[error("rule {rule}: arity {found} does not match rule bin arity {expected}")]
    ArityMismatch {
        rule: RuleId,
        expected: usize,
        found: usize,
    },
    #[error("rule has an empty source pattern")]
    EmptySourcePattern,
}

/// Errors raised by a chart.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChartError {
    #[error("cannot build a chart for an empty sentence")]
    EmptySentence,
    #[error(
        "sentence {sentence_id}: no complete item in cell (0, {length}); the grammar has no \
         derivation covering the input or pruning was too aggressive"
    )]
    EmptyGoalCell { sentence_id: usize, length: usize },
}

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("cannot build the glue grammar: {0}")]
    Grammar(#[from] GrammarError),
}
