//! Sentence-level entry point.
//!
//! A [`Decoder`] is the frozen context every chart reads: grammars,
//! weighted features and configuration. It is built once and can then be
//! shared across threads, one chart per sentence.

use crate::chart::{Chart, ParseOutcome};
use crate::config::ChartConfig;
use crate::error::{ChartError, ConfigError};
use crate::feature::FeatureSet;
use crate::rule::GrammarId;
use crate::symbol::SymbolId;
use crate::trie::{Grammar, MemoryTrie};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct Decoder {
    grammars: Vec<Arc<dyn Grammar>>,
    features: Arc<FeatureSet>,
    config: ChartConfig,
    oov_lhs: SymbolId,
    goal: Option<SymbolId>,
}

impl Decoder {
    /// Start building a decoder whose fallback axioms have lhs `oov_lhs`.
    pub fn builder(oov_lhs: SymbolId) -> DecoderBuilder {
        DecoderBuilder::new(oov_lhs)
    }

    pub fn grammars(&self) -> &[Arc<dyn Grammar>] {
        &self.grammars
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn config(&self) -> &ChartConfig {
        &self.config
    }

    pub fn oov_lhs(&self) -> SymbolId {
        self.oov_lhs
    }

    /// Only top-level items with this lhs reach the goal item, if set.
    pub fn goal(&self) -> Option<SymbolId> {
        self.goal
    }

    /// Parse one sentence.
    pub fn decode(&self, sentence_id: usize, words: &[SymbolId]) -> Result<ParseOutcome, ChartError> {
        Chart::new(self, sentence_id, words)?.expand()
    }

    /// Parse many sentences; sentence ids are their positions. Results come
    /// back in input order.
    #[cfg(feature = "parallel")]
    pub fn decode_batch(&self, sentences: &[Vec<SymbolId>]) -> Vec<Result<ParseOutcome, ChartError>> {
        sentences
            .par_iter()
            .enumerate()
            .map(|(id, words)| self.decode(id, words))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    pub fn decode_batch(&self, sentences: &[Vec<SymbolId>]) -> Vec<Result<ParseOutcome, ChartError>> {
        sentences
            .iter()
            .enumerate()
            .map(|(id, words)| self.decode(id, words))
            .collect()
    }
}

/// Builder for [`Decoder`].
pub struct DecoderBuilder {
    grammars: Vec<Arc<dyn Grammar>>,
    features: Arc<FeatureSet>,
    config: ChartConfig,
    oov_lhs: SymbolId,
    goal: Option<SymbolId>,
    glue: bool,
}

impl DecoderBuilder {
    pub fn new(oov_lhs: SymbolId) -> Self {
        DecoderBuilder {
            grammars: Vec::new(),
            features: Arc::new(FeatureSet::default()),
            config: ChartConfig::default(),
            oov_lhs,
            goal: None,
            glue: false,
        }
    }

    pub fn grammar(mut self, grammar: Arc<dyn Grammar>) -> Self {
        self.grammars.push(grammar);
        self
    }

    pub fn grammars(mut self, grammars: impl IntoIterator<Item = Arc<dyn Grammar>>) -> Self {
        self.grammars.extend(grammars);
        self
    }

    pub fn features(mut self, features: Arc<FeatureSet>) -> Self {
        self.features = features;
        self
    }

    pub fn config(mut self, config: ChartConfig) -> Self {
        self.config = config;
        self
    }

    pub fn goal(mut self, goal: SymbolId) -> Self {
        self.goal = Some(goal);
        self
    }

    pub fn oov_enabled(mut self, enabled: bool) -> Self {
        self.config.oov.enabled = enabled;
        self
    }

    /// Append a glue grammar joining `oov_lhs` items left to right under
    /// the goal symbol (or `oov_lhs` itself without one). A decoder built
    /// with no grammars gets one regardless.
    pub fn glue(mut self) -> Self {
        self.glue = true;
        self
    }

    pub fn build(self) -> Result<Decoder, ConfigError> {
        self.config.validate()?;
        let mut grammars = self.grammars;
        if self.glue || grammars.is_empty() {
            if grammars.is_empty() {
                tracing::warn!("no grammars supplied; using a glue grammar");
            }
            let top = self.goal.unwrap_or(self.oov_lhs);
            let glue = MemoryTrie::glue(GrammarId::GLUE, top, self.oov_lhs, &self.features)?;
            grammars.push(Arc::new(glue));
        }
        tracing::debug!(
            grammars = grammars.len(),
            rules = grammars.iter().map(|g| g.rule_count()).sum::<usize>(),
            features = self.features.len(),
            "decoder ready"
        );
        Ok(Decoder {
            grammars,
            features: self.features,
            config: self.config,
            oov_lhs: self.oov_lhs,
            goal: self.goal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BeamConfig;
    use crate::symbol::Vocabulary;

    #[test]
    fn test_build_validates_config() {
        let mut vocab = Vocabulary::new();
        let x = vocab.nonterminal("X");
        let config = ChartConfig::default().with_beam(BeamConfig {
            relative_threshold: 10.0,
            max_items: 0,
        });
        assert!(Decoder::builder(x).config(config).build().is_err());
    }

    #[test]
    fn test_glue_supplied_without_grammars() {
        let mut vocab = Vocabulary::new();
        let x = vocab.nonterminal("X");
        let decoder = Decoder::builder(x).build().unwrap();
        assert_eq!(decoder.grammars().len(), 1);
        assert_eq!(decoder.grammars()[0].id(), GrammarId::GLUE);
        assert_eq!(decoder.grammars()[0].rule_count(), 2);
    }

    #[test]
    fn test_decoder_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Decoder>();
    }
}
