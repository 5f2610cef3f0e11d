//! Search configuration.
//!
//! All settings have defaults, so a TOML file only needs to name what it
//! changes:
//!
//! ```toml
//! fuzz1 = 0.2
//!
//! [beam]
//! max_items = 50
//!
//! [combination]
//! mode = "cube_prune"
//! pop_limit = 200
//! ```

use crate::error::ConfigError;
use serde::Deserialize;

/// Relative-beam and histogram limits for the items of one bin.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BeamConfig {
    /// Items costlier than the bin's best plus this margin are dropped.
    pub relative_threshold: f64,
    /// At most this many items survive in one bin.
    pub max_items: usize,
}

impl Default for BeamConfig {
    fn default() -> Self {
        BeamConfig {
            relative_threshold: 10.0,
            max_items: 30,
        }
    }
}

impl BeamConfig {
    pub fn unpruned() -> Self {
        BeamConfig {
            relative_threshold: f64::INFINITY,
            max_items: usize::MAX,
        }
    }
}

/// Load-time limits for rules sharing one source pattern.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuleBinConfig {
    pub relative_threshold: f64,
    pub max_rules: usize,
}

impl Default for RuleBinConfig {
    fn default() -> Self {
        RuleBinConfig {
            relative_threshold: 10.0,
            max_rules: 50,
        }
    }
}

impl RuleBinConfig {
    pub fn unpruned() -> Self {
        RuleBinConfig {
            relative_threshold: f64::INFINITY,
            max_rules: usize::MAX,
        }
    }
}

/// How rules are combined with antecedent items.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Combination {
    /// Every rule with every antecedent combination.
    Exhaustive,
    /// Lazy frontier search over the sorted combination cube.
    CubePrune { pop_limit: usize },
}

impl Default for Combination {
    fn default() -> Self {
        Combination::CubePrune { pop_limit: 100 }
    }
}

/// Fallback axioms for words the grammars cannot translate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OovConfig {
    pub enabled: bool,
    /// Seed fallbacks only for words no grammar has a rule for.
    pub true_oovs_only: bool,
    /// Score placed at `feature_index` of every fallback rule.
    pub cost: f64,
    pub feature_index: usize,
}

impl Default for OovConfig {
    fn default() -> Self {
        OovConfig {
            enabled: true,
            true_oovs_only: false,
            cost: 100.0,
            feature_index: 0,
        }
    }
}

/// Configuration for one decoder.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub beam: BeamConfig,
    pub rules: RuleBinConfig,
    pub combination: Combination,
    /// Cube pruning stops once a popped candidate is worse than the bin
    /// cutoff plus this margin.
    pub fuzz1: f64,
    /// Cube pruning only enqueues neighbours cheaper than the bin cutoff plus
    /// this margin.
    pub fuzz2: f64,
    pub oov: OovConfig,
}

impl Default for ChartConfig {
    fn default() -> Self {
        ChartConfig {
            beam: BeamConfig::default(),
            rules: RuleBinConfig::default(),
            combination: Combination::default(),
            fuzz1: 0.1,
            fuzz2: 0.1,
            oov: OovConfig::default(),
        }
    }
}

impl ChartConfig {
    /// Exact search: no beam, no caps, exhaustive combination.
    pub fn unpruned() -> Self {
        ChartConfig {
            beam: BeamConfig::unpruned(),
            rules: RuleBinConfig::unpruned(),
            combination: Combination::Exhaustive,
            ..ChartConfig::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ChartConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_combination(mut self, combination: Combination) -> Self {
        self.combination = combination;
        self
    }

    pub fn with_beam(mut self, beam: BeamConfig) -> Self {
        self.beam = beam;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
            if value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    key,
                    reason: format!("must be positive, got {}", value),
                })
            }
        }

        fn non_zero(key: &'static str, value: usize) -> Result<(), ConfigError> {
            if value > 0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    key,
                    reason: "must be at least 1".to_string(),
                })
            }
        }

        positive("beam.relative_threshold", self.beam.relative_threshold)?;
        non_zero("beam.max_items", self.beam.max_items)?;
        positive("rules.relative_threshold", self.rules.relative_threshold)?;
        non_zero("rules.max_rules", self.rules.max_rules)?;
        if let Combination::CubePrune { pop_limit } = self.combination {
            non_zero("combination.pop_limit", pop_limit)?;
        }
        if self.fuzz1 < 0.0 || self.fuzz2 < 0.0 {
            return Err(ConfigError::Invalid {
                key: "fuzz",
                reason: "margins cannot be negative".to_string(),
            });
        }
        Ok(())
    }
}
