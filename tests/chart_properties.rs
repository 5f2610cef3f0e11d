//! Property-based tests for chart search.
//!
//! Random lexical grammars with monotone and swapping binary rules are
//! decoded under different search settings; exact search is the reference
//! every approximate setting is checked against.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use synchart::{
    BoundaryBigram, ChartConfig, Combination, Decoder, FeatureSet, Grammar, GrammarId, HyperGraph, MemoryTrie,
    ParseOutcome, PhraseModel, Rule, RuleBinConfig, SpanLimit, SymbolId, Vocabulary,
};

const WORDS: [&str; 4] = ["a", "b", "c", "unknown"];

#[derive(Debug, Clone)]
struct Case {
    /// Costs of the translations of each known word.
    lexical: Vec<Vec<f64>>,
    monotone: f64,
    swap: f64,
    /// Indexes into `WORDS`.
    sentence: Vec<usize>,
}

fn case() -> impl Strategy<Value = Case> {
    (
        prop::collection::vec(prop::collection::vec(0.1f64..5.0, 1..3), 3),
        0.0f64..2.0,
        0.0f64..2.0,
        prop::collection::vec(0usize..WORDS.len(), 1..5),
    )
        .prop_map(|(lexical, monotone, swap, sentence)| Case {
            lexical,
            monotone,
            swap,
            sentence,
        })
}

fn decoder(case: &Case, config: ChartConfig, goal: bool) -> (Decoder, Vec<SymbolId>) {
    let mut vocab = Vocabulary::new();
    let x = vocab.nonterminal("X");
    let s = vocab.nonterminal("S");
    let t0 = vocab.terminal("a0");
    let t1 = vocab.terminal("b0");
    let features = Arc::new(FeatureSet::new(vec![
        Arc::new(PhraseModel::new(vec![1.0])),
        Arc::new(BoundaryBigram::new(0.5, 1.0).with_bigram(t0, t1, 0.0)),
    ]));

    let mut trie = MemoryTrie::new(GrammarId(0), SpanLimit::Unlimited, RuleBinConfig::unpruned());
    for (w, costs) in WORDS.iter().zip(&case.lexical) {
        for (k, &cost) in costs.iter().enumerate() {
            let target = format!("{}{}", w, k);
            trie.add_rule(Rule::new(x, vocab.pattern(w), vocab.pattern(&target), vec![cost]), &features)
                .unwrap();
        }
    }
    for (tgt, cost) in [("[X,1] [X,2]", case.monotone), ("[X,2] [X,1]", case.swap)] {
        trie.add_rule(Rule::new(x, vocab.pattern("[X,1] [X,2]"), vocab.pattern(tgt), vec![cost]), &features)
            .unwrap();
    }
    let glue = MemoryTrie::glue(GrammarId(1), s, x, &features).unwrap();

    let mut builder = Decoder::builder(x)
        .grammar(Arc::new(trie))
        .grammar(Arc::new(glue))
        .features(features)
        .config(config);
    if goal {
        builder = builder.goal(s);
    }
    let words = case.sentence.iter().map(|&i| vocab.terminal(WORDS[i])).collect();
    (builder.build().unwrap(), words)
}

fn decode(case: &Case, config: ChartConfig) -> Option<ParseOutcome> {
    let (decoder, words) = decoder(case, config, true);
    decoder.decode(0, &words).ok()
}

fn pruned() -> impl Strategy<Value = ChartConfig> {
    (0.5f64..5.0, 1usize..4, 1usize..10, any::<bool>()).prop_map(|(threshold, max_items, pop_limit, cube)| {
        let mut config = ChartConfig::default();
        config.beam.relative_threshold = threshold;
        config.beam.max_items = max_items;
        config.combination = if cube {
            Combination::CubePrune { pop_limit }
        } else {
            Combination::Exhaustive
        };
        config
    })
}

/// (span, lhs, states, cost) of every item reachable from the goal.
fn item_summary(hg: &HyperGraph) -> Vec<String> {
    let goal = hg.goal();
    let mut out: Vec<String> = hg
        .reachable_items()
        .into_iter()
        .filter(|&id| id != goal)
        .map(|id| {
            let item = hg.item(id);
            format!("{} {} {:?} {:.9}", item.span(), item.lhs(), item.states(), item.best_cost())
        })
        .collect();
    out.sort();
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_pruning_never_improves(case in case(), config in pruned()) {
        let exact = decode(&case, ChartConfig::unpruned()).expect("exact search always covers");
        if let Some(approx) = decode(&case, config) {
            prop_assert!(exact.hypergraph.best_cost() <= approx.hypergraph.best_cost() + 1e-9);
        }
    }

    #[test]
    fn test_cube_matches_exhaustive_under_pop_limit(case in case()) {
        let exhaustive = decode(&case, ChartConfig::unpruned()).unwrap();
        let cube = decode(
            &case,
            ChartConfig::unpruned().with_combination(Combination::CubePrune { pop_limit: 1_000_000 }),
        )
        .unwrap();
        prop_assert_eq!(exhaustive.hypergraph.best_cost(), cube.hypergraph.best_cost());
        prop_assert_eq!(item_summary(&exhaustive.hypergraph), item_summary(&cube.hypergraph));
    }

    #[test]
    fn test_no_duplicate_signatures(case in case()) {
        let outcome = decode(&case, ChartConfig::unpruned()).unwrap();
        let hg = &outcome.hypergraph;
        let mut seen = HashSet::new();
        for id in hg.reachable_items() {
            if id == hg.goal() {
                continue;
            }
            let item = hg.item(id);
            prop_assert!(seen.insert((item.span(), item.signature().clone())));
        }
    }

    #[test]
    fn test_best_pointer_is_minimum(case in case(), config in pruned()) {
        if let Some(outcome) = decode(&case, config) {
            let hg = &outcome.hypergraph;
            for id in hg.reachable_items() {
                let item = hg.item(id);
                let min = item
                    .deductions()
                    .iter()
                    .map(|&d| hg.deduction(d).best_cost())
                    .fold(f64::INFINITY, f64::min);
                prop_assert_eq!(hg.deduction(item.best_deduction()).best_cost(), min);
                prop_assert_eq!(item.best_cost(), min);
            }
        }
    }

    #[test]
    fn test_top_cell_is_covered(case in case()) {
        let (decoder, words) = decoder(&case, ChartConfig::default(), false);
        let outcome = decoder.decode(0, &words);
        prop_assert!(outcome.is_ok());
        let outcome = outcome.unwrap();
        prop_assert!(!outcome.hypergraph.goal_item().deductions().is_empty());
        prop_assert_eq!(outcome.hypergraph.sentence_len(), case.sentence.len());
    }
}

#[test]
fn test_grammars_seen_through_trait() {
    let case = Case {
        lexical: vec![vec![1.0], vec![2.0, 0.5], vec![0.3]],
        monotone: 0.1,
        swap: 0.2,
        sentence: vec![0, 1, 2],
    };
    let (decoder, words) = decoder(&case, ChartConfig::unpruned(), true);
    let grammars: Vec<&dyn Grammar> = decoder.grammars().iter().map(|g| g.as_ref()).collect();
    assert_eq!(grammars[0].rule_count(), 6);
    assert_eq!(grammars[1].rule_count(), 2);
    let outcome = decoder.decode(0, &words).unwrap();
    assert!(outcome.hypergraph.best_cost() < 100.0);
}
