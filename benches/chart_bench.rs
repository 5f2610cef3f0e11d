//! Benchmarks comparing cube pruning with exhaustive combination.
//!
//! Run with: cargo bench --bench chart_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use synchart::{
    ChartConfig, Combination, Decoder, FeatureSet, GrammarId, MemoryTrie, PhraseModel, Rule, RuleBinConfig,
    SpanLimit, SymbolId, Vocabulary, WordPenalty,
};

/// Hiero-style grammar over a small vocabulary: several lexical translations
/// per word, monotone and swapping binary rules, and a glue grammar.
fn build_decoder(config: ChartConfig) -> (Decoder, Vec<SymbolId>) {
    let mut vocab = Vocabulary::new();
    let x = vocab.nonterminal("X");
    let s = vocab.nonterminal("S");
    let features = Arc::new(FeatureSet::new(vec![
        Arc::new(PhraseModel::new(vec![1.0, 0.5])),
        Arc::new(WordPenalty::new(-0.1)),
    ]));

    let mut trie = MemoryTrie::new(GrammarId(0), SpanLimit::MaxWidth(10), RuleBinConfig::default());
    let words = ["w0", "w1", "w2", "w3", "w4", "w5", "w6", "w7"];
    for (i, w) in words.iter().enumerate() {
        for k in 0..4 {
            let target = format!("t{}_{}", i, k);
            let rule = Rule::new(x, vocab.pattern(w), vocab.pattern(&target), vec![1.0 + k as f64 * 0.3, 0.2]);
            trie.add_rule(rule, &features).unwrap();
        }
    }
    for (k, (src, tgt)) in [
        ("[X,1] [X,2]", "[X,1] [X,2]"),
        ("[X,1] [X,2]", "[X,2] [X,1]"),
        ("[X,1] w3 [X,2]", "[X,2] of [X,1]"),
    ]
    .iter()
    .enumerate()
    {
        let rule = Rule::new(x, vocab.pattern(src), vocab.pattern(tgt), vec![0.5 + k as f64 * 0.25, 0.0]);
        trie.add_rule(rule, &features).unwrap();
    }
    let glue = MemoryTrie::glue(GrammarId(1), s, x, &features).unwrap();

    let decoder = Decoder::builder(x)
        .grammar(Arc::new(trie))
        .grammar(Arc::new(glue))
        .features(features)
        .config(config)
        .goal(s)
        .build()
        .unwrap();
    let sentence = vocab.sentence("w0 w1 w2 w3 w4 w5 w6 w7 w1 w2 w3 w4");
    (decoder, sentence)
}

fn bench_combination(c: &mut Criterion) {
    let mut group = c.benchmark_group("combination");
    let modes = [
        ("cube_prune_100", Combination::CubePrune { pop_limit: 100 }),
        ("cube_prune_20", Combination::CubePrune { pop_limit: 20 }),
        ("exhaustive", Combination::Exhaustive),
    ];
    for (name, mode) in modes {
        let (decoder, sentence) = build_decoder(ChartConfig::default().with_combination(mode));
        group.bench_with_input(BenchmarkId::from_parameter(name), &sentence, |b, words| {
            b.iter(|| decoder.decode(0, black_box(words)).unwrap())
        });
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let (decoder, sentence) = build_decoder(ChartConfig::default());
    let batch: Vec<Vec<SymbolId>> = (0..16).map(|_| sentence.clone()).collect();

    c.bench_function("decode_batch_16", |b| b.iter(|| decoder.decode_batch(black_box(&batch))));
}

criterion_group!(benches, bench_combination, bench_batch);
criterion_main!(benches);
