use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use index::{
    AnnConfig, CompressionConfig, DocumentStore, InMemoryBackend, LshConfig, NearDuplicateIndex,
    SemanticIndex,
};
use perceptual::{sketch_tokens, SketchConfig};

fn store() -> Arc<DocumentStore> {
    Arc::new(DocumentStore::new(
        Box::new(InMemoryBackend::new()),
        CompressionConfig::default(),
    ))
}

fn bench_lsh_query(c: &mut Criterion) {
    let lsh = NearDuplicateIndex::new(LshConfig::default(), store()).expect("lsh");
    let cfg = SketchConfig::default();
    let mut probe = None;
    for doc in 0..2_000usize {
        let tokens: Vec<String> = (0..80).map(|i| format!("d{doc}w{i}")).collect();
        let sig = sketch_tokens(&tokens, &cfg).expect("sketch");
        let id = canonical::hash_bytes(format!("doc{doc}").as_bytes()).document_id();
        lsh.insert(&id, &sig).expect("insert");
        if doc == 1_000 {
            probe = Some(sig);
        }
    }
    let probe = probe.expect("probe");

    c.bench_function("lsh_query_2k_docs", |b| {
        b.iter(|| lsh.query_ranked(black_box(&probe)).expect("query"))
    });
}

fn bench_semantic_query(c: &mut Criterion) {
    let index = SemanticIndex::new(store(), Some(64), AnnConfig::default());
    for doc in 0..2_000usize {
        let v: Vec<f32> = (0..64).map(|i| ((doc * 31 + i) as f32).sin()).collect();
        let id = canonical::hash_bytes(format!("vec{doc}").as_bytes()).document_id();
        index.insert(&id, &v).expect("insert");
    }
    let query: Vec<f32> = (0..64).map(|i| (i as f32).cos()).collect();

    c.bench_function("semantic_query_2k_vectors", |b| {
        b.iter(|| index.query(black_box(&query), 5).expect("query"))
    });
}

criterion_group!(benches, bench_lsh_query, bench_semantic_query);
criterion_main!(benches);
