mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use docdedup::index::{InMemoryBackend, IndexBackend, IndexError, Table, WriteBatch};
use docdedup::semantic::{CircuitBreakerConfig, CircuitState, ResilienceConfig};
use docdedup::{
    Classification, ConfigLoadError, DedupConfig, DuplicateResolver, InputError,
    ResilientEmbedder, ResolveError, ResolverConfig, StubEmbedder,
};

/// In-memory backend whose writes can be switched off.
#[derive(Default)]
struct FlakyBackend {
    inner: InMemoryBackend,
    fail_writes: AtomicBool,
}

impl IndexBackend for FlakyBackend {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        self.inner.get(table, key)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), IndexError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexError::backend("disk full"));
        }
        self.inner.write(batch)
    }

    fn scan(
        &self,
        table: Table,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        self.inner.scan(table, visitor)
    }
}

fn flaky_resolver(semantic: bool) -> (Arc<FlakyBackend>, DuplicateResolver) {
    let backend = Arc::new(FlakyBackend::default());
    let resolver = DuplicateResolver::with_backend(
        ResolverConfig::default().with_semantic_enabled(semantic),
        Box::new(Arc::clone(&backend)),
    )
    .unwrap();
    (backend, resolver)
}

#[test]
fn failed_commit_leaves_index_unchanged() {
    let (backend, resolver) = flaky_resolver(false);
    let stub = StubEmbedder::new(8).unwrap();
    let original = tokens(&[]);
    classify(&resolver, &original, "v1", &stub);

    backend.fail_writes.store(true, Ordering::SeqCst);
    let err = resolver
        .classify(COOKING.as_bytes(), COOKING, "sauce", &stub)
        .unwrap_err();
    assert!(matches!(err, ResolveError::Index(IndexError::Backend(_))));
    let err = resolver.link(&id_of(&original), "v1-copy").unwrap_err();
    assert!(matches!(err, ResolveError::Index(IndexError::Backend(_))));

    backend.fail_writes.store(false, Ordering::SeqCst);
    assert_eq!(resolver.len().unwrap(), 1);
    assert_eq!(
        resolver.get(&id_of(&original)).unwrap().unwrap().source_labels,
        vec!["v1".to_string()]
    );
    // the failed document was never bucketed, so it is still new
    let retry = classify(&resolver, COOKING, "sauce", &stub);
    assert_eq!(retry.classification, Classification::Unique);
}

#[test]
fn empty_input_is_rejected() {
    let resolver = in_memory(true);
    let stub = StubEmbedder::new(8).unwrap();
    let err = resolver.classify(b"", "", "empty", &stub).unwrap_err();
    assert!(matches!(err, ResolveError::Input(InputError::Empty)));
    let err = resolver
        .classify_reader(std::io::empty(), "", "empty", &stub)
        .unwrap_err();
    assert!(matches!(err, ResolveError::Input(InputError::Empty)));
    assert!(resolver.is_empty().unwrap());
}

#[test]
fn embedder_outage_degrades_to_unique() {
    let resolver = in_memory(true);
    let concept = ConceptEmbedder::new();
    classify(&resolver, FOX, "fox", &concept);

    let verdict = classify(&resolver, PARAPHRASE, "paraphrase", &FailingEmbedder);
    assert_eq!(verdict.classification, Classification::Unique);
    assert!(verdict.semantic_unavailable);
    let record = resolver.get(&id_of(PARAPHRASE)).unwrap().unwrap();
    assert!(record.embedding.is_none());
}

#[test]
fn slow_embedder_times_out_and_opens_the_circuit() {
    let resolver = in_memory(true);
    let embedder = ResilientEmbedder::new(
        SlowEmbedder {
            delay: Duration::from_millis(300),
        },
        ResilienceConfig::default()
            .with_timeout(Duration::from_millis(20))
            .with_circuit(
                CircuitBreakerConfig::default()
                    .with_failure_threshold(2)
                    .with_reset_timeout(Duration::from_secs(60)),
            ),
    );

    for (i, text) in [FOX, COOKING, PASSAGE].iter().enumerate() {
        let verdict = classify(&resolver, text, &format!("doc-{i}"), &embedder);
        assert_eq!(verdict.classification, Classification::Unique);
        assert!(verdict.semantic_unavailable);
    }
    assert_eq!(embedder.circuit_state(), CircuitState::Open);
    assert_eq!(resolver.len().unwrap(), 3);
}

#[test]
fn corrupt_row_is_repaired_on_next_classification() {
    let backend = Arc::new(InMemoryBackend::new());
    let resolver = DuplicateResolver::with_backend(
        ResolverConfig::default().with_semantic_enabled(false),
        Box::new(Arc::clone(&backend)),
    )
    .unwrap();
    let stub = StubEmbedder::new(8).unwrap();
    let original = tokens(&[]);
    classify(&resolver, &original, "v1", &stub);

    let mut raw = WriteBatch::new();
    raw.put(Table::Signatures, id_of(&original).as_str(), b"not a signature".to_vec());
    backend.write(raw).unwrap();

    let verdict = classify(&resolver, &tokens(&[150]), "v2", &stub);
    assert_eq!(verdict.classification, Classification::Unique);
    assert_eq!(resolver.len().unwrap(), 2);
    assert!(resolver.rebuild().unwrap().is_clean());

    // the damaged record keeps its identity and labels
    let copy = classify(&resolver, &original, "v1-copy", &stub);
    assert_eq!(copy.classification, Classification::Exact);
    assert_eq!(copy.matched.as_ref(), Some(&id_of(&original)));
    assert_eq!(
        resolver.get(&id_of(&original)).unwrap().unwrap().source_labels,
        vec!["v1".to_string(), "v1-copy".to_string()]
    );
}

#[test]
fn reopening_over_a_damaged_signature_keeps_the_record() {
    let backend = Arc::new(InMemoryBackend::new());
    let config = ResolverConfig::default().with_semantic_enabled(false);
    let stub = StubEmbedder::new(8).unwrap();
    {
        let resolver =
            DuplicateResolver::with_backend(config.clone(), Box::new(Arc::clone(&backend))).unwrap();
        classify(&resolver, FOX, "fox", &stub);
    }
    let mut raw = WriteBatch::new();
    raw.put(Table::Signatures, id_of(FOX).as_str(), b"torn write".to_vec());
    backend.write(raw).unwrap();

    let resolver = DuplicateResolver::with_backend(config, Box::new(Arc::clone(&backend))).unwrap();
    assert_eq!(resolver.len().unwrap(), 1);
    let again = classify(&resolver, FOX, "fox-again", &stub);
    assert_eq!(again.classification, Classification::Exact);
}

#[test]
fn non_finite_embedding_cannot_be_attached() {
    let resolver = in_memory(true);
    let stub = StubEmbedder::new(8).unwrap();
    classify(&resolver, FOX, "fox", &stub);
    let err = resolver
        .attach_embedding(&id_of(FOX), &[f32::NAN; 8])
        .unwrap_err();
    assert!(matches!(err, ResolveError::Index(IndexError::NonFiniteEmbedding)));
}

#[test]
fn mismatched_embedding_dimension_is_reported() {
    let mut config = DedupConfig::default();
    config.semantic.dimension = Some(64);
    let resolver = docdedup::open(&config).unwrap();
    let stub = StubEmbedder::new(64).unwrap();
    classify(&resolver, FOX, "fox", &stub);

    let err = resolver
        .attach_embedding(&id_of(FOX), &[0.5; 8])
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Index(IndexError::DimensionMismatch { expected: 64, got: 8 })
    ));

    let wrong = StubEmbedder::new(8).unwrap();
    let verdict = classify(&resolver, COOKING, "sauce", &wrong);
    assert!(verdict.semantic_unavailable);
}

#[test]
fn invalid_configurations_are_rejected() {
    let err = DedupConfig::from_yaml("version: \"1\"\nmax_candidates: 0\n").unwrap_err();
    assert!(matches!(err, ConfigLoadError::Validation(_)));

    let err = DedupConfig::from_yaml("version: \"1\"\nsemantic:\n  dimension: 0\n").unwrap_err();
    assert!(matches!(err, ConfigLoadError::Validation(_)));

    let mut config = ResolverConfig::default();
    config.thresholds.near_related = 1.5;
    assert!(matches!(
        DuplicateResolver::in_memory(config),
        Err(ResolveError::InvalidConfig(_))
    ));
}
