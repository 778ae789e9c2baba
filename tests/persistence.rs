//! Reopening a redb-backed store restores every tier.

mod common;

use std::path::Path;

use common::*;
use docdedup::{Classification, DedupConfig, Disposition, DuplicateResolver, StubEmbedder};
use tempfile::TempDir;

fn config_at(path: &Path) -> DedupConfig {
    DedupConfig::default().with_redb_path(path.to_string_lossy())
}

fn open_at(path: &Path) -> DuplicateResolver {
    docdedup::open(&config_at(path)).unwrap()
}

#[test]
fn reopened_store_detects_every_tier() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("docs.redb");
    let embedder = ConceptEmbedder::new();
    let long = tokens(&[]);

    {
        let resolver = open_at(&db);
        classify(&resolver, &long, "long.txt", &embedder);
        classify(&resolver, FOX, "fox.txt", &embedder);
        classify(&resolver, COOKING, "sauce.txt", &embedder);
    }

    let resolver = open_at(&db);
    assert_eq!(resolver.len().unwrap(), 3);

    let exact = classify(&resolver, COOKING, "sauce-copy.txt", &embedder);
    assert_eq!(exact.classification, Classification::Exact);

    let near = classify(&resolver, &tokens(&[150]), "long-edit.txt", &embedder);
    assert_eq!(near.classification, Classification::Near);
    assert_eq!(near.disposition, Disposition::Linked);

    let semantic = classify(&resolver, PARAPHRASE, "paraphrase.txt", &embedder);
    assert_eq!(semantic.classification, Classification::Semantic);
    assert_eq!(semantic.matched.as_ref(), Some(&id_of(FOX)));

    let labels = resolver.get(&id_of(&long)).unwrap().unwrap().source_labels;
    assert_eq!(labels, vec!["long.txt".to_string(), "long-edit.txt".to_string()]);
}

#[test]
fn rebuild_after_reopen_matches_the_live_index() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("docs.redb");
    let embedder = ConceptEmbedder::new();
    let docs = [PASSAGE.to_string(), COOKING.to_string(), FOX.to_string(), tokens(&[])];

    let live_scores = {
        let resolver = open_at(&db);
        for (i, text) in docs.iter().enumerate() {
            classify(&resolver, text, &format!("doc-{i}"), &embedder);
        }
        pairwise_scores(&resolver, &docs)
    };

    let resolver = open_at(&db);
    let report = resolver.rebuild().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.records, 4);
    assert_eq!(report.signatures_indexed, 4);
    assert_eq!(report.embeddings_indexed, 4);
    assert_eq!(pairwise_scores(&resolver, &docs), live_scores);
}

fn pairwise_scores(resolver: &DuplicateResolver, docs: &[String]) -> Vec<u32> {
    let mut scores = Vec::new();
    for a in docs {
        for b in docs {
            let s = resolver.near_similarity(&id_of(a), &id_of(b)).unwrap();
            scores.push(s.to_bits());
        }
    }
    scores
}

#[test]
fn delete_and_link_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("docs.redb");
    let stub = StubEmbedder::new(32).unwrap();

    {
        let resolver = open_at(&db);
        classify(&resolver, FOX, "fox.txt", &stub);
        classify(&resolver, COOKING, "sauce.txt", &stub);
        resolver.link(&id_of(COOKING), "recipes/sauce.md").unwrap();
        assert!(resolver.delete(&id_of(FOX)).unwrap());
    }

    let resolver = open_at(&db);
    assert!(!resolver.contains(&id_of(FOX)).unwrap());
    let record = resolver.get(&id_of(COOKING)).unwrap().unwrap();
    assert_eq!(
        record.source_labels,
        vec!["sauce.txt".to_string(), "recipes/sauce.md".to_string()]
    );
    assert_eq!(record.embedding.map(|v| v.len()), Some(32));

    let again = classify(&resolver, FOX, "fox.txt", &stub);
    assert_eq!(again.classification, Classification::Unique);
}

#[test]
fn admitted_back_reference_is_cleared_when_target_is_deleted() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("docs.redb");
    let stub = StubEmbedder::new(32).unwrap();
    let edited = PASSAGE.replacen("jumps", "leaps", 1);

    {
        let resolver = open_at(&db);
        classify(&resolver, PASSAGE, "passage.txt", &stub);
        let mut review = classify(&resolver, &edited, "edit.txt", &stub);
        let pending = review.pending.take().unwrap();
        resolver.admit(pending, Some(&id_of(PASSAGE))).unwrap();
        assert!(resolver.delete(&id_of(PASSAGE)).unwrap());
    }

    let resolver = open_at(&db);
    let record = resolver.get(&id_of(&edited)).unwrap().unwrap();
    assert_eq!(record.duplicate_of, None);
}

#[test]
fn config_file_points_at_the_store() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("from-yaml.redb");
    let yaml_path = dir.path().join("docdedup.yaml");
    std::fs::write(
        &yaml_path,
        format!(
            "version: \"1\"\nstorage:\n  backend: redb\n  path: \"{}\"\nsemantic:\n  enabled: false\n",
            db.display()
        ),
    )
    .unwrap();

    let config = DedupConfig::from_file(&yaml_path).unwrap();
    let embedder = docdedup::build_embedder(&config).unwrap();
    {
        let resolver = docdedup::open(&config).unwrap();
        classify(&resolver, FOX, "fox.txt", &embedder);
    }
    assert!(db.exists());
    let resolver = docdedup::open(&config).unwrap();
    assert!(resolver.contains(&id_of(FOX)).unwrap());
}
