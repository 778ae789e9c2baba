#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use docdedup::{
    DedupConfig, DocumentId, DuplicateResolver, Embedder, SemanticError, Verdict,
};

pub const FOX: &str = "The quick brown fox jumps over the lazy dog.";
pub const PARAPHRASE: &str = "A fast auburn fox leapt above a sleepy hound.";
pub const PASSAGE: &str = "The quick brown fox jumps over the lazy dog. It was a bright and cold \
morning in the valley, and the farmer had already walked the long fence line twice before \
sunrise. Smoke rose slowly from the chimney of the old stone house while the river below \
carried thin sheets of ice toward the mill. By noon the animals had been fed, the cart \
repaired, and the letters from town finally read aloud at the kitchen table.";
pub const COOKING: &str = "To make a simple tomato sauce, warm olive oil in a heavy pan, add \
chopped garlic and onion, and cook gently until soft. Stir in crushed tomatoes, a pinch of \
salt, and fresh basil, then simmer for twenty minutes.";

/// 200 distinct words; positions in `edits` are replaced.
pub fn tokens(edits: &[usize]) -> String {
    (0..200)
        .map(|i| {
            if edits.contains(&i) {
                format!("alt{i}")
            } else {
                format!("tok{i}")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn id_of(text: &str) -> DocumentId {
    docdedup::hash_bytes(text.as_bytes()).document_id()
}

pub fn in_memory(semantic: bool) -> DuplicateResolver {
    let mut config = DedupConfig::default();
    config.semantic.enabled = semantic;
    docdedup::open(&config).unwrap()
}

pub fn classify(
    resolver: &DuplicateResolver,
    text: &str,
    label: &str,
    embedder: &dyn Embedder,
) -> Verdict {
    resolver
        .classify(text.as_bytes(), text, label, embedder)
        .unwrap()
}

fn concept_axis(word: &str) -> Option<usize> {
    Some(match word {
        "the" | "a" | "an" => return None,
        "quick" | "fast" => 0,
        "brown" | "auburn" => 1,
        "fox" => 2,
        "jumps" | "leaps" | "leapt" => 3,
        "over" | "above" => 4,
        "lazy" | "sleepy" => 5,
        "dog" | "hound" => 6,
        other => 8 + other.bytes().map(usize::from).sum::<usize>() % 56,
    })
}

/// Maps synonyms onto shared axes so paraphrases embed together.
pub struct ConceptEmbedder {
    calls: AtomicUsize,
}

impl ConceptEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for ConceptEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut v = vec![0f32; 64];
        for word in docdedup::canonical::tokenize_words(text) {
            if let Some(axis) = concept_axis(&word) {
                v[axis] += 1.0;
            }
        }
        docdedup::semantic::l2_normalize_in_place(&mut v);
        Ok(v)
    }

    fn model_name(&self) -> &str {
        "concept-64"
    }
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, SemanticError> {
        Err(SemanticError::Inference("model offline".into()))
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Answers only after `delay`.
pub struct SlowEmbedder {
    pub delay: Duration,
}

impl Embedder for SlowEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, SemanticError> {
        thread::sleep(self.delay);
        Ok(vec![1.0; 64])
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}
