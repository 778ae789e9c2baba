use std::collections::HashSet;
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use canonical::{hash_bytes, hash_reader, ContentDigest, DocumentId};
use dashmap::DashMap;
use index::{
    DocumentRecord, DocumentStore, InMemoryBackend, IndexBackend, IndexError, NearDuplicateIndex,
    RecordRow, SemanticIndex, Table,
};
use perceptual::{build_sketch, Signature};
use semantic::{Embedder, SemanticError};
use tracing::{debug, info, warn, Level};

use crate::locks::HashLocks;
use crate::metrics::metrics_recorder;
use crate::types::{
    Classification, DetectionMethod, Disposition, InputError, PendingDocument, RebuildReport,
    RelatedCandidate, ResolveError, ResolverConfig, TierOutcome, Verdict,
};


/// Decides whether a document is new, an exact copy, a near copy, or a
/// paraphrase of something already stored, and keeps the store in step.
///
/// Tiers run cheapest first and stop at the first decisive one:
/// content hash, then MinHash/LSH over word shingles, then embeddings.
/// The embedder is called at most once per classification and only when
/// the first two tiers found nothing.
///
/// Classifications run concurrently. Calls for the same content serialise
/// on a per-document lock; a rebuild waits for in-flight calls and blocks
/// new ones.
///
/// Lock order: document lock, then the gate, then a row lock. Row locks are
/// only held around a single read-append-write of one record row.
pub struct DuplicateResolver {
    config: ResolverConfig,
    store: Arc<DocumentStore>,
    near: NearDuplicateIndex,
    semantic: SemanticIndex,
    locks: HashLocks,
    row_locks: HashLocks,
    gate: RwLock<()>,
    /// Stored records. Exact while the gate is held.
    records: AtomicUsize,
    /// target -> records whose `duplicate_of` points at it.
    back_refs: DashMap<DocumentId, Vec<DocumentId>>,
}

/// Embedding for the text under classification, computed on first use and
/// reused if the call is retried.
struct LazyEmbedding<'a> {
    embedder: &'a dyn Embedder,
    text: &'a str,
    cached: Option<Result<Vec<f32>, SemanticError>>,
}

impl<'a> LazyEmbedding<'a> {
    fn new(embedder: &'a dyn Embedder, text: &'a str) -> Self {
        Self {
            embedder,
            text,
            cached: None,
        }
    }

    fn get(&mut self) -> Result<Vec<f32>, SemanticError> {
        let embedder = self.embedder;
        let text = self.text;
        self.cached
            .get_or_insert_with(|| embedder.embed(text))
            .clone()
    }
}

struct SemanticLookup {
    outcome: TierOutcome,
    embedding: Option<Vec<f32>>,
    best: f32,
}

struct CountingReader<R> {
    inner: R,
    bytes: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }
}

impl DuplicateResolver {
    /// Open the configured storage backend and rebuild both indexes from it.
    pub fn open(config: ResolverConfig) -> Result<Self, ResolveError> {
        config.validate()?;
        let backend = config.storage.build()?;
        Self::with_backend(config, backend)
    }

    /// Resolver over a fresh in-memory store, ignoring `config.storage`.
    pub fn in_memory(config: ResolverConfig) -> Result<Self, ResolveError> {
        Self::with_backend(config, Box::new(InMemoryBackend::new()))
    }

    pub fn with_backend(
        config: ResolverConfig,
        backend: Box<dyn IndexBackend>,
    ) -> Result<Self, ResolveError> {
        config.validate()?;
        let store = Arc::new(DocumentStore::new(backend, config.compression.clone()));
        let near = NearDuplicateIndex::new(config.lsh, Arc::clone(&store))?;
        let semantic = SemanticIndex::new(
            Arc::clone(&store),
            config.semantic.dimension,
            config.semantic.ann,
        );
        let resolver = Self {
            config,
            store,
            near,
            semantic,
            locks: HashLocks::new(),
            row_locks: HashLocks::new(),
            gate: RwLock::new(()),
            records: AtomicUsize::new(0),
            back_refs: DashMap::new(),
        };
        resolver.rebuild()?;
        Ok(resolver)
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_gate(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify one document.
    ///
    /// `bytes` are the raw document bytes (they decide exact identity);
    /// `text` is its normalised text (it feeds the sketch and the embedder);
    /// `label` names where it came from, e.g. a file path.
    pub fn classify(
        &self,
        bytes: &[u8],
        text: &str,
        label: &str,
        embedder: &dyn Embedder,
    ) -> Result<Verdict, ResolveError> {
        let start = Instant::now();
        let result = if bytes.is_empty() {
            Err(InputError::Empty.into())
        } else {
            self.classify_digest(hash_bytes(bytes), text, label, embedder)
        };
        self.finish(start, label, result)
    }

    /// Like [`classify`](Self::classify), hashing the raw bytes from a reader.
    pub fn classify_reader<R: Read>(
        &self,
        reader: R,
        text: &str,
        label: &str,
        embedder: &dyn Embedder,
    ) -> Result<Verdict, ResolveError> {
        let start = Instant::now();
        let result = read_digest(reader)
            .and_then(|digest| self.classify_digest(digest, text, label, embedder));
        self.finish(start, label, result)
    }

    fn finish(
        &self,
        start: Instant,
        label: &str,
        result: Result<Verdict, ResolveError>,
    ) -> Result<Verdict, ResolveError> {
        let latency = start.elapsed();
        let elapsed_micros = latency.as_micros();
        match &result {
            Ok(verdict) => info!(
                label,
                classification = %verdict.classification,
                disposition = ?verdict.disposition,
                score = verdict.score,
                matched = ?verdict.matched.as_ref().map(DocumentId::as_str),
                semantic_unavailable = verdict.semantic_unavailable,
                elapsed_micros,
                "classify_success"
            ),
            Err(err) => warn!(label, error = %err, elapsed_micros, "classify_failure"),
        }
        if let Some(recorder) = metrics_recorder() {
            recorder.record_classify(
                latency,
                result
                    .as_ref()
                    .map(|v| (v.classification, v.disposition)),
            );
        }
        result
    }

    fn classify_digest(
        &self,
        digest: ContentDigest,
        text: &str,
        label: &str,
        embedder: &dyn Embedder,
    ) -> Result<Verdict, ResolveError> {
        let id = digest.document_id();
        let span = tracing::span!(Level::INFO, "resolver.classify", id = %id, label);
        let _enter = span.enter();

        let _lock = self.locks.acquire(&id);
        let mut embedding = LazyEmbedding::new(embedder, text);
        match self.classify_locked(digest, text, label, &mut embedding) {
            Err(err) if err.is_corruption() => {
                warn!(error = %err, "index_corruption_detected");
                self.rebuild()?;
                self.classify_locked(digest, text, label, &mut embedding)
            }
            other => other,
        }
    }

    fn classify_locked(
        &self,
        digest: ContentDigest,
        text: &str,
        label: &str,
        embedding: &mut LazyEmbedding<'_>,
    ) -> Result<Verdict, ResolveError> {
        let _gate = self.read_gate();
        let id = digest.document_id();
        let t = self.config.thresholds;

        if self.append_label(&id, label)? {
            return Ok(Verdict::exact(id));
        }

        let signature = build_sketch(text, &self.config.sketch)?;
        let (near, near_best) = self.near_tier(&signature)?;
        if let TierOutcome::Matched { id: matched, score } = near {
            if score >= t.near_auto_link {
                if !self.append_label(&matched, label)? {
                    return Err(IndexError::corruption(
                        Table::Records,
                        matched.as_str(),
                        "bucketed id has no record row",
                    )
                    .into());
                }
                return Ok(Verdict {
                    classification: Classification::Near,
                    matched: Some(matched.clone()),
                    score,
                    method: DetectionMethod::MinHash,
                    disposition: Disposition::Linked,
                    document_id: Some(matched),
                    related: None,
                    semantic_unavailable: false,
                    pending: None,
                });
            }
            if score >= t.near_review {
                return Ok(Verdict {
                    classification: Classification::Near,
                    matched: Some(matched),
                    score,
                    method: DetectionMethod::MinHash,
                    disposition: Disposition::Review,
                    document_id: None,
                    related: None,
                    semantic_unavailable: false,
                    pending: Some(PendingDocument {
                        digest,
                        label: label.to_string(),
                        signature,
                        embedding: None,
                    }),
                });
            }
            // Related: close enough that embedding it would add nothing.
            let stored = self.store_new(digest, label, signature, None, None)?;
            let mut verdict = Verdict::stored(stored, score);
            verdict.related = Some(RelatedCandidate {
                id: matched,
                score,
                method: DetectionMethod::MinHash,
            });
            return Ok(verdict);
        }

        if !self.config.semantic.enabled {
            let stored = self.store_new(digest, label, signature, None, None)?;
            return Ok(Verdict::stored(stored, near_best));
        }

        let lookup = self.semantic_tier(embedding)?;
        let best = near_best.max(lookup.best);
        match lookup.outcome {
            TierOutcome::Unavailable { reason } => {
                warn!(reason = %reason, "semantic_tier_unavailable");
                let stored = self.store_new(digest, label, signature, None, None)?;
                let mut verdict = Verdict::stored(stored, best);
                verdict.semantic_unavailable = true;
                Ok(verdict)
            }
            TierOutcome::Matched { id: matched, score } if score >= t.semantic_review => {
                Ok(Verdict {
                    classification: Classification::Semantic,
                    matched: Some(matched),
                    score,
                    method: DetectionMethod::Embedding,
                    disposition: Disposition::Review,
                    document_id: None,
                    related: None,
                    semantic_unavailable: false,
                    pending: Some(PendingDocument {
                        digest,
                        label: label.to_string(),
                        signature,
                        embedding: lookup.embedding,
                    }),
                })
            }
            TierOutcome::Matched { id: matched, score } => {
                let stored = self.store_new(digest, label, signature, lookup.embedding, None)?;
                Ok(Verdict {
                    classification: Classification::Semantic,
                    matched: Some(matched),
                    score,
                    method: DetectionMethod::Embedding,
                    disposition: Disposition::Related,
                    document_id: Some(stored),
                    related: None,
                    semantic_unavailable: false,
                    pending: None,
                })
            }
            TierOutcome::NotMatched => {
                let stored = self.store_new(digest, label, signature, lookup.embedding, None)?;
                Ok(Verdict::stored(stored, best))
            }
        }
    }

    /// Best LSH candidate by estimated Jaccard. `Matched` only at or above
    /// the related threshold; the second value is the best score seen.
    fn near_tier(&self, signature: &Signature) -> Result<(TierOutcome, f32), ResolveError> {
        let candidates = self.near.query_ranked(signature)?;
        let mut best: Option<(DocumentId, f32)> = None;
        for candidate in candidates.into_iter().take(self.config.max_candidates) {
            let score = self.near.similarity_to(signature, &candidate.id)?;
            if best.as_ref().is_none_or(|(_, s)| score > *s) {
                best = Some((candidate.id, score));
            }
        }
        Ok(match best {
            Some((id, score)) if score >= self.config.thresholds.near_related => {
                debug!(candidate = %id, score, "near_tier_match");
                (TierOutcome::Matched { id, score }, score)
            }
            Some((_, score)) => (TierOutcome::NotMatched, score),
            None => (TierOutcome::NotMatched, 0.0),
        })
    }

    fn semantic_tier(
        &self,
        embedding: &mut LazyEmbedding<'_>,
    ) -> Result<SemanticLookup, ResolveError> {
        let unavailable = |reason: String| SemanticLookup {
            outcome: TierOutcome::Unavailable { reason },
            embedding: None,
            best: 0.0,
        };
        let vector = match embedding.get() {
            Ok(vector) => vector,
            Err(err) => return Ok(unavailable(err.to_string())),
        };
        if let Err(err) = self.semantic.check_embedding(&vector) {
            return Ok(unavailable(err.to_string()));
        }

        let hits = self.semantic.query(&vector, self.config.semantic.top_k)?;
        let best = hits.first().map(|hit| hit.similarity).unwrap_or(0.0);
        let outcome = match hits.into_iter().next() {
            Some(hit) if hit.similarity >= self.config.thresholds.semantic_ignore => {
                TierOutcome::Matched {
                    id: hit.id,
                    score: hit.similarity,
                }
            }
            _ => TierOutcome::NotMatched,
        };
        Ok(SemanticLookup {
            outcome,
            embedding: Some(vector),
            best,
        })
    }

    /// Append `label` to the stored record `id`. Returns false if there is
    /// no such record.
    ///
    /// Callers writing into a record other than the one they hold the
    /// document lock for (auto-link, link, exact copies) may race, so the
    /// row is re-read under its row lock.
    fn append_label(&self, id: &DocumentId, label: &str) -> Result<bool, ResolveError> {
        let _row = self.row_locks.acquire(id);
        let Some(mut row) = self.store.row(id)? else {
            return Ok(false);
        };
        row.source_labels.push(label.to_string());
        let mut batch = self.store.batch();
        batch.put_row(&row)?;
        self.store.commit(batch)?;
        Ok(true)
    }

    /// Commit a new record with all its rows, then index it.
    fn store_new(
        &self,
        digest: ContentDigest,
        label: &str,
        signature: Signature,
        embedding: Option<Vec<f32>>,
        duplicate_of: Option<DocumentId>,
    ) -> Result<DocumentId, ResolveError> {
        let mut record = DocumentRecord::new(digest, label, signature, embedding);
        record.duplicate_of = duplicate_of;

        let mut batch = self.store.batch();
        batch.put_record(&record)?;
        self.store.commit(batch)?;
        self.records.fetch_add(1, Ordering::SeqCst);
        if let Some(target) = &record.duplicate_of {
            self.back_refs
                .entry(target.clone())
                .or_default()
                .push(record.id.clone());
        }

        self.near.index_in_memory(&record.id, &record.signature)?;
        if let Some(vector) = &record.embedding {
            self.semantic.index_in_memory(&record.id, vector)?;
        }
        Ok(record.id)
    }

    /// Append a label to a stored document, e.g. after confirming a review.
    pub fn link(&self, id: &DocumentId, label: &str) -> Result<(), ResolveError> {
        let _lock = self.locks.acquire(id);
        let _gate = self.read_gate();
        if !self.append_label(id, label)? {
            return Err(ResolveError::NotFound(id.clone()));
        }
        info!(id = %id, label, "document_linked");
        Ok(())
    }

    /// Store a document previously returned for review as its own record.
    ///
    /// `duplicate_of` records which document the caller judged it to copy.
    /// If the same bytes were stored in the meantime the label is appended
    /// to that record instead and the verdict is `Exact`.
    pub fn admit(
        &self,
        pending: PendingDocument,
        duplicate_of: Option<&DocumentId>,
    ) -> Result<Verdict, ResolveError> {
        let id = pending.document_id();
        let _lock = self.locks.acquire(&id);
        let _gate = self.read_gate();

        if let Some(target) = duplicate_of {
            if !self.store.contains(target)? {
                return Err(ResolveError::NotFound(target.clone()));
            }
        }
        if self.append_label(&id, &pending.label)? {
            return Ok(Verdict::exact(id));
        }
        pending.signature.ensure_len(self.config.sketch.num_hashes)?;
        if let Some(vector) = &pending.embedding {
            self.semantic.check_embedding(vector)?;
        }

        let stored = self.store_new(
            pending.digest,
            &pending.label,
            pending.signature,
            pending.embedding,
            duplicate_of.cloned(),
        )?;
        info!(id = %stored, duplicate_of = ?duplicate_of.map(DocumentId::as_str), "document_admitted");
        Ok(Verdict::stored(stored, 0.0))
    }

    /// Remove a document, its derived rows and any `duplicate_of` references
    /// to it in one transaction. Returns false if it was not stored.
    ///
    /// Deletion is exclusive: it waits for in-flight classifications.
    pub fn delete(&self, id: &DocumentId) -> Result<bool, ResolveError> {
        let _lock = self.locks.acquire(id);
        let _gate = self.write_gate();

        if !self.store.contains(id)? {
            return Ok(false);
        }
        let signature = tolerate_corruption(self.store.signature(id))?;
        let own_target = tolerate_corruption(self.store.row(id))?.and_then(|row| row.duplicate_of);

        let referrers = self
            .back_refs
            .get(id)
            .map(|refs| refs.value().clone())
            .unwrap_or_default();
        let mut batch = self.store.batch();
        batch.delete_all(id);
        let mut cleared = 0usize;
        for referrer in &referrers {
            let Some(mut row) = tolerate_corruption(self.store.row(referrer))? else {
                continue;
            };
            if row.duplicate_of.as_ref() == Some(id) {
                row.duplicate_of = None;
                batch.put_row(&row)?;
                cleared += 1;
            }
        }
        self.store.commit(batch)?;

        self.records
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .ok();
        self.back_refs.remove(id);
        if let Some(target) = own_target {
            self.back_refs.remove_if_mut(&target, |_, refs| {
                refs.retain(|r| r != id);
                refs.is_empty()
            });
        }

        match signature {
            Some(sig) if sig.len() == self.config.lsh.signature_len() => {
                self.near.remove(id, &sig)?
            }
            _ => self.near.purge(id)?,
        }
        self.semantic.remove(id)?;
        info!(id = %id, cleared_references = cleared, "document_deleted");
        Ok(true)
    }

    /// Store or replace the embedding of a stored document.
    pub fn attach_embedding(&self, id: &DocumentId, embedding: &[f32]) -> Result<(), ResolveError> {
        let _lock = self.locks.acquire(id);
        let _gate = self.read_gate();
        if !self.store.contains(id)? {
            return Err(ResolveError::NotFound(id.clone()));
        }
        self.semantic.check_embedding(embedding)?;
        self.semantic.insert(id, embedding)?;
        debug!(id = %id, dimension = embedding.len(), "embedding_attached");
        Ok(())
    }

    pub fn get(&self, id: &DocumentId) -> Result<Option<DocumentRecord>, ResolveError> {
        let _gate = self.read_gate();
        Ok(self.store.record(id)?)
    }

    pub fn contains(&self, id: &DocumentId) -> Result<bool, ResolveError> {
        let _gate = self.read_gate();
        Ok(self.store.contains(id)?)
    }

    /// Number of stored documents.
    pub fn len(&self) -> Result<usize, ResolveError> {
        let _gate = self.read_gate();
        Ok(self.records.load(Ordering::SeqCst))
    }

    pub fn is_empty(&self) -> Result<bool, ResolveError> {
        Ok(self.len()? == 0)
    }

    /// Estimated Jaccard between two stored documents.
    pub fn near_similarity(&self, a: &DocumentId, b: &DocumentId) -> Result<f32, ResolveError> {
        let _gate = self.read_gate();
        Ok(self.near.exact_jaccard(a, b)?)
    }

    /// Reconstruct both in-memory indexes from the persisted tables.
    ///
    /// Rows that cannot be decoded and signature or embedding rows without a
    /// record are removed. Records whose signature row is missing or was
    /// removed keep their labels and exact identity; they get the empty
    /// sketch, so the near tier skips them. Everything is listed in the
    /// report.
    pub fn rebuild(&self) -> Result<RebuildReport, ResolveError> {
        let start = Instant::now();
        let report = {
            let _gate = self.write_gate();
            self.rebuild_locked()?
        };
        let latency = start.elapsed();
        let elapsed_micros = latency.as_micros();
        if report.is_clean() {
            info!(
                records = report.records,
                signatures_indexed = report.signatures_indexed,
                embeddings_indexed = report.embeddings_indexed,
                elapsed_micros,
                "index_rebuild"
            );
        } else {
            warn!(
                records = report.records,
                signatures_indexed = report.signatures_indexed,
                embeddings_indexed = report.embeddings_indexed,
                undecodable = report.undecodable.len(),
                orphans = report.orphans.len(),
                unindexed = report.unindexed.len(),
                elapsed_micros,
                "index_rebuild"
            );
        }
        if let Some(recorder) = metrics_recorder() {
            recorder.record_rebuild(latency, &report);
        }
        Ok(report)
    }

    fn rebuild_locked(&self) -> Result<RebuildReport, ResolveError> {
        let mut report = RebuildReport::default();

        let (records, mut bad_records) = self.store.load_table::<RecordRow>(Table::Records)?;
        let (signatures, bad_signatures) = self.store.load_table::<Signature>(Table::Signatures)?;
        let (embeddings, bad_embeddings) = self.store.load_table::<Vec<f32>>(Table::Embeddings)?;

        let mut live: HashSet<DocumentId> = HashSet::with_capacity(records.len());
        let mut back_refs: Vec<(DocumentId, DocumentId)> = Vec::new();
        for (key, row) in records {
            if row.id == key {
                if let Some(target) = row.duplicate_of {
                    back_refs.push((target, key.clone()));
                }
                live.insert(key);
            } else {
                bad_records.push(key.to_string());
            }
        }

        let (mut kept_signatures, orphan_signatures): (Vec<_>, Vec<_>) =
            signatures.into_iter().partition(|(id, _)| live.contains(id));
        let (kept_embeddings, orphan_embeddings): (Vec<_>, Vec<_>) =
            embeddings.into_iter().partition(|(id, _)| live.contains(id));

        let signed: HashSet<&DocumentId> = kept_signatures.iter().map(|(id, _)| id).collect();
        let mut unindexed: Vec<DocumentId> = live
            .iter()
            .filter(|id| !signed.contains(id))
            .cloned()
            .collect();
        unindexed.sort();

        let orphan_signature_keys: Vec<String> =
            orphan_signatures.iter().map(|(id, _)| id.to_string()).collect();
        let orphan_embedding_keys: Vec<String> =
            orphan_embeddings.iter().map(|(id, _)| id.to_string()).collect();

        self.store.purge_keys(Table::Records, &bad_records)?;
        self.store.purge_keys(Table::Signatures, &bad_signatures)?;
        self.store.purge_keys(Table::Embeddings, &bad_embeddings)?;
        self.store.purge_keys(Table::Signatures, &orphan_signature_keys)?;
        self.store.purge_keys(Table::Embeddings, &orphan_embedding_keys)?;

        if !unindexed.is_empty() {
            let empty = Signature::empty_sketch(self.config.sketch.num_hashes);
            let mut batch = self.store.batch();
            for id in &unindexed {
                batch.put_signature(id, &empty)?;
                kept_signatures.push((id.clone(), empty.clone()));
            }
            self.store.commit(batch)?;
        }

        self.records.store(live.len(), Ordering::SeqCst);
        self.back_refs.clear();
        for (target, referrer) in back_refs {
            self.back_refs.entry(target).or_default().push(referrer);
        }

        report.records = live.len();
        report.signatures_indexed = self.near.rebuild_from(kept_signatures)?;
        report.embeddings_indexed = self.semantic.rebuild_from(kept_embeddings)?;

        report.undecodable = bad_records
            .into_iter()
            .map(|key| (Table::Records, key))
            .chain(bad_signatures.into_iter().map(|key| (Table::Signatures, key)))
            .chain(bad_embeddings.into_iter().map(|key| (Table::Embeddings, key)))
            .collect();
        report.orphans = orphan_signature_keys
            .into_iter()
            .map(|key| (Table::Signatures, key))
            .chain(orphan_embedding_keys.into_iter().map(|key| (Table::Embeddings, key)))
            .collect();
        report.unindexed = unindexed.iter().map(ToString::to_string).collect();
        Ok(report)
    }
}

/// Treat an unreadable row as absent.
fn tolerate_corruption<T>(
    result: Result<Option<T>, IndexError>,
) -> Result<Option<T>, IndexError> {
    match result {
        Err(err) if err.is_corruption() => Ok(None),
        other => other,
    }
}

fn read_digest<R: Read>(reader: R) -> Result<ContentDigest, ResolveError> {
    let mut counting = CountingReader {
        inner: reader,
        bytes: 0,
    };
    let digest = hash_reader(&mut counting).map_err(InputError::from)?;
    if counting.bytes == 0 {
        return Err(InputError::Empty.into());
    }
    Ok(digest)
}
