//! Append-only memory store backed by a line-delimited JSON file.
//!
//! One record per line. Writes are serialized within the process; readers
//! never lock and tolerate a half-written final line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::{AtomicityConfig, AtomicityPolicy, StoreConfig};
use crate::embedding::{cosine_similarity, validate_compatibility};
use crate::error::StoreError;
use crate::graph::{self, ChainLink};
use crate::salience::salience_order;
use crate::snapshot::Snapshot;
use crate::text::{lexical_overlap, token_set};
use crate::types::{MemoryRecord, RecordKind};

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendOutcome {
    Appended,
    /// Same id, byte-identical content; nothing written
    AlreadyPresent,
}

/// A record matched by [`MemoryStore::search`] or
/// [`MemoryStore::search_similar`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub score: f32,
}

pub struct MemoryStore {
    path: PathBuf,
    atomicity: AtomicityConfig,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(config: &StoreConfig) -> Self {
        info!(path = %config.path.display(), "Opening memory store");
        Self {
            path: config.path.clone(),
            atomicity: config.atomicity.clone(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at `path` with default atomicity limits.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::new(&StoreConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_contents(&self) -> Result<String, StoreError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every record. Unusable lines are skipped and reported on the
    /// snapshot's warning. A missing file is an empty store.
    #[instrument(skip(self))]
    pub async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let contents = self.read_contents().await?;
        let snapshot = Snapshot::parse(&contents);
        debug!(records = snapshot.len(), "Read memory store");
        Ok(snapshot)
    }

    /// Append one record.
    ///
    /// Fails with a validation error for malformed or non-atomic records
    /// (unless the policy truncates), and with a conflict when the id exists
    /// with different content.
    #[instrument(skip(self, record), fields(memory_id = %record.id))]
    pub async fn append(&self, record: MemoryRecord) -> Result<AppendOutcome, StoreError> {
        let mut outcomes = self.append_many(vec![record]).await?;
        Ok(outcomes.pop().unwrap_or(AppendOutcome::AlreadyPresent))
    }

    /// Append records in order under one lock. Stops at the first error;
    /// records before it stay written.
    #[instrument(skip(self, records), fields(batch_size = records.len()))]
    pub async fn append_many(
        &self,
        records: Vec<MemoryRecord>,
    ) -> Result<Vec<AppendOutcome>, StoreError> {
        let _guard = self.write_lock.lock().await;

        let contents = self.read_contents().await?;
        let mut needs_newline = !contents.is_empty() && !contents.ends_with('\n');
        let mut existing: HashMap<String, String> = HashMap::new();
        for record in Snapshot::parse(&contents).records() {
            existing.insert(record.id.clone(), serde_json::to_string(record)?);
        }

        let mut file: Option<fs::File> = None;
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records {
            let (id, line) = self.prepare(record)?;

            if let Some(stored) = existing.get(&id) {
                if *stored == line {
                    debug!(memory_id = %id, "Record already present");
                    outcomes.push(AppendOutcome::AlreadyPresent);
                    continue;
                }
                warn!(memory_id = %id, "Conflicting append rejected");
                return Err(StoreError::Conflict { id });
            }

            if file.is_none() {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).await?;
                }
                file = Some(
                    OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&self.path)
                        .await?,
                );
            }
            let Some(handle) = file.as_mut() else {
                return Err(StoreError::Io(std::io::Error::other("store file not open")));
            };

            let mut buf = String::with_capacity(line.len() + 2);
            if needs_newline {
                warn!("Store ended with a torn line; starting a new one");
                buf.push('\n');
                needs_newline = false;
            }
            buf.push_str(&line);
            buf.push('\n');
            handle.write_all(buf.as_bytes()).await?;

            debug!(memory_id = %id, "Appended record");
            existing.insert(id, line);
            outcomes.push(AppendOutcome::Appended);
        }

        if let Some(mut handle) = file {
            handle.flush().await?;
            handle.sync_data().await?;
        }
        Ok(outcomes)
    }

    /// Apply the atomicity policy, validate and serialize.
    fn prepare(&self, mut record: MemoryRecord) -> Result<(String, String), StoreError> {
        if self.atomicity.policy == AtomicityPolicy::Truncate
            && record.truncate_to_atomic(&self.atomicity)
        {
            info!(memory_id = %record.id, "Truncated non-atomic content");
        }
        record.validate(&self.atomicity)?;
        let line = serde_json::to_string(&record)?;
        Ok((record.id, line))
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, StoreError> {
        Ok(self.snapshot().await?.get(id).cloned())
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.snapshot().await?.len())
    }

    /// The `limit` newest records by timestamp; ties go to the later write.
    pub async fn get_recent(&self, limit: usize) -> Result<Vec<MemoryRecord>, StoreError> {
        Ok(self.snapshot().await?.recent(limit))
    }

    pub async fn get_by_type(
        &self,
        kind: RecordKind,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        Ok(self.snapshot().await?.by_kind(kind, limit))
    }

    /// Lexical search over record text.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, StoreError> {
        let snapshot = self.snapshot().await?;
        let query_tokens = token_set(query);
        let hits = snapshot
            .records()
            .iter()
            .filter(|r| r.has_content())
            .map(|r| SearchHit {
                score: lexical_overlap(&query_tokens, &token_set(&r.matching_text())),
                record: r.clone(),
            })
            .filter(|hit| hit.score > 0.0);
        Ok(top_hits(hits, limit))
    }

    /// Cosine search over stored embeddings. Records without a vector
    /// comparable to `vector` are skipped.
    #[instrument(skip(self, vector), fields(dimension = vector.len()))]
    pub async fn search_similar(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let snapshot = self.snapshot().await?;
        let hits = snapshot.records().iter().filter_map(|r| {
            let stored = r.embedding.as_deref()?;
            if !validate_compatibility(Some(stored), Some(vector), None).is_compatible() {
                return None;
            }
            Some(SearchHit {
                score: cosine_similarity(stored, vector),
                record: r.clone(),
            })
        });
        Ok(top_hits(hits, limit))
    }

    /// Breadth-first walk from `seed_id`; see [`graph::walk`].
    pub async fn walk(
        &self,
        seed_id: &str,
        max_depth: usize,
    ) -> Result<Vec<ChainLink>, StoreError> {
        Ok(graph::walk(&self.snapshot().await?, seed_id, max_depth))
    }
}

fn top_hits(hits: impl Iterator<Item = SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = hits.collect();
    hits.sort_by(|a, b| {
        salience_order(
            (a.score, &a.record.timestamp, &a.record.id),
            (b.score, &b.record.timestamp, &b.record.id),
        )
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> MemoryStore {
        MemoryStore::open(dir.path().join("nested").join("memory.jsonl"))
    }

    fn fact(id: &str, text: &str) -> MemoryRecord {
        MemoryRecord::fact(text)
            .with_id(id)
            .with_timestamp(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.get_recent(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_is_idempotent_for_identical_content() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let record = fact("f1", "Team chose Rust for the kernel");
        assert_eq!(store.append(record.clone()).await.unwrap(), AppendOutcome::Appended);
        assert_eq!(store.append(record).await.unwrap(), AppendOutcome::AlreadyPresent);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_append_conflict_on_divergent_content() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(fact("f1", "original")).await.unwrap();
        let err = store.append(fact("f1", "changed")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { id } if id == "f1"));
        assert_eq!(
            store.get("f1").await.unwrap().unwrap().primary_text(),
            Some("original")
        );
    }

    #[tokio::test]
    async fn test_append_rejects_non_atomic_content() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let err = store.append(fact("big", &"word ".repeat(200))).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::NonAtomic { .. })
        ));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_truncate_policy_shortens_content() {
        let dir = TempDir::new().unwrap();
        let mut config = StoreConfig {
            path: dir.path().join("memory.jsonl"),
            ..Default::default()
        };
        config.atomicity.policy = AtomicityPolicy::Truncate;
        let store = MemoryStore::new(&config);
        store.append(fact("big", &"word ".repeat(200))).await.unwrap();
        let stored = store.get("big").await.unwrap().unwrap();
        assert!(stored.primary_text().unwrap().chars().count() <= 512);
    }

    #[tokio::test]
    async fn test_torn_tail_is_repaired_on_next_append() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(fact("a", "first")).await.unwrap();

        let mut contents = std::fs::read_to_string(store.path()).unwrap();
        contents.push_str(r#"{"id":"torn","type":"fa"#);
        std::fs::write(store.path(), contents).unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.warning().unwrap().skipped_lines, 1);

        store.append(fact("b", "second")).await.unwrap();
        let snapshot = store.snapshot().await.unwrap();
        assert!(snapshot.contains("a") && snapshot.contains("b"));
        assert_eq!(snapshot.warning().unwrap().skipped_lines, 1);
    }

    #[tokio::test]
    async fn test_append_many_stops_at_first_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let result = store
            .append_many(vec![
                fact("a", "one"),
                MemoryRecord::fact("").with_id("bad"),
                fact("c", "three"),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recent_type_and_search() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        store
            .append_many(vec![
                MemoryRecord::fact("retrieval falls back to lexical search")
                    .with_id("f1")
                    .with_timestamp(base),
                MemoryRecord::dialog("shall we grab lunch")
                    .with_id("d1")
                    .with_timestamp(base + Duration::hours(1)),
                MemoryRecord::fact("ranking uses recency decay")
                    .with_id("f2")
                    .with_timestamp(base + Duration::hours(2))
                    .with_embedding(vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let recent: Vec<String> = store
            .get_recent(2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(recent, vec!["f2", "d1"]);

        let facts = store.get_by_type(RecordKind::Fact, 10).await.unwrap();
        assert_eq!(facts.len(), 2);

        let hits = store.search("lexical search", 5).await.unwrap();
        assert_eq!(hits[0].record.id, "f1");
        assert_eq!(hits.len(), 1);

        let similar = store.search_similar(&[0.9, 0.1], 5).await.unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].record.id, "f2");
        assert!(store.search_similar(&[1.0, 0.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_walk_through_store() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .append_many(vec![
                fact("s", "seed").with_relationship("ghost", None),
                fact("n", "neighbor").with_relationship("s", None),
            ])
            .await
            .unwrap();
        let chain = store.walk("s", 2).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].record.id, "s");
    }
}
