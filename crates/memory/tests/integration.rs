//! End-to-end tests for the memory pipeline.
//!
//! These drive a real JSONL store in a temp directory through retrieval,
//! ranking, traversal and assembly.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use mnemos_memory::config::{ContextConfig, EmbeddingConfig, StoreConfig};
use mnemos_memory::context::{FOOTER, TRUNCATION_MARKER};
use mnemos_memory::embedding::{cosine_similarity, FailingEmbedder, HashingEmbedder};
use mnemos_memory::{
    AppendOutcome, ContextAssembler, ContextPipeline, EmbeddingAdapter, EmbeddingProvider,
    MemoryRecord, MemoryStore, MnemosConfig, RankQuery, RelationshipKind, SalienceRanker,
    SearchPath, StoreError, ValidationError,
};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> MnemosConfig {
    MnemosConfig {
        store: StoreConfig {
            path: dir.path().join("memory.jsonl"),
            ..Default::default()
        },
        embedding: EmbeddingConfig {
            timeout_ms: 500,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn pipeline_with(config: &MnemosConfig, provider: Arc<dyn EmbeddingProvider>) -> ContextPipeline {
    let store = Arc::new(MemoryStore::new(&config.store));
    let adapter = Arc::new(EmbeddingAdapter::new(provider, &config.embedding));
    ContextPipeline::new(store, adapter, config)
}

fn hashing_pipeline(config: &MnemosConfig) -> ContextPipeline {
    pipeline_with(
        config,
        Arc::new(HashingEmbedder::new(config.embedding.dimension)),
    )
}

#[tokio::test]
async fn test_recent_fact_ranks_first_and_block_cites_it() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let pipeline = hashing_pipeline(&config);
    let now = Utc::now();

    let mut records = vec![MemoryRecord::fact("Team chose Rust for the kernel")
        .with_id("f1")
        .with_timestamp(now - Duration::minutes(5))];
    let chatter = [
        "lunch plans for friday",
        "printer is broken again",
        "standup moved to ten",
        "new hire starts monday",
        "coffee machine fixed",
    ];
    for (i, text) in chatter.iter().enumerate() {
        records.push(
            MemoryRecord::dialog(*text)
                .with_id(format!("d{i}"))
                .with_timestamp(now - Duration::days(2 + i as i64)),
        );
    }
    pipeline.store().append_many(records).await.unwrap();

    let output = pipeline.build_context("what language did we choose").await;

    assert_eq!(output.ranked[0].memory.id, "f1");
    assert!(output.block.text.contains("Team chose Rust for the kernel"));
    assert!(output.block.text.ends_with(FOOTER));
    assert!(output.block.ids().contains(&"f1"));
}

#[tokio::test]
async fn test_mentioned_file_lands_in_files_section() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let pipeline = hashing_pipeline(&config);
    let now = Utc::now();

    let mut records = Vec::new();
    for i in 0..17 {
        records.push(
            MemoryRecord::fact(format!("standup note number {i} about the roadmap"))
                .with_id(format!("note{i}"))
                .with_timestamp(now - Duration::hours(i as i64 + 1)),
        );
    }
    for (id, file, summary) in [
        ("file-billing", "src/billing.rs", "Generates invoices nightly"),
        ("file-auth", "src/auth.rs", "Session token checks"),
        ("file-cache", "src/cache.rs", "TTL cache for lookups"),
    ] {
        records.push(
            MemoryRecord::file(file, summary)
                .with_id(id)
                .with_timestamp(now - Duration::days(3)),
        );
    }
    assert_eq!(records.len(), 20);
    pipeline.store().append_many(records).await.unwrap();

    let output = pipeline
        .build_context("what does src/billing.rs do with invoices")
        .await;

    assert_eq!(output.block.ids()[0], "file-billing");
    let artifacts = &output.block.sections[0].text;
    let files_line = artifacts
        .lines()
        .find(|l| l.starts_with("[FILES]"))
        .unwrap_or_else(|| panic!("no [FILES] line in {artifacts}"));
    assert!(files_line.contains("src/billing.rs"), "{files_line}");
}

#[tokio::test]
async fn test_walk_skips_dangling_edge() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::open(dir.path().join("memory.jsonl"));
    store
        .append_many(vec![
            MemoryRecord::fact("seed decision")
                .with_id("seed")
                .with_relationship("ghost", Some(RelationshipKind::Child))
                .with_relationship("n1", Some(RelationshipKind::Child)),
            MemoryRecord::fact("a real neighbor").with_id("n1"),
        ])
        .await
        .unwrap();

    let chain = store.walk("seed", 3).await.unwrap();
    let ids: Vec<&str> = chain.iter().map(|l| l.record.id.as_str()).collect();
    assert_eq!(ids, vec!["seed", "n1"]);
    assert_eq!(chain[1].via.as_deref(), Some("seed"));
}

#[tokio::test]
async fn test_walk_terminates_on_cycles() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::open(dir.path().join("memory.jsonl"));
    store
        .append_many(vec![
            MemoryRecord::fact("a")
                .with_id("a")
                .with_relationship("b", Some(RelationshipKind::Next)),
            MemoryRecord::fact("b")
                .with_id("b")
                .with_relationship("a", Some(RelationshipKind::Prev)),
        ])
        .await
        .unwrap();

    let chain = store.walk("a", 50).await.unwrap();
    assert_eq!(chain.len(), 2);
}

#[tokio::test]
async fn test_failing_embedder_still_answers_lexically() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let pipeline = pipeline_with(&config, Arc::new(FailingEmbedder::new(384)));
    pipeline
        .store()
        .append_many(vec![
            MemoryRecord::fact("the ranking weights are configurable").with_id("w"),
            MemoryRecord::fact("lunch is at noon").with_id("l"),
        ])
        .await
        .unwrap();

    let output = pipeline
        .build_context("are the ranking weights configurable")
        .await;

    assert_eq!(output.path, SearchPath::Lexical);
    assert_eq!(output.retrieved[0].id, "w");
    assert!(output.block.ids().contains(&"w"));
}

#[tokio::test]
async fn test_ingest_without_backend_stores_records_unembedded() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let pipeline = pipeline_with(&config, Arc::new(FailingEmbedder::new(384)));

    let outcomes = pipeline
        .ingest(vec![MemoryRecord::fact("stored anyway").with_id("x")])
        .await
        .unwrap();
    assert_eq!(outcomes, vec![AppendOutcome::Appended]);

    let stored = pipeline.store().get("x").await.unwrap().unwrap();
    assert!(stored.embedding.is_none());
}

#[tokio::test]
async fn test_reingesting_a_file_twice_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let batch = vec![
        MemoryRecord::fact("Team chose Rust").with_id("f1"),
        MemoryRecord::dialog("ship it friday").with_id("d1"),
    ];

    let offline = pipeline_with(&config, Arc::new(FailingEmbedder::new(384)));
    let first = offline.ingest(batch.clone()).await.unwrap();
    assert_eq!(first, vec![AppendOutcome::Appended, AppendOutcome::Appended]);

    let online = hashing_pipeline(&config);
    let second = online.ingest(batch).await.unwrap();
    assert_eq!(
        second,
        vec![AppendOutcome::AlreadyPresent, AppendOutcome::AlreadyPresent]
    );
    assert_eq!(online.store().count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_append_rejects_timestamp_after_ingestion() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::open(dir.path().join("memory.jsonl"));
    let now = Utc::now();
    let record = MemoryRecord::fact("from the future")
        .with_id("late")
        .with_timestamp(now + Duration::hours(1))
        .with_ingested_at(now);

    let err = store.append(record).await.unwrap_err();
    let StoreError::Validation(ValidationError::TimestampAfterIngestion { id, .. }) = &err else {
        panic!("expected a timestamp error, got {err:?}");
    };
    assert_eq!(id, "late");
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(store.get("late").await.unwrap().is_none());
}

#[tokio::test]
async fn test_block_respects_budget_and_marks_truncation() {
    let config = ContextConfig {
        max_total_length: 400,
        ..Default::default()
    };
    let records: Vec<MemoryRecord> = (0..12)
        .map(|i| {
            MemoryRecord::fact(format!(
                "decision {i}: the retrieval layer keeps scoring weights in configuration files"
            ))
            .with_id(format!("r{i}"))
        })
        .collect();
    let ranked = SalienceRanker::default().rank(&records, &RankQuery::new("scoring weights"));

    let block = ContextAssembler::new(config).assemble(&ranked, &[], &[], "scoring weights");
    assert!(block.truncated);
    assert!(block.text.chars().count() <= 400);
    assert_eq!(block.char_count, block.text.chars().count());
    assert!(block.text.contains(TRUNCATION_MARKER));
    assert!(block.text.ends_with(FOOTER));

    let roomy = ContextAssembler::default().assemble(&ranked, &[], &[], "scoring weights");
    assert!(!roomy.truncated);
    assert!(!roomy.text.contains(TRUNCATION_MARKER));
}

#[tokio::test]
async fn test_block_never_repeats_an_id() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let pipeline = hashing_pipeline(&config);
    pipeline
        .ingest(vec![
            MemoryRecord::fact("graph traversal follows child edges")
                .with_id("g1")
                .with_relationship("g2", Some(RelationshipKind::Child)),
            MemoryRecord::fact("child edges point to graph details")
                .with_id("g2")
                .with_relationship("g1", Some(RelationshipKind::Parent)),
            MemoryRecord::dialog("how does graph traversal work").with_id("g3"),
        ])
        .await
        .unwrap();

    // g1 and g2 arrive through retrieval, recent records and the walk.
    let output = pipeline.build_context("graph traversal child edges").await;
    let ids = output.block.ids();
    let unique: HashSet<&str> = ids.iter().copied().collect();
    assert_eq!(ids.len(), unique.len());
    assert!(unique.contains("g1") && unique.contains("g2"));
}

#[tokio::test]
async fn test_rank_is_stable() {
    let now = Utc::now();
    let records: Vec<MemoryRecord> = (0..10)
        .map(|i| {
            MemoryRecord::fact("identical content for every record")
                .with_id(format!("same{i}"))
                .with_timestamp(now - Duration::hours(1))
        })
        .collect();
    let ranker = SalienceRanker::default();
    let query = RankQuery::new("identical content").at(now);

    let ids = || -> Vec<String> {
        ranker
            .rank(&records, &query)
            .into_iter()
            .map(|r| r.memory.id)
            .collect()
    };
    let first = ids();
    let second = ids();
    assert_eq!(first, second);
    assert_eq!(first[0], "same0");
}

#[test]
fn test_zero_vector_similarity_is_zero() {
    let zero = vec![0.0f32; 8];
    let other = vec![0.5f32; 8];
    assert_eq!(cosine_similarity(&zero, &other), 0.0);
    assert_eq!(cosine_similarity(&zero, &zero), 0.0);

    let adapter = EmbeddingAdapter::new(Arc::new(HashingEmbedder::new(8)), &EmbeddingConfig {
        dimension: 8,
        ..Default::default()
    });
    assert_eq!(adapter.similarity(&zero, &other), 0.0);
}

#[tokio::test]
async fn test_store_conflict_and_idempotent_append() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::open(dir.path().join("memory.jsonl"));
    let record = MemoryRecord::fact("Team chose Rust for the kernel").with_id("f1");

    assert_eq!(store.append(record.clone()).await.unwrap(), AppendOutcome::Appended);
    assert_eq!(store.append(record.clone()).await.unwrap(), AppendOutcome::AlreadyPresent);

    let divergent = MemoryRecord::fact("Team chose Go for the kernel").with_id("f1");
    let err = store.append(divergent).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { ref id } if id == "f1"));
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_store_skips_malformed_and_torn_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.jsonl");
    let good = serde_json::to_string(&MemoryRecord::fact("survives").with_id("ok")).unwrap();
    let contents = format!("{good}\nnot json at all\n{{\"id\":\"torn\",\"type\":\"fa");
    tokio::fs::write(&path, contents).await.unwrap();

    let store = MemoryStore::open(&path);
    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    let warning = snapshot.warning().unwrap();
    assert_eq!(warning.skipped_lines, 2);
    assert_eq!(warning.first_bad_line, Some(2));

    // The next append must not glue itself onto the torn line.
    store
        .append(MemoryRecord::fact("written after the tear").with_id("after"))
        .await
        .unwrap();
    let snapshot = store.snapshot().await.unwrap();
    assert!(snapshot.contains("ok"));
    assert!(snapshot.contains("after"));
}

#[tokio::test]
async fn test_missing_store_builds_placeholder_block() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let output = hashing_pipeline(&config).build_context("anything").await;
    assert!(output.block.is_empty());
    assert!(!output.block.text.is_empty());
    assert!(output.block.text.ends_with(FOOTER));
}

#[test]
fn test_partial_toml_config_keeps_defaults() {
    let config = MnemosConfig::from_toml_str(
        r#"
        [retrieval]
        k = 3

        [store]
        path = "/tmp/elsewhere.jsonl"
        "#,
    )
    .unwrap();
    assert_eq!(config.retrieval.k, 3);
    assert_eq!(config.retrieval.recent_limit, 10);
    assert_eq!(config.embedding.dimension, 384);
    assert_eq!(config.store.path.to_str(), Some("/tmp/elsewhere.jsonl"));
}
