//! Salience ranking.
//!
//! A record's score is a weighted sum of five signals, each in `[0, 1]`:
//!
//! - **recency**: `0.5^(age / half_life)`
//! - **frequency**: how many *other* records in the set say nearly the same
//!   thing (`1 - 1/(1 + n)`)
//! - **relevance**: cosine against the query vector when both sides have a
//!   usable embedding, lexical overlap otherwise
//! - **kind**: a fixed prior per [`RecordKind`]
//! - **salient**: 1 when the writer flagged the record
//!
//! The weights come from [`RankingConfig`].

use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::RankingConfig;
use crate::embedding::{cosine_similarity, validate_compatibility};
use crate::text::{jaccard, lexical_overlap, token_set};
use crate::types::{MemoryRecord, RankedMemory, RecordKind, ScoreBreakdown};

/// Prior importance of a record kind.
pub fn kind_weight(kind: RecordKind) -> f32 {
    match kind {
        RecordKind::Fact => 1.0,
        RecordKind::Management => 0.8,
        RecordKind::CodeSemanticSummary => 0.75,
        RecordKind::Summary | RecordKind::File => 0.7,
        RecordKind::ConversationSummary => 0.65,
        RecordKind::Code => 0.6,
        RecordKind::FileDiff => 0.55,
        RecordKind::Error => 0.5,
        RecordKind::Dialog => 0.4,
        RecordKind::Other => 0.3,
    }
}

/// Deterministic salience order: score descending, then newer first, then
/// id ascending.
pub(crate) fn salience_order(
    a: (f32, &DateTime<Utc>, &str),
    b: (f32, &DateTime<Utc>, &str),
) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| b.1.cmp(a.1))
        .then_with(|| a.2.cmp(b.2))
}

pub(crate) fn cmp_ranked(a: &RankedMemory, b: &RankedMemory) -> Ordering {
    salience_order(
        (a.score, &a.memory.timestamp, &a.memory.id),
        (b.score, &b.memory.timestamp, &b.memory.id),
    )
}

/// What records are ranked against.
#[derive(Debug, Clone, Copy)]
pub struct RankQuery<'a> {
    pub text: &'a str,
    pub embedding: Option<&'a [f32]>,
    pub now: DateTime<Utc>,
}

impl<'a> RankQuery<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            embedding: None,
            now: Utc::now(),
        }
    }

    pub fn with_embedding(mut self, embedding: Option<&'a [f32]>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Pin the clock, for reproducible scores.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

pub struct SalienceRanker {
    config: RankingConfig,
}

impl SalienceRanker {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Score `records` against `query` and return them best first.
    ///
    /// Records without content are dropped before scoring, as are repeats of
    /// an id already seen.
    pub fn rank(&self, records: &[MemoryRecord], query: &RankQuery<'_>) -> Vec<RankedMemory> {
        let started = Instant::now();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut excluded = 0usize;
        let candidates: Vec<&MemoryRecord> = records
            .iter()
            .filter(|r| {
                if !r.has_content() {
                    debug!(memory_id = %r.id, "Excluding record without content");
                    excluded += 1;
                    return false;
                }
                seen.insert(r.id.as_str())
            })
            .collect();

        let tokens: Vec<HashSet<String>> =
            candidates.iter().map(|r| token_set(&r.matching_text())).collect();
        let query_tokens = token_set(query.text);
        let reinforcement = self.reinforcement_counts(&candidates, &tokens);

        let mut ranked: Vec<RankedMemory> = candidates
            .iter()
            .zip(tokens.iter())
            .zip(reinforcement)
            .map(|((record, doc_tokens), similar)| {
                let breakdown = self.score(record, doc_tokens, similar, &query_tokens, query);
                let total = breakdown.recency
                    + breakdown.frequency
                    + breakdown.relevance
                    + breakdown.kind
                    + breakdown.salient;
                RankedMemory {
                    memory: (*record).clone(),
                    score: if total.is_finite() { total } else { 0.0 },
                    breakdown,
                }
            })
            .collect();

        ranked.sort_by(cmp_ranked);

        info!(
            target: "mnemos::audit",
            event = "ranking",
            candidates = ranked.len(),
            excluded,
            duration_ms = started.elapsed().as_millis() as u64,
            "Ranked memory records"
        );
        ranked
    }

    fn score(
        &self,
        record: &MemoryRecord,
        doc_tokens: &HashSet<String>,
        similar: usize,
        query_tokens: &HashSet<String>,
        query: &RankQuery<'_>,
    ) -> ScoreBreakdown {
        let w = &self.config.weights;

        let age_hours = (query.now - record.timestamp).num_milliseconds().max(0) as f64 / 3.6e6;
        let half_life = self.config.recency_half_life_hours.max(f64::EPSILON);
        let recency = 0.5f64.powf(age_hours / half_life) as f32;

        let frequency = 1.0 - 1.0 / (1.0 + similar as f32);

        let relevance = match (record.embedding.as_deref(), query.embedding) {
            (Some(stored), Some(q))
                if validate_compatibility(Some(stored), Some(q), None).is_compatible() =>
            {
                cosine_similarity(stored, q).max(0.0)
            }
            _ => lexical_overlap(query_tokens, doc_tokens),
        };

        ScoreBreakdown {
            recency: w.recency * sanitize(recency),
            frequency: w.frequency * sanitize(frequency),
            relevance: w.relevance * sanitize(relevance),
            kind: w.kind * kind_weight(record.kind()),
            salient: if record.salient { w.salient } else { 0.0 },
        }
    }

    /// For each candidate, the number of other candidates carrying
    /// near-duplicate content.
    fn reinforcement_counts(
        &self,
        candidates: &[&MemoryRecord],
        tokens: &[HashSet<String>],
    ) -> Vec<usize> {
        let mut counts = vec![0usize; candidates.len()];
        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                if self.is_reinforcing(candidates[i], candidates[j], &tokens[i], &tokens[j]) {
                    counts[i] += 1;
                    counts[j] += 1;
                }
            }
        }
        counts
    }

    fn is_reinforcing(
        &self,
        a: &MemoryRecord,
        b: &MemoryRecord,
        a_tokens: &HashSet<String>,
        b_tokens: &HashSet<String>,
    ) -> bool {
        if let (Some(ea), Some(eb)) = (a.embedding.as_deref(), b.embedding.as_deref()) {
            if validate_compatibility(Some(ea), Some(eb), None).is_compatible() {
                return cosine_similarity(ea, eb) >= self.config.semantic_reinforcement_threshold;
            }
        }
        jaccard(a_tokens, b_tokens) >= self.config.lexical_reinforcement_threshold
    }
}

impl Default for SalienceRanker {
    fn default() -> Self {
        Self::new(RankingConfig::default())
    }
}

fn sanitize(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Take the top `n` ids from a ranking, for seeding graph walks.
pub fn top_ids(ranked: &[RankedMemory], n: usize) -> Vec<String> {
    ranked
        .iter()
        .take(n)
        .map(|r| r.memory.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn ids(ranked: &[RankedMemory]) -> Vec<&str> {
        ranked.iter().map(|r| r.memory.id.as_str()).collect()
    }

    #[test]
    fn test_fact_outranks_older_dialog() {
        let mut records = vec![MemoryRecord::fact("Team chose Rust for the kernel")
            .with_id("f1")
            .with_timestamp(now() - Duration::minutes(5))];
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
                    .with_timestamp(now() - Duration::days(2 + i as i64)),
            );
        }
        let ranked = SalienceRanker::default()
            .rank(&records, &RankQuery::new("what language did we choose").at(now()));
        assert_eq!(ranked[0].memory.id, "f1");
        assert_eq!(ranked.len(), 6);
    }

    #[test]
    fn test_records_without_content_are_excluded() {
        let records = vec![
            MemoryRecord::fact("   ").with_id("blank"),
            MemoryRecord::fact("present").with_id("ok"),
        ];
        let ranked = SalienceRanker::default().rank(&records, &RankQuery::new("present").at(now()));
        assert_eq!(ids(&ranked), vec!["ok"]);
    }

    #[test]
    fn test_duplicate_ids_ranked_once() {
        let records = vec![
            MemoryRecord::fact("alpha").with_id("a"),
            MemoryRecord::fact("alpha again").with_id("a"),
        ];
        let ranked = SalienceRanker::default().rank(&records, &RankQuery::new("alpha").at(now()));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].memory.primary_text(), Some("alpha"));
    }

    #[test]
    fn test_ties_break_by_timestamp_then_id() {
        let ts = now() - Duration::hours(1);
        let records = vec![
            MemoryRecord::fact("same words").with_id("b").with_timestamp(ts),
            MemoryRecord::fact("same words").with_id("a").with_timestamp(ts),
            MemoryRecord::fact("same words")
                .with_id("c")
                .with_timestamp(ts - Duration::hours(1)),
        ];
        let mut config = RankingConfig::default();
        config.weights.recency = 0.0;
        let ranker = SalienceRanker::new(config);
        let ranked = ranker.rank(&records, &RankQuery::new("same").at(now()));
        assert_eq!(ids(&ranked), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rank_is_stable_across_runs() {
        let records: Vec<MemoryRecord> = (0..12)
            .map(|i| {
                MemoryRecord::dialog(format!("message {} about retrieval", i % 3))
                    .with_id(format!("m{i:02}"))
                    .with_timestamp(now() - Duration::hours(i % 4))
            })
            .collect();
        let ranker = SalienceRanker::default();
        let query = RankQuery::new("retrieval").at(now());
        let first = ids(&ranker.rank(&records, &query))
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let second = ids(&ranker.rank(&records, &query))
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        assert_eq!(first, second);
    }

    #[test]
    fn test_semantic_relevance_when_vectors_present() {
        let ts = now() - Duration::hours(1);
        let records = vec![
            MemoryRecord::fact("unrelated words")
                .with_id("near")
                .with_timestamp(ts)
                .with_embedding(vec![1.0, 0.0]),
            MemoryRecord::fact("unrelated words too")
                .with_id("far")
                .with_timestamp(ts)
                .with_embedding(vec![0.0, 1.0]),
        ];
        let q = [1.0f32, 0.0];
        let ranked = SalienceRanker::default()
            .rank(&records, &RankQuery::new("query").with_embedding(Some(&q)).at(now()));
        assert_eq!(ranked[0].memory.id, "near");
        assert!(ranked[0].breakdown.relevance > ranked[1].breakdown.relevance);
    }

    #[test]
    fn test_query_vector_of_wrong_dimension_falls_back_to_lexical() {
        let records = vec![MemoryRecord::fact("kernel language")
            .with_id("a")
            .with_embedding(vec![1.0, 0.0, 0.0])];
        let q = [1.0f32, 0.0];
        let ranked = SalienceRanker::default()
            .rank(&records, &RankQuery::new("kernel").with_embedding(Some(&q)).at(now()));
        let expected = RankingConfig::default().weights.relevance;
        assert!((ranked[0].breakdown.relevance - expected).abs() < 1e-6);
    }

    #[test]
    fn test_frequency_rewards_repeated_content() {
        let ts = now() - Duration::hours(1);
        let records = vec![
            MemoryRecord::fact("deploy on friday evenings").with_id("r1").with_timestamp(ts),
            MemoryRecord::fact("deploy on friday evenings").with_id("r2").with_timestamp(ts),
            MemoryRecord::fact("cache invalidation rules").with_id("solo").with_timestamp(ts),
        ];
        let ranked = SalienceRanker::default().rank(&records, &RankQuery::new("").at(now()));
        let solo = ranked.iter().find(|r| r.memory.id == "solo").unwrap();
        let repeated = ranked.iter().find(|r| r.memory.id == "r1").unwrap();
        assert_eq!(solo.breakdown.frequency, 0.0);
        assert!(repeated.breakdown.frequency > 0.0);
    }

    #[test]
    fn test_salient_flag_adds_bonus() {
        let ts = now() - Duration::hours(1);
        let records = vec![
            MemoryRecord::fact("plain").with_id("a").with_timestamp(ts),
            MemoryRecord::fact("flagged").with_id("b").with_timestamp(ts).salient(),
        ];
        let ranked = SalienceRanker::default().rank(&records, &RankQuery::new("").at(now()));
        assert_eq!(ranked[0].memory.id, "b");
    }
}
