//! Context assembly.
//!
//! Turns ranked candidates, recent records and graph-walk results into one
//! bounded text block:
//!
//! ```text
//! [ARTIFACTS]
//! [FILES] crates/memory/src/store.rs
//! [FUNCTIONS] append
//!
//! [MEMORY]
//! [FACT f1 | 2025-01-01 00:00] Team chose Rust for the kernel
//! ...
//!
//! [INSTRUCTIONS]
//! ...
//! ```
//!
//! The footer is always present and never cut. When the body does not fit
//! the budget it is cut and [`TRUNCATION_MARKER`] is placed before the footer.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::{
    basename, extract_artifacts, Artifacts, Category, PatternClassifier, SectionClassifier,
};
use crate::config::ContextConfig;
use crate::format::format_record;
use crate::graph::ChainLink;
use crate::salience::salience_order;
use crate::text::{char_len, truncate_chars};
use crate::types::{MemoryRecord, RankedMemory, RecordKind};

pub const FOOTER: &str = "[INSTRUCTIONS]\n\
Answer using only the memory above. Cite the artifacts and memory ids you rely on. \
If the memory does not cover the question, say so instead of speculating.";

pub const TRUNCATION_MARKER: &str = "[... context truncated ...]";

pub const NO_ARTIFACTS: &str = "(no referenced artifacts)";

pub const NO_MEMORY: &str = "(no relevant memory found)";

/// Artifact section of a block with no memory: both placeholders.
pub const EMPTY_BODY: &str = "[ARTIFACTS]\n(no referenced artifacts)\n(no relevant memory found)";

const SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Artifacts,
    Memory,
    Truncation,
    Footer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSection {
    pub kind: SectionKind,
    pub text: String,
}

/// Where an included record came from, for citation by the consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub id: String,
    pub kind: RecordKind,
    pub category: Category,
    pub chunk_id: Option<String>,
    pub repository: Option<String>,
    pub path: Option<String>,
    pub doc_type: Option<String>,
}

impl Provenance {
    fn of(record: &MemoryRecord, category: Category) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind(),
            category,
            chunk_id: record.metadata.chunk_id.clone(),
            repository: record.metadata.repository.clone(),
            path: record.metadata.path.clone(),
            doc_type: record.metadata.doc_type.clone(),
        }
    }
}

/// The injectable block. `text` is the sections joined by blank lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBlock {
    pub sections: Vec<ContextSection>,
    pub provenance: Vec<Provenance>,
    pub truncated: bool,
    pub char_count: usize,
    pub text: String,
}

impl ContextBlock {
    fn from_sections(
        sections: Vec<ContextSection>,
        provenance: Vec<Provenance>,
        truncated: bool,
    ) -> Self {
        let text = sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(SEPARATOR);
        Self {
            char_count: char_len(&text),
            sections,
            provenance,
            truncated,
            text,
        }
    }

    /// Whether no memory made it into the block.
    pub fn is_empty(&self) -> bool {
        self.provenance.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.provenance.iter().map(|p| p.id.as_str()).collect()
    }
}

/// A deduplicated candidate with its classification.
struct Candidate<'a> {
    record: &'a MemoryRecord,
    score: f32,
    category: Category,
    artifacts: Artifacts,
}

pub struct ContextAssembler {
    config: ContextConfig,
    classifier: Arc<dyn SectionClassifier>,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            classifier: Arc::new(PatternClassifier),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn SectionClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Build the block. Never fails and never returns empty text.
    pub fn assemble(
        &self,
        ranked: &[RankedMemory],
        recent: &[MemoryRecord],
        traversal: &[ChainLink],
        query: &str,
    ) -> ContextBlock {
        let started = Instant::now();
        let max_total = self.effective_max_total();

        let pool = self.build_pool(ranked, recent, traversal);
        let selected = self.select(&pool, query);

        let mut artifacts = Artifacts::default();
        for &i in &selected {
            artifacts.merge(&pool[i].artifacts);
        }

        let block = if selected.is_empty() {
            ContextBlock::from_sections(
                vec![
                    ContextSection {
                        kind: SectionKind::Artifacts,
                        text: EMPTY_BODY.to_string(),
                    },
                    footer_section(),
                ],
                Vec::new(),
                false,
            )
        } else {
            let entries: Vec<(usize, String)> = selected
                .iter()
                .map(|&i| (i, format_record(pool[i].record, self.config.max_record_chars)))
                .collect();
            self.render(&pool, &artifacts, &entries, max_total)
        };

        info!(
            target: "mnemos::audit",
            event = "assembly",
            candidates = pool.len(),
            selected = block.provenance.len(),
            truncated = block.truncated,
            chars = block.char_count,
            duration_ms = started.elapsed().as_millis() as u64,
            "Assembled context block"
        );
        block
    }

    fn effective_max_total(&self) -> usize {
        let minimum = ContextConfig::minimum_total_length();
        if self.config.max_total_length < minimum {
            warn!(
                configured = self.config.max_total_length,
                minimum, "Context budget below minimum; raising it"
            );
            minimum
        } else {
            self.config.max_total_length
        }
    }

    /// Union of all inputs, one entry per id, keeping the highest score.
    /// Ranked records keep their score; walked records inherit their root's
    /// score halved per hop; recent records score 0.
    fn build_pool<'a>(
        &self,
        ranked: &'a [RankedMemory],
        recent: &'a [MemoryRecord],
        traversal: &'a [ChainLink],
    ) -> Vec<Candidate<'a>> {
        let root_scores: HashMap<&str, f32> = ranked
            .iter()
            .map(|r| (r.memory.id.as_str(), r.score))
            .collect();

        let scored = ranked
            .iter()
            .map(|r| (&r.memory, r.score))
            .chain(traversal.iter().map(|link| {
                let root = root_scores.get(link.root.as_str()).copied().unwrap_or(0.0);
                (&link.record, root * 0.5f32.powi(link.depth as i32))
            }))
            .chain(recent.iter().map(|r| (r, 0.0)));

        let mut pool: Vec<Candidate<'a>> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (record, score) in scored {
            if !record.has_content() {
                continue;
            }
            let score = if score.is_finite() { score } else { 0.0 };
            if let Some(&i) = index.get(record.id.as_str()) {
                if score > pool[i].score {
                    pool[i].score = score;
                }
                continue;
            }
            index.insert(record.id.as_str(), pool.len());
            pool.push(Candidate {
                record,
                score,
                category: self.classify(record),
                artifacts: self.artifacts(record),
            });
        }
        pool
    }

    fn classify(&self, record: &MemoryRecord) -> Category {
        self.classifier.classify(record).unwrap_or_else(|e| {
            debug!(memory_id = %record.id, error = %e, "Classification failed; using other");
            Category::Other
        })
    }

    fn artifacts(&self, record: &MemoryRecord) -> Artifacts {
        self.classifier.artifacts(record).unwrap_or_else(|e| {
            debug!(memory_id = %record.id, error = %e, "Artifact extraction failed");
            Artifacts::default()
        })
    }

    /// Indices into `pool` in output order: technical matches, then one per
    /// category, then by salience.
    fn select(&self, pool: &[Candidate<'_>], query: &str) -> Vec<usize> {
        let max_count = self.config.max_count;
        let mut order: Vec<usize> = (0..pool.len()).collect();
        order.sort_by(|&a, &b| {
            salience_order(
                (pool[a].score, &pool[a].record.timestamp, &pool[a].record.id),
                (pool[b].score, &pool[b].record.timestamp, &pool[b].record.id),
            )
        });

        let wanted = extract_artifacts(query);
        let query_words: HashSet<String> = query
            .split(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')))
            .filter(|w| !w.is_empty())
            .map(|w| w.trim_end_matches('.').to_lowercase())
            .collect();

        let mut selected: Vec<usize> = Vec::new();
        let mut taken: HashSet<usize> = HashSet::new();
        let mut take = |i: usize, selected: &mut Vec<usize>| {
            if selected.len() < max_count && taken.insert(i) {
                selected.push(i);
            }
        };

        for &i in &order {
            if is_technical_match(&pool[i].artifacts, &wanted, &query_words) {
                take(i, &mut selected);
            }
        }

        for category in Category::all() {
            if selected.iter().any(|&i| pool[i].category == category) {
                continue;
            }
            if let Some(&i) = order.iter().find(|&&i| pool[i].category == category) {
                take(i, &mut selected);
            }
        }

        for &i in &order {
            take(i, &mut selected);
        }

        selected
    }

    fn render(
        &self,
        pool: &[Candidate<'_>],
        artifacts: &Artifacts,
        entries: &[(usize, String)],
        max_total: usize,
    ) -> ContextBlock {
        let artifact_text = render_artifacts(artifacts);
        let memory_text = render_memory(entries.iter().map(|(_, text)| text.as_str()));
        let provenance_for = |included: &[(usize, String)]| -> Vec<Provenance> {
            included
                .iter()
                .map(|(i, _)| Provenance::of(pool[*i].record, pool[*i].category))
                .collect()
        };

        let full_len = char_len(&artifact_text)
            + char_len(&memory_text)
            + char_len(FOOTER)
            + 2 * char_len(SEPARATOR);
        if full_len <= max_total {
            return ContextBlock::from_sections(
                vec![
                    ContextSection {
                        kind: SectionKind::Artifacts,
                        text: artifact_text,
                    },
                    ContextSection {
                        kind: SectionKind::Memory,
                        text: memory_text,
                    },
                    footer_section(),
                ],
                provenance_for(entries),
                false,
            );
        }

        // Body budget: everything except the footer, the marker, and the two
        // separators in front of them.
        let reserved = char_len(FOOTER) + char_len(TRUNCATION_MARKER) + 2 * char_len(SEPARATOR);
        let budget = max_total.saturating_sub(reserved);
        debug!(full_len, max_total, budget, "Truncating context body");

        let (included, kept_artifacts) = fit_entries(pool, entries, budget);
        let mut sections = Vec::new();
        if included.is_empty() {
            let partial = cut_at_line(&render_artifacts(&kept_artifacts), budget);
            if !partial.trim().is_empty() {
                sections.push(ContextSection {
                    kind: SectionKind::Artifacts,
                    text: partial,
                });
            }
        } else {
            sections.push(ContextSection {
                kind: SectionKind::Artifacts,
                text: render_artifacts(&kept_artifacts),
            });
            sections.push(ContextSection {
                kind: SectionKind::Memory,
                text: render_memory(included.iter().map(|(_, text)| text.as_str())),
            });
        }

        sections.push(ContextSection {
            kind: SectionKind::Truncation,
            text: TRUNCATION_MARKER.to_string(),
        });
        sections.push(footer_section());
        ContextBlock::from_sections(sections, provenance_for(&included), true)
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

fn footer_section() -> ContextSection {
    ContextSection {
        kind: SectionKind::Footer,
        text: FOOTER.to_string(),
    }
}

fn is_technical_match(
    artifacts: &Artifacts,
    wanted: &Artifacts,
    query_words: &HashSet<String>,
) -> bool {
    if artifacts.mentions_any(wanted) {
        return true;
    }
    artifacts
        .files
        .iter()
        .any(|f| query_words.contains(&basename(f).to_lowercase()))
}

fn join_set(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn render_artifacts(artifacts: &Artifacts) -> String {
    if artifacts.is_empty() {
        return format!("[ARTIFACTS]\n{NO_ARTIFACTS}");
    }
    let mut lines = vec!["[ARTIFACTS]".to_string()];
    for (label, set) in [
        ("[FILES]", &artifacts.files),
        ("[CLASSES]", &artifacts.classes),
        ("[FUNCTIONS]", &artifacts.functions),
        ("[INTEGRATIONS]", &artifacts.integrations),
    ] {
        if !set.is_empty() {
            lines.push(format!("{label} {}", join_set(set)));
        }
    }
    lines.join("\n")
}

fn render_memory<'a>(entries: impl IntoIterator<Item = &'a str>) -> String {
    let mut text = String::from("[MEMORY]");
    for entry in entries {
        text.push('\n');
        text.push_str(entry);
    }
    text
}

/// Longest prefix of `entries` that fits in `budget` together with the
/// artifact summary of exactly those records. If no whole entry fits, the
/// first one is cut to the room its own artifacts leave.
fn fit_entries(
    pool: &[Candidate<'_>],
    entries: &[(usize, String)],
    budget: usize,
) -> (Vec<(usize, String)>, Artifacts) {
    let mut kept: Vec<(usize, String)> = Vec::new();
    let mut artifacts = Artifacts::default();
    let mut memory_len = char_len("[MEMORY]");
    for (i, text) in entries {
        let mut next = artifacts.clone();
        next.merge(&pool[*i].artifacts);
        let next_memory = memory_len + 1 + char_len(text);
        if char_len(&render_artifacts(&next)) + char_len(SEPARATOR) + next_memory > budget {
            break;
        }
        artifacts = next;
        memory_len = next_memory;
        kept.push((*i, text.clone()));
    }
    if !kept.is_empty() {
        return (kept, artifacts);
    }

    let Some(&(first, _)) = entries.first() else {
        return (kept, artifacts);
    };
    let own = pool[first].artifacts.clone();
    let room = budget.saturating_sub(char_len(&render_artifacts(&own)) + char_len(SEPARATOR));
    let cut = fit_memory(&entries[..1], room);
    if cut.is_empty() {
        (cut, Artifacts::default())
    } else {
        (cut, own)
    }
}

/// Whole entries that fit in `budget` chars. If none fit but there is room
/// past the header, the first entry is cut to fit.
fn fit_memory(entries: &[(usize, String)], budget: usize) -> Vec<(usize, String)> {
    let header = char_len("[MEMORY]");
    if budget <= header + 1 {
        return Vec::new();
    }

    let mut used = header;
    let mut kept: Vec<(usize, String)> = Vec::new();
    for (i, text) in entries {
        let cost = 1 + char_len(text);
        if used + cost > budget {
            break;
        }
        used += cost;
        kept.push((*i, text.clone()));
    }

    if kept.is_empty() {
        let Some((i, text)) = entries.first() else {
            return Vec::new();
        };
        let room = budget - header - 1;
        if room < 4 {
            return Vec::new();
        }
        kept.push((*i, truncate_chars(text, room)));
    }
    kept
}

/// At most `max_chars` chars of `text`, cut back to the last full line when
/// there is one.
fn cut_at_line(text: &str, max_chars: usize) -> String {
    let prefix: String = text.chars().take(max_chars).collect();
    if prefix.len() == text.len() {
        return prefix;
    }
    match prefix.rfind('\n') {
        Some(pos) => prefix[..pos].to_string(),
        None => prefix,
    }
}
