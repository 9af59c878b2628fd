//! Point-in-time view of the store: records in insertion order plus an index
//! by id.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{MemoryRecord, RecordKind};

/// Lines that could not be used during a store read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartialReadWarning {
    /// Unparsable lines, including a torn final line
    pub skipped_lines: usize,
    /// Later lines repeating an id already read; the first one wins
    pub duplicate_ids: usize,
    /// 1-based line number of the first skipped line
    pub first_bad_line: Option<usize>,
}

impl PartialReadWarning {
    pub fn is_clean(&self) -> bool {
        self.skipped_lines == 0 && self.duplicate_ids == 0
    }
}

/// Arena of records indexed by id.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: Vec<MemoryRecord>,
    index: HashMap<String, usize>,
    warning: Option<PartialReadWarning>,
}

impl Snapshot {
    /// Build from records already in memory. Duplicate ids after the first
    /// are dropped and counted.
    pub fn from_records(records: impl IntoIterator<Item = MemoryRecord>) -> Self {
        let mut snapshot = Self::default();
        let mut warning = PartialReadWarning::default();
        for record in records {
            if !snapshot.insert(record) {
                warning.duplicate_ids += 1;
            }
        }
        snapshot.set_warning(warning);
        snapshot
    }

    /// Parse line-delimited JSON. Empty lines are ignored; anything else
    /// that fails to parse is skipped and counted.
    pub fn parse(contents: &str) -> Self {
        let mut snapshot = Self::default();
        let mut warning = PartialReadWarning::default();

        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let record = match serde_json::from_str::<MemoryRecord>(line) {
                Ok(record) if !record.id.trim().is_empty() => record,
                Ok(_) => {
                    debug!(line = lineno + 1, "Skipping record with empty id");
                    warning.skipped_lines += 1;
                    warning.first_bad_line.get_or_insert(lineno + 1);
                    continue;
                }
                Err(e) => {
                    debug!(line = lineno + 1, error = %e, "Skipping malformed store line");
                    warning.skipped_lines += 1;
                    warning.first_bad_line.get_or_insert(lineno + 1);
                    continue;
                }
            };

            if !snapshot.insert(record) {
                warning.duplicate_ids += 1;
            }
        }

        snapshot.set_warning(warning);
        snapshot
    }

    fn insert(&mut self, record: MemoryRecord) -> bool {
        if self.index.contains_key(&record.id) {
            debug!(memory_id = %record.id, "Ignoring duplicate record id");
            return false;
        }
        self.index.insert(record.id.clone(), self.records.len());
        self.records.push(record);
        true
    }

    fn set_warning(&mut self, warning: PartialReadWarning) {
        if warning.is_clean() {
            self.warning = None;
            return;
        }
        warn!(
            target: "mnemos::audit",
            event = "partial_read",
            skipped_lines = warning.skipped_lines,
            duplicate_ids = warning.duplicate_ids,
            first_bad_line = ?warning.first_bad_line,
            "Store read skipped unusable lines"
        );
        self.warning = Some(warning);
    }

    pub fn warning(&self) -> Option<&PartialReadWarning> {
        self.warning.as_ref()
    }

    pub fn get(&self, id: &str) -> Option<&MemoryRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Positions ordered newest first: `timestamp` descending, then later
    /// insertion first.
    fn recency_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.records.len()).collect();
        order.sort_by(|&a, &b| {
            self.records[b]
                .timestamp
                .cmp(&self.records[a].timestamp)
                .then(b.cmp(&a))
        });
        order
    }

    /// The `limit` most recent records.
    pub fn recent(&self, limit: usize) -> Vec<MemoryRecord> {
        self.recency_order()
            .into_iter()
            .take(limit)
            .map(|i| self.records[i].clone())
            .collect()
    }

    /// The `limit` most recent records of one kind.
    pub fn by_kind(&self, kind: RecordKind, limit: usize) -> Vec<MemoryRecord> {
        self.recency_order()
            .into_iter()
            .map(|i| &self.records[i])
            .filter(|r| r.kind() == kind)
            .take(limit)
            .cloned()
            .collect()
    }
}
