//! Per-kind record rendering for the context block.

use crate::text::{char_len, truncate_chars};
use crate::types::{MemoryRecord, RecordPayload};

/// Smallest body kept after the header, whatever the ceiling.
const MIN_BODY_CHARS: usize = 16;

fn header(label: &str, record: &MemoryRecord) -> String {
    format!(
        "[{label} {} | {}]",
        record.id,
        record.timestamp.format("%Y-%m-%d %H:%M")
    )
}

fn with_body(header: String, body: &str, max_chars: usize) -> String {
    let budget = max_chars
        .saturating_sub(char_len(&header) + 1)
        .max(MIN_BODY_CHARS);
    format!("{header} {}", truncate_chars(body.trim(), budget))
}

/// Render one record, keeping it near `max_chars`.
///
/// Fact, dialog, management, file and summary records get a labelled header
/// with id and date. Other kinds are their raw content behind a bare `[id]`
/// so they can still be cited.
pub fn format_record(record: &MemoryRecord, max_chars: usize) -> String {
    match &record.payload {
        RecordPayload::Fact { fact } => with_body(header("FACT", record), fact, max_chars),
        RecordPayload::Dialog { content, speaker } => {
            let body = match speaker {
                Some(speaker) => format!("{speaker}: {content}"),
                None => content.clone(),
            };
            with_body(header("DIALOG", record), &body, max_chars)
        }
        RecordPayload::Management { content, action } => {
            let body = match action {
                Some(action) => format!("({action}) {content}"),
                None => content.clone(),
            };
            with_body(header("DECISION", record), &body, max_chars)
        }
        RecordPayload::File { file, .. } => {
            let body = format!("{file}: {}", record.primary_text().unwrap_or(""));
            with_body(header("FILE", record), &body, max_chars)
        }
        RecordPayload::Summary { summary } | RecordPayload::ConversationSummary { summary } => {
            with_body(header("SUMMARY", record), summary, max_chars)
        }
        _ => with_body(
            format!("[{}]", record.id),
            record.primary_text().unwrap_or(""),
            max_chars,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at_noon(record: MemoryRecord) -> MemoryRecord {
        record.with_timestamp(Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_fact_template() {
        let r = at_noon(MemoryRecord::fact("Team chose Rust").with_id("f1"));
        assert_eq!(format_record(&r, 200), "[FACT f1 | 2025-03-04 12:00] Team chose Rust");
    }

    #[test]
    fn test_file_template_uses_summary() {
        let r = at_noon(MemoryRecord::file("src/store.rs", "append-only store").with_id("file1"));
        assert_eq!(
            format_record(&r, 200),
            "[FILE file1 | 2025-03-04 12:00] src/store.rs: append-only store"
        );
    }

    #[test]
    fn test_unknown_kinds_render_raw_with_id() {
        let r = MemoryRecord::error("panic in parser").with_id("e1");
        assert_eq!(format_record(&r, 200), "[e1] panic in parser");
        let code = MemoryRecord::code("fn main() {}").with_id("c1");
        assert_eq!(format_record(&code, 200), "[c1] fn main() {}");
    }

    #[test]
    fn test_respects_ceiling() {
        let r = at_noon(MemoryRecord::fact("x".repeat(500)).with_id("f1"));
        let out = format_record(&r, 120);
        assert_eq!(char_len(&out), 120);
        assert!(out.ends_with("..."));
    }
}
