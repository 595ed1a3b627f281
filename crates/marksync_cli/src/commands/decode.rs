//! Decode command implementation.

use marksync_protocol::{decode, Bookmark, MutationEvent};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Outcome of decoding one input line.
#[derive(Debug, Serialize)]
pub struct DecodeReport {
    /// 1-based input line.
    pub line: usize,
    /// Change type tag, when decoding succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<&'static str>,
    /// Affected record ID, when decoding succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Decoded record for inserts and updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<Bookmark>,
    /// Rejection category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<&'static str>,
    /// Rejection message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DecodeReport {
    fn accepted(line: usize, event: MutationEvent) -> Self {
        let change = Some(event.change_type().as_tag());
        let id = Some(event.id().to_string());
        let bookmark = match event {
            MutationEvent::Insert(b) | MutationEvent::Update(b) => Some(b),
            MutationEvent::Delete(_) => None,
        };
        Self {
            line,
            change,
            id,
            bookmark,
            rejected: None,
            error: None,
        }
    }

    fn rejected(line: usize, kind: &'static str, error: String) -> Self {
        Self {
            line,
            change: None,
            id: None,
            bookmark: None,
            rejected: Some(kind),
            error: Some(error),
        }
    }
}

/// Runs the decode command.
pub fn run(
    input: Option<&Path>,
    owner: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut reports = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        reports.push(decode_line(index + 1, &line, owner));
    }

    let rejected = reports.iter().filter(|r| r.rejected.is_some()).count();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&reports)?),
        _ => {
            for report in &reports {
                print_report(report);
            }
            println!();
            println!(
                "{} payload(s), {} accepted, {} rejected",
                reports.len(),
                reports.len() - rejected,
                rejected
            );
        }
    }

    Ok(())
}

fn decode_line(line: usize, text: &str, owner: &str) -> DecodeReport {
    let raw: serde_json::Value = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => return DecodeReport::rejected(line, "invalid_json", e.to_string()),
    };
    match decode(&raw, owner) {
        Ok(event) => DecodeReport::accepted(line, event),
        Err(e) => DecodeReport::rejected(line, e.kind(), e.to_string()),
    }
}

fn print_report(report: &DecodeReport) {
    match (&report.change, &report.id, &report.error) {
        (Some(change), Some(id), _) => match &report.bookmark {
            Some(b) => println!(
                "{:>4}  {:<6} {}  {}  {}  {}",
                report.line,
                change,
                id,
                b.created_at.to_rfc3339(),
                b.url,
                b.title
            ),
            None => println!("{:>4}  {:<6} {}", report.line, change, id),
        },
        (_, _, Some(error)) => println!(
            "{:>4}  REJECT {} ({})",
            report.line,
            error,
            report.rejected.unwrap_or("unknown")
        ),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_line_reports_record() {
        let line = r#"{"eventType":"INSERT","new":{"id":7,"title":"t","url":"example.com","user_id":"u1","created_at":"2024-01-01T00:00:00Z"}}"#;
        let report = decode_line(1, line, "u1");
        assert_eq!(report.change, Some("INSERT"));
        assert_eq!(report.id.as_deref(), Some("7"));
        assert_eq!(report.bookmark.unwrap().url, "https://example.com");
    }

    #[test]
    fn invalid_json_is_rejected() {
        let report = decode_line(3, "{not json", "u1");
        assert_eq!(report.line, 3);
        assert_eq!(report.rejected, Some("invalid_json"));
    }

    #[test]
    fn foreign_owner_is_rejected() {
        let line = r#"{"eventType":"DELETE","old":{"id":"1","user_id":"u2"}}"#;
        let report = decode_line(1, line, "u1");
        assert!(report.rejected.is_some());
        assert!(report.change.is_none());
    }
}
