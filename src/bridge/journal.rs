//! Message journal
//!
//! Append-only text log of every decoded inbound message: one line with a
//! human-readable timestamp, the topic, and a truncated payload preview.
//! Growth is unbounded (no rotation), matching the original deployment.
//! A failed write is logged and swallowed; the pipeline never stops for it.

use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Longest payload preview recorded per line
const PREVIEW_LIMIT: usize = 400;

pub struct MessageJournal {
    path: PathBuf,
}

impl MessageJournal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one line for an inbound message. Infallible by contract:
    /// any I/O error is reported on the console log only.
    pub async fn record(&self, topic: &str, raw: &str) {
        if let Err(e) = self.append(topic, raw).await {
            warn!("Failed to write message journal {:?}: {}", self.path, e);
        }
    }

    async fn append(&self, topic: &str, raw: &str) -> std::io::Result<()> {
        let line = format!(
            "{} topic={} payload={}\n",
            wall_clock(),
            topic,
            preview(raw)
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        // One write per line keeps concurrent appends line-atomic
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// `YYYY-MM-DD HH:MM:SS`, UTC, second precision
fn wall_clock() -> String {
    let rfc3339 = humantime::format_rfc3339_seconds(std::time::SystemTime::now()).to_string();
    rfc3339.trim_end_matches('Z').replace('T', " ")
}

/// Truncate to the preview limit on a character boundary
fn preview(raw: &str) -> &str {
    match raw.char_indices().nth(PREVIEW_LIMIT) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_append_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.log");
        let journal = MessageJournal::new(path.clone());

        journal.record("workwell/alerts", "TEMP HIGH").await;
        journal.record("workwell/monitoramento", "{\"t\":1}").await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("topic=workwell/alerts"));
        assert!(lines[0].contains("payload=TEMP HIGH"));
        assert!(lines[1].contains("topic=workwell/monitoramento"));
    }

    #[tokio::test]
    async fn lines_start_with_a_wall_clock_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.log");
        let journal = MessageJournal::new(path.clone());

        journal.record("t", "p").await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let line = content.lines().next().unwrap();
        let shape =
            regex::Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2} topic=t payload=p$")
                .unwrap();
        assert!(shape.is_match(line), "unexpected line shape: {:?}", line);
    }

    #[tokio::test]
    async fn long_payloads_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.log");
        let journal = MessageJournal::new(path.clone());

        let long = "x".repeat(1000);
        journal.record("t", &long).await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let payload = content.split("payload=").nth(1).unwrap().trim_end();
        assert_eq!(payload.len(), PREVIEW_LIMIT);
    }

    #[tokio::test]
    async fn write_failure_does_not_panic() {
        // Directory path: every append fails, record still returns
        let dir = tempfile::tempdir().unwrap();
        let journal = MessageJournal::new(dir.path().to_path_buf());
        journal.record("t", "payload").await;
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let s = "é".repeat(500);
        let p = preview(&s);
        assert_eq!(p.chars().count(), PREVIEW_LIMIT);
    }
}
