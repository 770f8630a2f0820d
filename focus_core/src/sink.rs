//! Recording sinks for completed sets.
//!
//! A sink receives one [`SessionSummary`] per closed set for an identified
//! actor. The HTTP sink posts it to the remote API; the JSONL sink appends
//! it to a local journal with file locking.

use crate::{Error, Result, SessionSummary};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Request body accepted by the session-recording endpoint
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub duration_seconds: u64,
    pub work_duration_seconds: u64,
    pub break_duration_seconds: u64,
    pub cycles_completed: u32,
    pub actor_id: String,
}

impl From<&SessionSummary> for SessionRecord {
    fn from(summary: &SessionSummary) -> Self {
        Self {
            duration_seconds: summary.total_duration_seconds,
            work_duration_seconds: summary.work_duration_seconds,
            break_duration_seconds: summary.break_duration_seconds,
            cycles_completed: summary.cycles_completed,
            actor_id: summary.actor_id.clone(),
        }
    }
}

/// Reject summaries the recording endpoint would refuse anyway
fn validate_summary(summary: &SessionSummary) -> Result<()> {
    if summary.total_duration_seconds == 0 {
        return Err(Error::SinkSubmission(
            "session duration must be greater than zero".into(),
        ));
    }
    if summary.actor_id.trim().is_empty() {
        return Err(Error::SinkSubmission("session has no actor id".into()));
    }
    Ok(())
}

/// Destination for completed-set summaries
#[async_trait::async_trait]
pub trait RecordingSink: Send + Sync {
    async fn record_session(&self, summary: &SessionSummary) -> Result<()>;
}

/// Posts summaries as JSON to the remote recording endpoint
pub struct HttpRecordingSink {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpRecordingSink {
    pub fn new(
        endpoint: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            auth_token,
        })
    }
}

#[async_trait::async_trait]
impl RecordingSink for HttpRecordingSink {
    async fn record_session(&self, summary: &SessionSummary) -> Result<()> {
        validate_summary(summary)?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&SessionRecord::from(summary));
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::SinkSubmission(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SinkSubmission(format!(
                "recording endpoint rejected session ({status}): {body}"
            )));
        }

        tracing::info!(
            "Recorded session for {} at {}",
            summary.actor_id,
            self.endpoint
        );
        Ok(())
    }
}

/// One line of the local session journal
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub session: SessionRecord,
}

/// JSONL-based session journal with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Create a new JSONL sink for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, entry: &JournalEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(entry)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;
        tracing::debug!("Appended session {} to journal", entry.id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordingSink for JsonlSink {
    async fn record_session(&self, summary: &SessionSummary) -> Result<()> {
        validate_summary(summary)?;

        let entry = JournalEntry {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            session: SessionRecord::from(summary),
        };
        self.append(&entry)
            .map_err(|e| Error::SinkSubmission(format!("journal write failed: {e}")))
    }
}

/// Read all entries from a session journal
pub fn read_journal(path: &Path) -> Result<Vec<JournalEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut entries = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<JournalEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!("Failed to parse journal entry at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} entries from journal", entries.len());
    Ok(entries)
}
