use crate::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use endpoint_protocol::{CaptureRecord, RunMetadata, RunSummary, ScoredEndpoint};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

const RUN_FILE: &str = "run.json";
const JOURNAL_FILE: &str = "index.jsonl";
const SUMMARY_FILE: &str = "summary.json";
const ENDPOINTS_FILE: &str = "endpoints.jsonl";

/// Run directory name: ISO timestamp with colons flattened to dashes, plus
/// an 8-hex-char suffix so back-to-back runs never collide.
pub fn generate_run_id(started_at: DateTime<Utc>) -> String {
    let stamp = started_at
        .to_rfc3339_opts(SecondsFormat::Secs, true)
        .replace(':', "-");
    format!("{stamp}-{:08x}", rand::random::<u32>())
}

/// The write side of one run directory.
///
/// `run.json` is written once at creation; `index.jsonl` is created eagerly
/// (possibly left empty) and only ever appended to, one complete line per
/// record, behind a single-writer lock.
pub struct CaptureLog {
    run_dir: PathBuf,
    journal: Mutex<tokio::fs::File>,
}

impl CaptureLog {
    pub async fn create(out_dir: &Path, metadata: &RunMetadata) -> Result<Self> {
        let run_dir = out_dir.join(&metadata.run_id);
        tokio::fs::create_dir_all(&run_dir).await?;

        // Write-once metadata, atomically via tmp + rename.
        let bytes = serde_json::to_vec_pretty(metadata)?;
        let tmp = run_dir.join(format!("{RUN_FILE}.tmp"));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, run_dir.join(RUN_FILE)).await?;

        let journal = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_dir.join(JOURNAL_FILE))
            .await?;

        log::info!("run directory created at {}", run_dir.display());
        Ok(Self {
            run_dir,
            journal: Mutex::new(journal),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append one record as a complete journal line.
    pub async fn append(&self, record: &CaptureRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut journal = self.journal.lock().await;
        journal.write_all(&line).await?;
        journal.flush().await?;
        Ok(())
    }

    pub async fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(summary)?;
        tokio::fs::write(self.run_dir.join(SUMMARY_FILE), bytes).await?;
        Ok(())
    }

    /// Write every scored endpoint, one JSON object per line, already ordered.
    pub async fn write_endpoints(&self, endpoints: &[ScoredEndpoint]) -> Result<()> {
        let mut out = Vec::new();
        for endpoint in endpoints {
            serde_json::to_writer(&mut out, endpoint)?;
            out.push(b'\n');
        }
        tokio::fs::write(self.run_dir.join(ENDPOINTS_FILE), out).await?;
        Ok(())
    }
}

/// Stream the journal back. Unparseable lines (including a partial trailing
/// line from an interrupted run) are skipped, not fatal.
pub async fn read_journal(run_dir: &Path) -> Result<Vec<CaptureRecord>> {
    let path = run_dir.join(JOURNAL_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    let mut skipped = 0usize;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CaptureRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => {
                skipped += 1;
                log::warn!("skipping unreadable journal line: {err}");
            }
        }
    }

    if skipped > 0 {
        log::warn!("journal at {} had {skipped} unreadable line(s)", path.display());
    }
    Ok(records)
}
