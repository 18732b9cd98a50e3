//! Append-only request log
//!
//! One line-delimited JSON record per API request. The log is the only
//! state that survives a process, and `stampede report` replays it into a
//! request profile.

use stampede_core::{RequestRecord, RequestTally};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;

/// Writer half: appends records as they are observed.
pub struct RequestLog {
    writer: BufWriter<File>,
}

impl RequestLog {
    /// Open (creating parents as needed) for append.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Append one record as a JSON line.
    pub fn append(&mut self, record: &RequestRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Replay log lines into the tally. Unparseable lines are skipped with a
/// warning rather than poisoning the profile.
pub fn tally_lines<R: BufRead>(tally: &mut RequestTally, reader: R) -> io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RequestRecord>(&line) {
            Ok(record) => tally.record(record),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping unparseable request log line");
            }
        }
    }
    Ok(())
}
