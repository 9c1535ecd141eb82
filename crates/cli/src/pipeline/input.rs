//! JSON-lines input feeding the dispatcher.
//!
//! Each non-blank line is either one record set or an array of record sets;
//! either way it becomes one batch.

use std::path::PathBuf;

use contracts::{Batch, RecordSet};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CliError, Result};

/// Where batches come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    /// `-` selects stdin, anything else is a path
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdin
        } else {
            Self::File(PathBuf::from(arg))
        }
    }

    pub async fn open(&self) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
        match self {
            Self::Stdin => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
            Self::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InputLine {
    One(RecordSet),
    Many(Vec<RecordSet>),
}

/// Counters for one input pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    pub lines: u64,
    pub batches: u64,
    pub records: u64,
    pub skipped: u64,
}

/// Parse one input line; blank lines yield `None`
pub fn parse_line(line_no: u64, line: &str) -> Result<Option<Batch>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: InputLine =
        serde_json::from_str(line).map_err(|e| CliError::input_parse(line_no, e.to_string()))?;
    Ok(Some(match parsed {
        InputLine::One(set) => Batch::from(set),
        InputLine::Many(sets) => Batch::new(sets),
    }))
}

/// Read `reader` to the end, sending one batch per line
///
/// Sending waits for room in the channel, so a slow dispatcher slows the
/// reader down. Malformed or non-UTF-8 lines are logged and skipped.
/// Returns early when `cancel` fires or the dispatcher goes away.
pub async fn feed<R>(
    reader: R,
    tx: mpsc::Sender<Batch>,
    cancel: CancellationToken,
) -> Result<InputStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = reader;
    let mut buf = Vec::new();
    let mut stats = InputStats::default();

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            break;
        }
        stats.lines += 1;

        let Ok(line) = std::str::from_utf8(&buf) else {
            warn!(line = stats.lines, "Skipping input line that is not valid UTF-8");
            stats.skipped += 1;
            continue;
        };
        let batch = match parse_line(stats.lines, line) {
            Ok(Some(batch)) => batch,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Skipping malformed input line");
                stats.skipped += 1;
                continue;
            }
        };
        let records = batch.record_count() as u64;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(batch) => {
                if sent.is_err() {
                    warn!("Dispatcher channel closed");
                    break;
                }
            }
        }
        stats.batches += 1;
        stats.records += records;
    }

    debug!(?stats, "Input finished");
    Ok(stats)
}
