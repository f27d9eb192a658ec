//! Per-node state-transition audit trail.
//!
//! One row per transition, in transition order. The CSV sink writes
//! `timestamp,process_id,state` with a local wall-clock timestamp and flushes
//! every row, so a trail survives a crash up to its last transition.
//! [`combine`] merges the trails of a run into a single timeline.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local, NaiveDateTime};
use meadow_protocol::{NodeId, NodeState};
use tracing::info;

use crate::error::{Error, Result};

/// Wall-clock format of the timestamp column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// CSV header row.
pub const HEADER: &str = "timestamp,process_id,state";

/// File written by [`combine`].
pub const COMBINED_FILE: &str = "combined.csv";

/// One recorded state entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub at: DateTime<Local>,
    pub node: NodeId,
    pub state: NodeState,
}

impl AuditEntry {
    /// Entry stamped with the current local time.
    pub fn now(node: NodeId, state: NodeState) -> Self {
        Self {
            at: Local::now(),
            node,
            state,
        }
    }

    /// Render as a CSV row, without the line terminator.
    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{}",
            self.at.format(TIMESTAMP_FORMAT),
            self.node,
            self.state
        )
    }
}

/// Destination for audit entries.
pub trait AuditSink: Send {
    fn record(&mut self, entry: AuditEntry) -> Result<()>;
}

/// Writes `process_<id>.csv` under a directory.
#[derive(Debug)]
pub struct CsvAudit {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CsvAudit {
    /// Create (or truncate) the trail for `node` under `dir` and write the
    /// header. The directory is created if missing.
    pub fn create(dir: impl AsRef<Path>, node: NodeId) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(node));

        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "{HEADER}")?;
        writer.flush()?;

        Ok(Self { path, writer })
    }

    pub fn file_name(node: NodeId) -> String {
        format!("process_{node}.csv")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for CsvAudit {
    fn record(&mut self, entry: AuditEntry) -> Result<()> {
        writeln!(self.writer, "{}", entry.to_csv())?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps entries in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryAudit {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded states, in order.
    pub fn states(&self) -> Vec<NodeState> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.state)
            .collect()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&mut self, entry: AuditEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAudit;

impl AuditSink for NullAudit {
    fn record(&mut self, _entry: AuditEntry) -> Result<()> {
        Ok(())
    }
}

/// Merge every `process_<id>.csv` under `dir` into `combined.csv`.
///
/// One row per distinct timestamp, ascending, and one column per node in id
/// order. Each cell holds the node's latest state at that instant; cells
/// before a node's first row stay empty. When a trail has several rows for
/// the same instant the last one wins. Rows whose timestamp does not parse
/// are skipped. Returns the path written.
pub fn combine(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let mut trails = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let node = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(trail_node);
        if let Some(node) = node {
            trails.insert(node, fs::read_to_string(&path)?);
        }
    }
    if trails.is_empty() {
        return Err(Error::Audit(format!(
            "no process_<id>.csv trails in {}",
            dir.display()
        )));
    }

    let path = dir.join(COMBINED_FILE);
    fs::write(&path, merge_trails(&trails))?;
    info!(path = %path.display(), nodes = trails.len(), "combined audit trails");
    Ok(path)
}

fn trail_node(file_name: &str) -> Option<NodeId> {
    file_name
        .strip_prefix("process_")?
        .strip_suffix(".csv")?
        .parse()
        .ok()
}

fn merge_trails(trails: &BTreeMap<NodeId, String>) -> String {
    // instant -> column -> state
    let mut rows: BTreeMap<NaiveDateTime, BTreeMap<usize, &str>> = BTreeMap::new();
    for (column, contents) in trails.values().enumerate() {
        for line in contents.lines() {
            let mut fields = line.splitn(3, ',');
            let (Some(at), Some(_), Some(state)) = (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            // Also drops the header row.
            let Ok(at) = NaiveDateTime::parse_from_str(at.trim(), TIMESTAMP_FORMAT) else {
                continue;
            };
            rows.entry(at).or_default().insert(column, state.trim());
        }
    }

    let mut out = String::from("timestamp");
    for node in trails.keys() {
        out.push(',');
        out.push_str(&node.to_string());
    }
    out.push('\n');

    let mut current = vec![""; trails.len()];
    for (at, changes) in rows {
        for (column, state) in changes {
            current[column] = state;
        }
        out.push_str(&at.format(TIMESTAMP_FORMAT).to_string());
        for state in &current {
            out.push(',');
            out.push_str(state);
        }
        out.push('\n');
    }
    out
}
