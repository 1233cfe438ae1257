//! Shared progress sink written once per completed gene-set task.

use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Append-only progress monitor tolerant of concurrent writers.
///
/// Completion is tracked by an atomic counter rather than by re-reading the
/// sink, so the emitted count is monotone per writer; interleaving under
/// contention can still reorder lines. The sink is informational only and is
/// never read back to gate correctness or ordering of the final result.
pub struct ProgressMonitor {
    total: usize,
    completed: AtomicUsize,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl ProgressMonitor {
    /// Monitor writing to a file, created or truncated.
    pub fn to_file<P: AsRef<Path>>(path: P, total: usize) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(Box::new(BufWriter::new(file)), total))
    }

    /// Monitor writing to an arbitrary sink.
    pub fn from_writer(writer: Box<dyn Write + Send>, total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            sink: Mutex::new(writer),
        }
    }

    /// Record one completed task. Write failures are swallowed: monitoring
    /// must never fail the batch.
    pub fn task_done(&self, gene_set_index: usize) {
        let n = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut sink) = self.sink.lock() {
            let _ = writeln!(
                sink,
                "{}/{} gene sets analyzed (geneset {})",
                n, self.total, gene_set_index
            );
            let _ = sink.flush();
        }
    }

    /// Number of tasks recorded so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}
