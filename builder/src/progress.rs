// progress.rs — Parse-progress reporting
//
// Writes a sidecar file with `bytes,nodes` rows as the trace is consumed,
// at a fixed fraction of the total trace size per row. Bigger traces get a
// finer cadence.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Traces larger than this report at 1% instead of 5%.
const FINE_CADENCE_BYTES: u64 = 500_000_000;

/// Tracks parsed-byte position against the total trace size and appends a
/// row to the sidecar file each time the next threshold is crossed.
#[derive(Debug)]
pub struct ProgressTracker {
    out: BufWriter<File>,
    step_bytes: u64,
    next_threshold: u64,
}

impl ProgressTracker {
    /// Create the sidecar file and write its header row.
    pub fn create(path: &Path, total_bytes: u64) -> io::Result<Self> {
        let increment = if total_bytes > FINE_CADENCE_BYTES {
            0.01
        } else {
            0.05
        };
        let step_bytes = ((total_bytes as f64 * increment) as u64).max(1);
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "bytes,nodes")?;
        Ok(ProgressTracker {
            out,
            step_bytes,
            next_threshold: step_bytes,
        })
    }

    /// Record the current position; emits one row when the next threshold
    /// has been crossed.
    pub fn update(&mut self, bytes: u64, nodes: usize) -> io::Result<()> {
        if bytes >= self.next_threshold {
            writeln!(self.out, "{},{}", bytes, nodes)?;
            while self.next_threshold <= bytes {
                self.next_threshold = self.next_threshold.saturating_add(self.step_bytes);
            }
        }
        Ok(())
    }

    /// Write the final row and flush.
    pub fn finish(&mut self, bytes: u64, nodes: usize) -> io::Result<()> {
        writeln!(self.out, "{},{}", bytes, nodes)?;
        self.out.flush()
    }
}
