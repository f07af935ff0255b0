// datapath.rs — Collaborating datapath interface
//
// The builder publishes function names and array base addresses to the
// datapath as it scans the trace, and consults its scheduling mode. The
// datapath itself (scratchpads, scheduling) lives outside this crate.

use std::collections::{BTreeMap, BTreeSet};

use crate::graph::Addr;

/// What the dependence engine needs from the datapath.
pub trait Datapath {
    /// A static function was observed executing.
    fn add_function_name(&mut self, name: &str);

    /// An array's base address became known (Alloca result or GEP base).
    fn add_array_base_address(&mut self, name: &str, addr: Addr);

    /// Ready-mode lets loads and stores issue as soon as their data is
    /// available; it suppresses DMA-load-originated memory dependences.
    fn is_ready_mode(&self) -> bool;
}

/// A datapath stand-in that records what the builder publishes. Used by the
/// CLI and tests.
#[derive(Debug, Default)]
pub struct RecordingDatapath {
    pub ready_mode: bool,
    pub function_names: BTreeSet<String>,
    pub array_base_addresses: BTreeMap<String, Addr>,
}

impl RecordingDatapath {
    pub fn new(ready_mode: bool) -> Self {
        RecordingDatapath {
            ready_mode,
            ..Default::default()
        }
    }
}

impl Datapath for RecordingDatapath {
    fn add_function_name(&mut self, name: &str) {
        self.function_names.insert(name.to_string());
    }

    fn add_array_base_address(&mut self, name: &str, addr: Addr) {
        self.array_base_addresses.insert(name.to_string(), addr);
    }

    fn is_ready_mode(&self) -> bool {
        self.ready_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_datapath_keeps_latest_base_address() {
        let mut dp = RecordingDatapath::new(false);
        dp.add_array_base_address("arr", 0x1000);
        dp.add_array_base_address("arr", 0x2000);
        assert_eq!(dp.array_base_addresses["arr"], 0x2000);
        assert!(!dp.is_ready_mode());
    }
}
