// rename.rs — Renaming state
//
// The builder's scratch indices while scanning the trace: register and
// per-byte memory last-writer maps, the call/return and DMA fence sets, the
// dynamic call stack, call-argument scratch, the PHI predecessor-block
// latch, and the per-instruction parameter scratch.
//
// Each index has its own scoping rule: register writers are keyed by the
// writing invocation, memory writers by byte address, and the fence sets
// reset at their respective boundaries.

use std::collections::HashMap;

use crate::graph::Addr;
use crate::symbols::{DynamicFunction, DynamicVariable, FunctionId};

/// Scratch indices owned by one build.
#[derive(Debug)]
pub struct RenameState {
    /// Latest writer of a register within one function invocation.
    pub register_last_written: HashMap<DynamicVariable, u32>,
    /// Latest writer of each byte address.
    pub address_last_written: HashMap<Addr, u32>,
    /// Non-DMA nodes executed since the last call/return boundary.
    pub nodes_since_last_ret: Vec<u32>,
    /// Most recent call/return boundary node.
    pub last_ret: Option<u32>,
    /// Most recent DMA fence node.
    pub last_dma_fence: Option<u32>,
    /// DMA nodes issued since the last fence.
    pub last_dma_nodes: Vec<u32>,
    /// Dynamic call stack; the top is the currently executing invocation.
    pub active_method: Vec<DynamicFunction>,
    /// Cached top of `active_method`.
    pub curr_dynamic_function: Option<DynamicFunction>,
    /// Declared callee of the most recent Call's first parameter.
    pub callee_function: Option<FunctionId>,
    /// The invocation that callee will become once entered.
    pub callee_dynamic_function: Option<DynamicFunction>,
    /// Caller-side register bound by the pending Forward record.
    pub unique_reg_in_caller_func: Option<DynamicVariable>,
    /// Writer node that satisfied the call's register argument read.
    pub last_call_source: Option<u32>,
    /// Basic block executing when the current block was entered; latched on
    /// the first PHI of a block.
    pub prev_bblock: String,
    pub curr_bblock: String,
    /// Per-instruction parameter scratch, cleared on each instruction
    /// record. Values are already masked addresses.
    pub parameter_values: Vec<Addr>,
    pub parameter_sizes: Vec<u32>,
    pub parameter_labels: Vec<String>,
    /// Whether a parameter record has been seen for the current instruction.
    pub seen_parameter: bool,
    /// Total operand count, taken from the first (highest-slot) parameter.
    pub num_parameters: u32,
}

impl Default for RenameState {
    fn default() -> Self {
        Self::new()
    }
}

impl RenameState {
    pub fn new() -> Self {
        RenameState {
            register_last_written: HashMap::new(),
            address_last_written: HashMap::new(),
            nodes_since_last_ret: Vec::new(),
            last_ret: None,
            last_dma_fence: None,
            last_dma_nodes: Vec::new(),
            active_method: Vec::new(),
            curr_dynamic_function: None,
            callee_function: None,
            callee_dynamic_function: None,
            unique_reg_in_caller_func: None,
            last_call_source: None,
            prev_bblock: "-1".to_string(),
            curr_bblock: "-1".to_string(),
            parameter_values: Vec::new(),
            parameter_sizes: Vec::new(),
            parameter_labels: Vec::new(),
            seen_parameter: false,
            num_parameters: 0,
        }
    }

    /// Reset the per-instruction scratch. Called on every instruction record.
    pub fn clear_instruction_scratch(&mut self) {
        self.parameter_values.clear();
        self.parameter_sizes.clear();
        self.parameter_labels.clear();
        self.seen_parameter = false;
        self.num_parameters = 0;
    }

    /// The node that last wrote `var`, if any, resolved against the writing
    /// invocation recorded in the key.
    pub fn last_register_writer(&self, var: DynamicVariable) -> Option<u32> {
        self.register_last_written.get(&var).copied()
    }

    pub fn write_register(&mut self, var: DynamicVariable, node_id: u32) {
        self.register_last_written.insert(var, node_id);
    }

    /// Record `node_id` as the writer of every byte in
    /// `[start, start + size)`.
    pub fn write_address_range(&mut self, start: Addr, size: u64, node_id: u32) {
        for addr in start..start.saturating_add(size) {
            self.address_last_written.insert(addr, node_id);
        }
    }
}
