// builder.rs — Dependence engine
//
// Applies the dependence-insertion rules to each trace record, updating the
// renaming state and buffering edges. Edges are flushed to the program store
// once, at end of trace; the logical edge set is fully determined by trace
// order regardless of when flushing happens.
//
// Preconditions: records arrive in trace order; every parameter/result/
//                forward record follows the instruction record it belongs to.
// Postconditions: after `finish`, the program store holds every buffered
//                 edge, deduplicated per (source, sink, label).
// Failure modes: structural anomalies (loop depth, node-id desync, unknown
//                DMA form, forward outside a call) and malformed values →
//                `EngineError`. All abort the build.
// Side effects: publishes function names and array base addresses to the
//               datapath.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::mem;

use crate::codec::{self, CodecError};
use crate::datapath::Datapath;
use crate::graph::{
    Addr, DmaMemAccess, EdgeLabel, MemAccess, MemValue, Program, UniqueLabel, ADDR_MASK, BYTE,
};
use crate::opcode::Microop;
use crate::record::{
    ForwardRecord, InstructionRecord, LabelmapRecord, Operand, ParameterRecord, ResultRecord,
    ValueType,
};
use crate::rename::RenameState;
use crate::symbols::{DynamicFunction, DynamicVariable, SourceManager};

/// Traces with a loop depth at or past this mark are malformed.
const MAX_LOOP_DEPTH: u32 = 1000;

// ── Error type ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum EngineError {
    Value(CodecError),
    LoopDepthExceeded { depth: u32 },
    NodeIdMismatch { expected: u32, found: u32 },
    UnknownDmaForm { params: usize },
    RecordOutsideInstruction,
    MissingAddressOperand { microop: Microop },
    ResultNotRegister,
    ForwardNotRegister,
    ForwardOutsideCall,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Value(e) => write!(f, "malformed operand value: {e}"),
            EngineError::LoopDepthExceeded { depth } => {
                write!(f, "loop depth {depth} is much higher than expected")
            }
            EngineError::NodeIdMismatch { expected, found } => {
                write!(f, "trace node id {found} does not match position {expected}")
            }
            EngineError::UnknownDmaForm { params } => {
                write!(f, "unknown DMA interface version ({params} parameters)")
            }
            EngineError::RecordOutsideInstruction => {
                write!(f, "operand record before any instruction record")
            }
            EngineError::MissingAddressOperand { microop } => {
                write!(f, "{microop} result with no address operand in scope")
            }
            EngineError::ResultNotRegister => write!(f, "result operand is not a register"),
            EngineError::ForwardNotRegister => write!(f, "forward operand is not a register"),
            EngineError::ForwardOutsideCall => {
                write!(f, "forward record without a preceding call")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Value(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for EngineError {
    fn from(e: CodecError) -> Self {
        EngineError::Value(e)
    }
}

// ── Bundle handed back to the caller ────────────────────────────────────────

/// Everything one build produces, moved out of the engine after the flush.
#[derive(Debug)]
pub struct GraphBundle {
    pub program: Program,
    pub src_manager: SourceManager,
    pub num_register_deps: usize,
    pub num_memory_deps: usize,
    pub num_control_deps: usize,
}

// ── Engine ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct RegEdge {
    source: u32,
    sink: u32,
    slot: u32,
}

/// The trace-driven graph builder. One instance per build.
pub struct DddgBuilder<'a> {
    datapath: &'a mut dyn Datapath,
    program: Program,
    src_manager: SourceManager,
    state: RenameState,
    /// Buffered edges, flushed to the program store at end of trace.
    register_edge_table: Vec<RegEdge>,
    memory_edge_table: HashMap<u32, BTreeSet<u32>>,
    control_edge_table: HashMap<u32, BTreeSet<u32>>,
    num_reg_dep: usize,
    num_mem_dep: usize,
    num_ctrl_dep: usize,
    current_node_id: u32,
    prev_microop: Option<Microop>,
    curr_microop: Option<Microop>,
}

impl<'a> DddgBuilder<'a> {
    pub fn new(datapath: &'a mut dyn Datapath) -> Self {
        DddgBuilder {
            datapath,
            program: Program::new(),
            src_manager: SourceManager::new(),
            state: RenameState::new(),
            register_edge_table: Vec::new(),
            memory_edge_table: HashMap::new(),
            control_edge_table: HashMap::new(),
            num_reg_dep: 0,
            num_mem_dep: 0,
            num_ctrl_dep: 0,
            current_node_id: 0,
            prev_microop: None,
            curr_microop: None,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.program.num_nodes()
    }

    pub fn num_register_deps(&self) -> usize {
        self.num_reg_dep
    }

    pub fn num_memory_deps(&self) -> usize {
        self.num_mem_dep
    }

    pub fn num_control_deps(&self) -> usize {
        self.num_ctrl_dep
    }

    fn current_dyn_function(&self) -> Result<DynamicFunction, EngineError> {
        self.state
            .curr_dynamic_function
            .ok_or(EngineError::RecordOutsideInstruction)
    }

    fn current_microop(&self) -> Result<Microop, EngineError> {
        self.curr_microop.ok_or(EngineError::RecordOutsideInstruction)
    }

    // ── Edge buffering ──────────────────────────────────────────────────────

    fn insert_control_dependence(&mut self, source: u32, sink: u32) {
        if self.control_edge_table.entry(source).or_default().insert(sink) {
            self.num_ctrl_dep += 1;
        }
    }

    /// For each byte in `[start, start + size)` with a recorded writer,
    /// buffer a memory edge writer → sink. The set insertion discriminates
    /// duplicates, so the dependence is counted once.
    fn handle_post_write_dependency(&mut self, start: Addr, size: u64, sink: u32) {
        for addr in start..start.saturating_add(size) {
            if let Some(&writer) = self.state.address_last_written.get(&addr) {
                if self.memory_edge_table.entry(writer).or_default().insert(sink) {
                    self.num_mem_dep += 1;
                }
            }
        }
    }

    // ── Labelmap records ────────────────────────────────────────────────────

    pub fn consume_labelmap(&mut self, rec: &LabelmapRecord) {
        let function = self.src_manager.insert_function(&rec.function);
        let label = self.src_manager.insert_label(&rec.label);
        let unique = UniqueLabel {
            function,
            label,
            line_number: rec.line_number,
        };
        self.program.add_label(rec.line_number, unique);
        for caller in &rec.inline_callers {
            let caller_func = self.src_manager.insert_function(caller);
            let inlined = UniqueLabel {
                function: caller_func,
                label,
                line_number: rec.line_number,
            };
            self.program.add_label(rec.line_number, inlined);
            // Directives declared on the original label apply to the replica.
            self.program.inline_labelmap.insert(inlined, unique);
        }
    }

    // ── Instruction records ─────────────────────────────────────────────────

    pub fn consume_instruction(&mut self, rec: &InstructionRecord) -> Result<(), EngineError> {
        if rec.loop_depth >= MAX_LOOP_DEPTH {
            return Err(EngineError::LoopDepthExceeded {
                depth: rec.loop_depth,
            });
        }
        let expected = self.program.num_nodes() as u32;
        if rec.node_id != expected {
            return Err(EngineError::NodeIdMismatch {
                expected,
                found: rec.node_id,
            });
        }
        let node_id = rec.node_id;
        self.current_node_id = node_id;
        self.prev_microop = self.curr_microop;
        self.curr_microop = Some(rec.microop);

        let curr_function = self.src_manager.insert_function(&rec.static_function);
        let curr_inst = self.src_manager.insert_instruction(&rec.inst_id);
        let basic_block = self.src_manager.insert_basic_block(&rec.bblock_name);
        {
            let node = self.program.insert_node(node_id, rec.microop);
            node.line_num = rec.line_num;
            node.static_inst = Some(curr_inst);
            node.static_function = Some(curr_function);
            node.basic_block = Some(basic_block);
            node.loop_depth = rec.loop_depth;
        }
        self.datapath.add_function_name(&rec.static_function);

        let op = rec.microop;

        // A call cannot begin until all prior nodes in the current function
        // have finished, and the caller resumes only after the callee's
        // return. DMA nodes are exempt; their ordering runs through the DMA
        // fence set.
        if op.is_ret_op() || op.is_call_op() {
            let pending = mem::take(&mut self.state.nodes_since_last_ret);
            for id in pending {
                self.insert_control_dependence(id, node_id);
            }
            if let Some(last_ret) = self.state.last_ret {
                if last_ret != node_id {
                    self.insert_control_dependence(last_ret, node_id);
                }
            }
            self.state.last_ret = Some(node_id);
        } else if !op.is_dma_op() {
            self.state.nodes_since_last_ret.push(node_id);
        }

        // Dynamic call stack maintenance.
        let mut invocation = 0;
        let mut curr_func_found = false;
        if let Some(&top) = self.state.active_method.last() {
            if top.function == curr_function {
                if self.prev_microop == Some(Microop::Call)
                    && self.state.callee_function == Some(curr_function)
                {
                    // Entry into curr_function, possibly recursive.
                    invocation = self.src_manager.increment_invocations(curr_function);
                    self.state
                        .active_method
                        .push(DynamicFunction::new(curr_function, invocation));
                } else {
                    invocation = self.src_manager.invocations(curr_function);
                }
                self.state.curr_dynamic_function = self.state.active_method.last().copied();
                curr_func_found = true;
            }
            if op == Microop::Ret {
                self.state.active_method.pop();
            }
        }
        if !curr_func_found {
            invocation = self.src_manager.increment_invocations(curr_function);
            self.state
                .active_method
                .push(DynamicFunction::new(curr_function, invocation));
            self.state.curr_dynamic_function = self.state.active_method.last().copied();
        }

        // Latch the predecessor block on the first PHI of a block.
        if op == Microop::Phi && self.prev_microop != Some(Microop::Phi) {
            self.state.prev_bblock = self.state.curr_bblock.clone();
        }

        // DMA ordering through the fence set.
        if op == Microop::DmaFence {
            self.state.last_dma_fence = Some(node_id);
            let pending = mem::take(&mut self.state.last_dma_nodes);
            for id in pending {
                self.insert_control_dependence(id, node_id);
            }
        } else if op == Microop::DmaLoad || op == Microop::DmaStore {
            if let Some(fence) = self.state.last_dma_fence {
                self.insert_control_dependence(fence, node_id);
            }
            self.state.last_dma_nodes.push(node_id);
        }

        self.state.curr_bblock = rec.bblock_id.clone();
        self.program.node_mut(node_id).dynamic_invocation = invocation;
        self.state.clear_instruction_scratch();
        Ok(())
    }

    // ── Parameter records ───────────────────────────────────────────────────

    pub fn consume_parameter(&mut self, rec: &ParameterRecord) -> Result<(), EngineError> {
        let microop = self.current_microop()?;
        let node_id = self.current_node_id;

        // A PHI parameter from an edge other than the one actually taken is
        // ignored entirely.
        if microop == Microop::Phi {
            match rec.prev_bblock.as_deref() {
                Some(prev) if prev == self.state.prev_bblock => {}
                _ => return Ok(()),
            }
        }

        let op = &rec.operand;
        if !self.state.seen_parameter {
            self.state.num_parameters = rec.slot;
            if microop == Microop::Call {
                self.state.callee_function = Some(self.src_manager.insert_function(&op.label));
            }
            if let Some(callee) = self.state.callee_function {
                self.state.callee_dynamic_function = Some(DynamicFunction::new(
                    callee,
                    self.src_manager.invocations(callee) + 1,
                ));
            }
        }
        self.state.seen_parameter = true;
        self.state.last_call_source = None;

        if op.is_reg {
            let variable = self.src_manager.insert_variable(&op.label);
            let unique_reg = DynamicVariable::new(self.current_dyn_function()?, variable);
            if microop == Microop::Call {
                self.state.unique_reg_in_caller_func = Some(unique_reg);
            }
            if let Some(writer) = self.state.last_register_writer(unique_reg) {
                self.register_edge_table.push(RegEdge {
                    source: writer,
                    sink: node_id,
                    slot: rec.slot,
                });
                self.num_reg_dep += 1;
                if microop == Microop::Call {
                    self.state.last_call_source = Some(writer);
                }
            } else if (microop == Microop::Store && rec.slot == 2)
                || (microop == Microop::Load && rec.slot == 1)
            {
                // A load/store with no GEP before it performs the address
                // computation itself; treat it as the writer of the address
                // register.
                self.state.write_register(unique_reg, node_id);
            }
        }

        if matches!(
            microop,
            Microop::Load | Microop::Store | Microop::GetElementPtr
        ) || microop.is_dma_op()
        {
            self.state
                .parameter_values
                .push((op.value as Addr) & ADDR_MASK);
            self.state.parameter_sizes.push(op.size_bits);
            self.state.parameter_labels.push(op.label.clone());

            if rec.slot == 1 && microop == Microop::Load {
                // The label names the register holding the address.
                let var = self.src_manager.get_variable(&op.label);
                let node = self.program.node_mut(node_id);
                node.variable = var;
                node.array_label = Some(op.label.clone());
            } else if rec.slot == 1 && microop == Microop::Store {
                // Slot 2 (the address) was parsed first; this is the value.
                let mem_address = self.state.parameter_values[0];
                let mem_size = (op.size_bits / BYTE) as u64;
                let value = create_mem_value(op)?;
                self.program.node_mut(node_id).mem_access = Some(MemAccess {
                    vaddr: mem_address,
                    size: mem_size,
                    value,
                });
            } else if rec.slot == 2 && microop == Microop::Store {
                let mem_address = self.state.parameter_values[0];
                let mem_size =
                    (self.state.parameter_sizes.last().copied().unwrap_or(0) / BYTE) as u64;
                if let Some(&writer) = self.state.address_last_written.get(&mem_address) {
                    // DMA loads are variable-latency; a store overwriting
                    // their destination must observe them.
                    if self.program.node(writer).microop.is_dma_load() {
                        self.handle_post_write_dependency(mem_address, mem_size, node_id);
                    }
                }
                self.state.address_last_written.insert(mem_address, node_id);

                let reg_name = self.state.parameter_labels[0].clone();
                let var = self.src_manager.get_variable(&reg_name);
                let node = self.program.node_mut(node_id);
                node.variable = var;
                node.array_label = Some(reg_name);
            } else if rec.slot == 1 && microop == Microop::GetElementPtr {
                let base_address = *self.state.parameter_values.last().unwrap();
                let base_label = self.state.parameter_labels.last().unwrap().clone();
                // Dependences are enforced locally against the perceived
                // array name; the base address is recorded under the array's
                // caller-side origin.
                let var = self.src_manager.get_variable(&base_label);
                self.program.node_mut(node_id).variable = var;
                let real = self.get_array_real_var(&base_label)?;
                let real_name = self.src_manager.variable_name(real.variable).to_string();
                self.program.node_mut(node_id).array_label = Some(real_name.clone());
                self.datapath.add_array_base_address(&real_name, base_address);
            }
            // DMA slot 1: dependences need the full argument list, which is
            // only complete at the result record.
        }
        Ok(())
    }

    /// Rewrite a locally perceived array name to its ultimate caller-side
    /// origin via the call-argument alias map.
    fn get_array_real_var(&mut self, array_name: &str) -> Result<DynamicVariable, EngineError> {
        let var = self.src_manager.insert_variable(array_name);
        let dyn_var = DynamicVariable::new(self.current_dyn_function()?, var);
        Ok(self.program.call_arg_map.lookup(dyn_var))
    }

    // ── Result records ──────────────────────────────────────────────────────

    pub fn consume_result(&mut self, rec: &ResultRecord) -> Result<(), EngineError> {
        let microop = self.current_microop()?;
        let node_id = self.current_node_id;
        let op = &rec.operand;

        if microop.is_fp_op() && op.size_bits == 64 {
            self.program.node_mut(node_id).double_precision = true;
        }
        if !op.is_reg {
            return Err(EngineError::ResultNotRegister);
        }
        let variable = self.src_manager.insert_variable(&op.label);
        let unique_reg = DynamicVariable::new(self.current_dyn_function()?, variable);
        self.state.write_register(unique_reg, node_id);

        if microop == Microop::Alloca {
            let node = self.program.node_mut(node_id);
            node.variable = Some(variable);
            node.array_label = Some(op.label.clone());
            self.datapath
                .add_array_base_address(&op.label, (op.value as Addr) & ADDR_MASK);
        } else if microop == Microop::Load {
            let mem_address = *self
                .state
                .parameter_values
                .last()
                .ok_or(EngineError::MissingAddressOperand { microop })?;
            let mem_size = (op.size_bits / BYTE) as u64;
            let value = create_mem_value(op)?;
            self.handle_post_write_dependency(mem_address, mem_size, node_id);
            self.program.node_mut(node_id).mem_access = Some(MemAccess {
                vaddr: mem_address,
                size: mem_size,
                value,
            });
        } else if microop.is_dma_op() {
            let vals = &self.state.parameter_values;
            let (base_addr, src_off, dst_off, size) = match vals.len() {
                // v1: one offset serves both sides.
                4 => (vals[1], vals[2], vals[2], vals[3]),
                // v2: separate source and destination offsets.
                5 => (vals[1], vals[2], vals[3], vals[4]),
                n => return Err(EngineError::UnknownDmaForm { params: n }),
            };
            self.program.node_mut(node_id).dma_mem_access = Some(DmaMemAccess {
                base_addr,
                src_off,
                dst_off,
                size,
            });
            if microop == Microop::DmaLoad {
                // A dmaLoad is a store from the accelerator's view: later
                // reads and writes of the destination range must observe it.
                // Under ready-mode loads issue as soon as their data is
                // available, so the propagation is skipped.
                if !self.datapath.is_ready_mode() {
                    self.state
                        .write_address_range(base_addr + dst_off, size, node_id);
                }
            } else if microop == Microop::DmaStore {
                // A dmaStore is a load from the accelerator's view: it must
                // observe prior writers of the source range.
                self.handle_post_write_dependency(base_addr + src_off, size, node_id);
            }
        }
        Ok(())
    }

    // ── Forward records ─────────────────────────────────────────────────────

    pub fn consume_forward(&mut self, rec: &ForwardRecord) -> Result<(), EngineError> {
        let microop = self.current_microop()?;
        // DMA and trig operations are not treated as called functions; no
        // register name mappings to add.
        if microop.is_dma_op() || microop.is_trig_op() {
            return Ok(());
        }
        if !rec.is_reg {
            return Err(EngineError::ForwardNotRegister);
        }
        if !microop.is_call_op() {
            return Err(EngineError::ForwardOutsideCall);
        }
        let callee_dyn = self
            .state
            .callee_dynamic_function
            .ok_or(EngineError::ForwardOutsideCall)?;
        let variable = self.src_manager.insert_variable(&rec.label);
        let unique_reg = DynamicVariable::new(callee_dyn, variable);
        if let Some(caller_reg) = self.state.unique_reg_in_caller_func.take() {
            self.program.call_arg_map.add(unique_reg, caller_reg);
        }
        let written = self.state.last_call_source.unwrap_or(self.current_node_id);
        self.state.write_register(unique_reg, written);
        Ok(())
    }

    // ── Flush ───────────────────────────────────────────────────────────────

    /// Emit every buffered edge to the program store and hand the build
    /// products back to the caller.
    pub fn finish(mut self) -> GraphBundle {
        let reg_table = mem::take(&mut self.register_edge_table);
        for e in reg_table {
            self.program.add_edge(e.source, e.sink, EdgeLabel::Parameter(e.slot));
        }
        let mem_table = mem::take(&mut self.memory_edge_table);
        for (source, sinks) in mem_table {
            for sink in sinks {
                self.program.add_edge(source, sink, EdgeLabel::Memory);
            }
        }
        let ctrl_table = mem::take(&mut self.control_edge_table);
        for (source, sinks) in ctrl_table {
            for sink in sinks {
                self.program.add_edge(source, sink, EdgeLabel::Control);
            }
        }
        GraphBundle {
            program: self.program,
            src_manager: self.src_manager,
            num_register_deps: self.num_reg_dep,
            num_memory_deps: self.num_mem_dep,
            num_control_deps: self.num_ctrl_dep,
        }
    }
}

fn create_mem_value(op: &Operand) -> Result<MemValue, CodecError> {
    if op.value_type == ValueType::Vector {
        Ok(MemValue::Vector(codec::hex_to_bytes(&op.value_str)?))
    } else {
        let is_float = op.value_type == ValueType::Float;
        Ok(MemValue::Scalar {
            bits: codec::to_bits(op.value, op.size_bits / BYTE, is_float),
            is_float,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapath::RecordingDatapath;
    use crate::record::{self, Tag};

    /// Feed raw trace lines (without the labelmap) straight into an engine.
    fn run_lines(dp: &mut RecordingDatapath, lines: &[&str]) -> GraphBundle {
        let mut engine = DddgBuilder::new(dp);
        for line in lines {
            let (tag, rest) = line.split_once(',').expect("record line");
            match record::parse_tag(tag).unwrap() {
                Tag::Instruction => engine
                    .consume_instruction(&record::parse_instruction(rest).unwrap())
                    .unwrap(),
                Tag::Result => engine
                    .consume_result(&record::parse_result(rest).unwrap())
                    .unwrap(),
                Tag::Forward => engine
                    .consume_forward(&record::parse_forward(rest).unwrap())
                    .unwrap(),
                Tag::Parameter(slot) => engine
                    .consume_parameter(&record::parse_parameter(rest, slot).unwrap())
                    .unwrap(),
            }
        }
        engine.finish()
    }

    #[test]
    fn minimal_register_chain() {
        let mut dp = RecordingDatapath::new(false);
        // Alloca %a; store %a <- 5; load %b <- %a; ret. No GEP, so the store
        // seeds the address register itself.
        let bundle = run_lines(
            &mut dp,
            &[
                "0,1,top,entry:0,top-0,26,0",
                "0,2,top,entry:0,top-1,28,1",
                "2,64,1024,1,%a,",
                "1,32,5,0,5,",
                "0,3,top,entry:0,top-2,27,2",
                "1,64,1024,1,%a,",
                "r,32,5,1,%b,",
                "0,4,top,entry:0,top-3,1,3",
            ],
        );
        assert_eq!(bundle.program.num_nodes(), 4);
        // The store's implicit address computation feeds the load's slot 1.
        assert!(bundle.program.has_register_edge(1, 2, 1));
        assert!(bundle.program.has_memory_edge(1, 2));
        // Ret collects every prior non-DMA node.
        assert!(bundle.program.has_control_edge(0, 3));
        assert!(bundle.program.has_control_edge(1, 3));
        assert!(bundle.program.has_control_edge(2, 3));
        assert_eq!(bundle.num_register_deps, 1);
        assert_eq!(bundle.num_memory_deps, 1);
        assert_eq!(bundle.num_control_deps, 3);
    }

    #[test]
    fn phi_filters_inactive_predecessor() {
        let mut dp = RecordingDatapath::new(false);
        let bundle = run_lines(
            &mut dp,
            &[
                "0,1,top,entry:0,top-0,8,0",
                "r,32,1,1,%x,",
                "0,2,top,body:0,top-1,8,1",
                "r,32,2,1,%y,",
                "0,3,top,merge:0,top-2,48,2",
                "1,32,1,1,%x,entry:0,",
                "2,32,2,1,%y,body:0,",
                "r,32,2,1,%z,",
            ],
        );
        // Only the parameter whose predecessor block matches creates an edge.
        assert!(!bundle.program.has_register_edge(0, 2, 1));
        assert!(bundle.program.has_register_edge(1, 2, 2));
        assert_eq!(bundle.num_register_deps, 1);
    }

    #[test]
    fn dma_fence_orders_dma_nodes() {
        let mut dp = RecordingDatapath::new(false);
        let bundle = run_lines(
            &mut dp,
            &[
                "0,1,top,entry:0,top-0,98,0",
                "0,2,top,entry:0,top-1,98,1",
                "0,3,top,entry:0,top-2,97,2",
                "0,4,top,entry:0,top-3,99,3",
            ],
        );
        assert!(bundle.program.has_control_edge(0, 2));
        assert!(bundle.program.has_control_edge(1, 2));
        assert!(bundle.program.has_control_edge(2, 3));
        // DMA nodes are not serialized against each other directly.
        assert!(!bundle.program.has_control_edge(0, 1));
        assert!(!bundle.program.has_memory_edge(0, 1));
        assert_eq!(bundle.num_control_deps, 3);
    }

    #[test]
    fn call_argument_aliasing_resolves_to_origin() {
        let mut dp = RecordingDatapath::new(false);
        let bundle = run_lines(
            &mut dp,
            &[
                "0,1,main,entry:0,main-0,26,0",
                "r,64,4096,1,arr,",
                "0,2,main,entry:0,main-1,49,1",
                "2,64,0,0,f,",
                "1,64,4096,1,arr,",
                "f,64,4096.0,1,p,",
                "0,3,f,body:0,f-0,29,2",
                "1,64,4096,1,p,",
            ],
        );
        // The GEP on the formal resolves to the caller's array.
        assert_eq!(bundle.program.node(2).array_label.as_deref(), Some("arr"));
        assert_eq!(dp.array_base_addresses.get("arr"), Some(&4096));
        assert_eq!(dp.array_base_addresses.get("p"), None);

        let f = bundle.src_manager.get_function("f").unwrap();
        let main = bundle.src_manager.get_function("main").unwrap();
        let p = bundle.src_manager.get_variable("p").unwrap();
        let arr = bundle.src_manager.get_variable("arr").unwrap();
        let formal = DynamicVariable::new(DynamicFunction::new(f, 1), p);
        let origin = DynamicVariable::new(DynamicFunction::new(main, 1), arr);
        assert_eq!(bundle.program.call_arg_map.lookup(formal), origin);
        // The forward rewired the formal to the alloca's writer, so the
        // callee's read resolves across the frame.
        assert!(bundle.program.has_register_edge(0, 2, 1));
    }

    const DMA_LOAD_16B_AT_4096: [&str; 6] = [
        "0,1,top,entry:0,top-0,98,0",
        "4,64,0,0,dmaLoad,",
        "3,64,4096,0,addr,",
        "2,64,0,0,off,",
        "1,64,16,0,len,",
        "r,64,0,1,%d,",
    ];

    #[test]
    fn dma_load_raw_in_normal_mode() {
        let mut dp = RecordingDatapath::new(false);
        let mut lines: Vec<&str> = DMA_LOAD_16B_AT_4096.to_vec();
        lines.extend(["0,2,top,entry:0,top-1,27,1", "1,64,4100,1,%p,", "r,32,1,1,%v,"]);
        let bundle = run_lines(&mut dp, &lines);
        let dma = bundle.program.node(0).dma_mem_access.unwrap();
        assert_eq!(dma.base_addr, 4096);
        assert_eq!(dma.src_off, dma.dst_off);
        assert_eq!(dma.size, 16);
        assert!(bundle.program.has_memory_edge(0, 1));
    }

    #[test]
    fn dma_load_raw_suppressed_in_ready_mode() {
        let mut dp = RecordingDatapath::new(true);
        let mut lines: Vec<&str> = DMA_LOAD_16B_AT_4096.to_vec();
        lines.extend(["0,2,top,entry:0,top-1,27,1", "1,64,4100,1,%p,", "r,32,1,1,%v,"]);
        let bundle = run_lines(&mut dp, &lines);
        assert!(!bundle.program.has_memory_edge(0, 1));
        assert_eq!(bundle.num_memory_deps, 0);
    }

    #[test]
    fn store_after_dma_load_is_serialized() {
        let mut dp = RecordingDatapath::new(false);
        let bundle = run_lines(
            &mut dp,
            &[
                "0,1,top,entry:0,top-0,98,0",
                "4,64,0,0,dmaLoad,",
                "3,64,8192,0,addr,",
                "2,64,0,0,off,",
                "1,64,8,0,len,",
                "r,64,0,1,%d,",
                "0,2,top,entry:0,top-1,28,1",
                "2,64,8196,1,%p,",
                "1,32,7,0,7,",
                // A later 1-byte load at the store's address must observe
                // the store, not the DMA. (Only the base byte is overwritten
                // by a store; the rest of the DMA range still points at the
                // DMA node.)
                "0,3,top,entry:0,top-2,27,2",
                "1,64,8196,1,%p,",
                "r,8,7,1,%v,",
            ],
        );
        assert!(bundle.program.has_memory_edge(0, 1));
        assert!(bundle.program.has_memory_edge(1, 2));
        assert!(!bundle.program.has_memory_edge(0, 2));
    }

    #[test]
    fn dma_v2_separates_offsets() {
        let mut dp = RecordingDatapath::new(false);
        let bundle = run_lines(
            &mut dp,
            &[
                "0,1,top,entry:0,top-0,99,0",
                "5,64,0,0,dmaStore,",
                "4,64,4096,0,addr,",
                "3,64,8,0,srcoff,",
                "2,64,32,0,dstoff,",
                "1,64,16,0,len,",
                "r,64,0,1,%d,",
            ],
        );
        let dma = bundle.program.node(0).dma_mem_access.unwrap();
        assert_eq!(dma.base_addr, 4096);
        assert_eq!(dma.src_off, 8);
        assert_eq!(dma.dst_off, 32);
        assert_eq!(dma.size, 16);
    }

    #[test]
    fn dma_unknown_form_is_fatal() {
        let mut dp = RecordingDatapath::new(false);
        let mut engine = DddgBuilder::new(&mut dp);
        engine
            .consume_instruction(&record::parse_instruction("1,top,entry:0,top-0,98,0").unwrap())
            .unwrap();
        engine
            .consume_parameter(&record::parse_parameter("64,4096,0,addr,", 2).unwrap())
            .unwrap();
        engine
            .consume_parameter(&record::parse_parameter("64,16,0,len,", 1).unwrap())
            .unwrap();
        let err = engine
            .consume_result(&record::parse_result("64,0,1,%d,").unwrap())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownDmaForm { params: 2 }));
    }

    #[test]
    fn recursive_call_deepens_invocations() {
        let mut dp = RecordingDatapath::new(false);
        let bundle = run_lines(
            &mut dp,
            &[
                "0,1,fib,entry:0,fib-0,49,0",
                "2,64,0,0,fib,",
                "1,32,3,0,3,",
                "0,2,fib,entry:0,fib-1,8,1",
                "r,32,1,1,%t,",
            ],
        );
        let f = bundle.src_manager.get_function("fib").unwrap();
        // Initial entry plus the self-call.
        assert_eq!(bundle.src_manager.invocations(f), 2);
        assert_eq!(bundle.program.node(1).dynamic_invocation, 2);
    }

    #[test]
    fn loop_depth_limit_is_fatal() {
        let mut dp = RecordingDatapath::new(false);
        let mut engine = DddgBuilder::new(&mut dp);
        let err = engine
            .consume_instruction(
                &record::parse_instruction("1,top,deep:1000,top-0,8,0").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::LoopDepthExceeded { depth: 1000 }));
    }

    #[test]
    fn node_id_desync_is_fatal() {
        let mut dp = RecordingDatapath::new(false);
        let mut engine = DddgBuilder::new(&mut dp);
        let err = engine
            .consume_instruction(&record::parse_instruction("1,top,entry:0,top-0,8,5").unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::NodeIdMismatch {
                expected: 0,
                found: 5
            }
        ));
    }

    #[test]
    fn forward_outside_call_is_fatal() {
        let mut dp = RecordingDatapath::new(false);
        let mut engine = DddgBuilder::new(&mut dp);
        engine
            .consume_instruction(&record::parse_instruction("1,top,entry:0,top-0,8,0").unwrap())
            .unwrap();
        let err = engine
            .consume_forward(&record::parse_forward("64,1.0,1,p,").unwrap())
            .unwrap_err();
        assert!(matches!(err, EngineError::ForwardOutsideCall));
    }

    #[test]
    fn store_mem_access_uses_value_operand() {
        let mut dp = RecordingDatapath::new(false);
        let bundle = run_lines(
            &mut dp,
            &[
                "0,1,top,entry:0,top-0,28,0",
                "2,64,1024,1,%a,",
                "1,32,2.5,0,2.5,",
            ],
        );
        let access = bundle.program.node(0).mem_access.clone().unwrap();
        assert_eq!(access.vaddr, 1024);
        assert_eq!(access.size, 4);
        assert_eq!(
            access.value,
            MemValue::Scalar {
                bits: f32::to_bits(2.5) as u64,
                is_float: true
            }
        );
    }

    #[test]
    fn vector_store_decodes_hex_payload() {
        let mut dp = RecordingDatapath::new(false);
        let bundle = run_lines(
            &mut dp,
            &[
                "0,1,top,entry:0,top-0,28,0",
                "2,64,1024,1,%a,",
                "1,128,0x000102030405060708090a0b0c0d0e0f,0,v,",
            ],
        );
        let access = bundle.program.node(0).mem_access.clone().unwrap();
        assert_eq!(access.size, 16);
        match access.value {
            MemValue::Vector(bytes) => {
                assert_eq!(bytes.len(), 16);
                assert_eq!(bytes[1], 0x01);
            }
            other => panic!("expected vector payload, got {other:?}"),
        }
    }

    #[test]
    fn double_precision_flag_on_64bit_fp_result() {
        let mut dp = RecordingDatapath::new(false);
        let bundle = run_lines(
            &mut dp,
            &["0,1,top,entry:0,top-0,13,0", "r,64,2.0,1,%x,"],
        );
        assert!(bundle.program.node(0).double_precision);
    }
}
