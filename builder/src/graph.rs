// graph.rs — Program store for the dynamic data dependence graph
//
// Owns the node vector and the three per-source edge indices (register,
// memory, control), plus the label map and the call-argument alias map.
// Nodes are append-only; a node's id equals its position.
//
// Preconditions: `insert_node` ids arrive densely in trace order.
// Postconditions: every edge satisfies source < sink; duplicate edges on the
//                 same (source, sink, label) are silently idempotent.
// Failure modes: out-of-order node insertion is a contract violation (panic).
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::opcode::Microop;
use crate::symbols::{
    BasicBlockId, DynamicVariable, FunctionId, InstructionId, LabelId, VariableId,
};

/// Virtual byte address as it appears in the trace.
pub type Addr = u64;

/// Mask applied to raw address operand values to strip producer-side tag
/// bits. 48-bit virtual addresses.
pub const ADDR_MASK: Addr = 0x0000_ffff_ffff_ffff;

/// Bits per byte, for operand size fields carried in bits.
pub const BYTE: u32 = 8;

// ── Memory accesses ─────────────────────────────────────────────────────────

/// Payload of a scalar or vector memory access.
#[derive(Debug, Clone, PartialEq)]
pub enum MemValue {
    Scalar { bits: u64, is_float: bool },
    Vector(Vec<u8>),
}

/// One load or store payload, with its virtual address and size in bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct MemAccess {
    pub vaddr: Addr,
    pub size: u64,
    pub value: MemValue,
}

/// A DMA transfer descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaMemAccess {
    pub base_addr: Addr,
    pub src_off: u64,
    pub dst_off: u64,
    pub size: u64,
}

// ── Nodes ───────────────────────────────────────────────────────────────────

/// One dynamic instruction instance.
#[derive(Debug, Clone)]
pub struct Node {
    pub node_id: u32,
    pub microop: Microop,
    pub line_num: u32,
    pub static_inst: Option<InstructionId>,
    pub static_function: Option<FunctionId>,
    pub basic_block: Option<BasicBlockId>,
    pub loop_depth: u32,
    /// Which invocation of `static_function` executed this node.
    pub dynamic_invocation: u32,
    pub mem_access: Option<MemAccess>,
    pub dma_mem_access: Option<DmaMemAccess>,
    pub variable: Option<VariableId>,
    pub array_label: Option<String>,
    pub double_precision: bool,
}

impl Node {
    fn new(node_id: u32, microop: Microop) -> Self {
        Node {
            node_id,
            microop,
            line_num: 0,
            static_inst: None,
            static_function: None,
            basic_block: None,
            loop_depth: 0,
            dynamic_invocation: 0,
            mem_access: None,
            dma_mem_access: None,
            variable: None,
            array_label: None,
            double_precision: false,
        }
    }
}

// ── Edges ───────────────────────────────────────────────────────────────────

/// Edge label: a memory dependence, a control dependence, or a register data
/// dependence feeding the sink's Nth parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeLabel {
    Memory,
    Control,
    Parameter(u32),
}

// ── Label map ───────────────────────────────────────────────────────────────

/// A named program point: (function, label) pinned to a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniqueLabel {
    pub function: FunctionId,
    pub label: LabelId,
    pub line_number: u32,
}

// ── Call-argument alias map ─────────────────────────────────────────────────

/// Mapping from a callee-side formal register to the caller-side actual it
/// was bound to. Append-only during one build.
#[derive(Debug, Default)]
pub struct CallArgMap {
    map: HashMap<DynamicVariable, DynamicVariable>,
}

impl CallArgMap {
    pub fn add(&mut self, callee: DynamicVariable, caller: DynamicVariable) {
        self.map.insert(callee, caller);
    }

    /// Follow the alias chain to its fixed point. Returns the input when it
    /// has no entry.
    pub fn lookup(&self, var: DynamicVariable) -> DynamicVariable {
        let mut cur = var;
        let mut steps = 0;
        while let Some(&next) = self.map.get(&cur) {
            cur = next;
            steps += 1;
            if steps > self.map.len() {
                break;
            }
        }
        cur
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ── Program ─────────────────────────────────────────────────────────────────

/// The built graph: nodes, the three edge indices, the label maps, and the
/// call-argument alias map.
#[derive(Debug, Default)]
pub struct Program {
    nodes: Vec<Node>,
    /// source → set of (sink, parameter slot).
    register_edges: HashMap<u32, BTreeSet<(u32, u32)>>,
    /// source → set of sinks.
    memory_edges: HashMap<u32, BTreeSet<u32>>,
    /// source → set of sinks.
    control_edges: HashMap<u32, BTreeSet<u32>>,
    /// line number → program points declared on that line (original plus any
    /// inlined replicas).
    pub labelmap: BTreeMap<u32, Vec<UniqueLabel>>,
    /// Inlined replica → the canonical label it was cloned from, so that
    /// directives attached to the original propagate.
    pub inline_labelmap: HashMap<UniqueLabel, UniqueLabel>,
    pub call_arg_map: CallArgMap,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node. `id` must equal the next position.
    pub fn insert_node(&mut self, id: u32, microop: Microop) -> &mut Node {
        assert_eq!(
            id as usize,
            self.nodes.len(),
            "node ids must be dense and in insertion order"
        );
        self.nodes.push(Node::new(id, microop));
        self.nodes.last_mut().unwrap()
    }

    pub fn node(&self, id: u32) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: u32) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Insert an edge once; duplicates on the same (source, sink, label)
    /// triple are ignored. Returns whether the edge was newly inserted.
    pub fn add_edge(&mut self, source: u32, sink: u32, label: EdgeLabel) -> bool {
        match label {
            EdgeLabel::Parameter(slot) => self
                .register_edges
                .entry(source)
                .or_default()
                .insert((sink, slot)),
            EdgeLabel::Memory => self.memory_edges.entry(source).or_default().insert(sink),
            EdgeLabel::Control => self.control_edges.entry(source).or_default().insert(sink),
        }
    }

    pub fn has_register_edge(&self, source: u32, sink: u32, slot: u32) -> bool {
        self.register_edges
            .get(&source)
            .is_some_and(|s| s.contains(&(sink, slot)))
    }

    pub fn has_memory_edge(&self, source: u32, sink: u32) -> bool {
        self.memory_edges
            .get(&source)
            .is_some_and(|s| s.contains(&sink))
    }

    pub fn has_control_edge(&self, source: u32, sink: u32) -> bool {
        self.control_edges
            .get(&source)
            .is_some_and(|s| s.contains(&sink))
    }

    pub fn num_register_edges(&self) -> usize {
        self.register_edges.values().map(|s| s.len()).sum()
    }

    pub fn num_memory_edges(&self) -> usize {
        self.memory_edges.values().map(|s| s.len()).sum()
    }

    pub fn num_control_edges(&self) -> usize {
        self.control_edges.values().map(|s| s.len()).sum()
    }

    pub fn num_edges(&self) -> usize {
        self.num_register_edges() + self.num_memory_edges() + self.num_control_edges()
    }

    /// All edges from `source`, sorted within each label class. For export
    /// and tests.
    pub fn edges_from(&self, source: u32) -> Vec<(u32, EdgeLabel)> {
        let mut out = Vec::new();
        if let Some(set) = self.register_edges.get(&source) {
            out.extend(
                set.iter()
                    .map(|&(sink, slot)| (sink, EdgeLabel::Parameter(slot))),
            );
        }
        if let Some(set) = self.memory_edges.get(&source) {
            out.extend(set.iter().map(|&sink| (sink, EdgeLabel::Memory)));
        }
        if let Some(set) = self.control_edges.get(&source) {
            out.extend(set.iter().map(|&sink| (sink, EdgeLabel::Control)));
        }
        out
    }

    pub fn add_label(&mut self, line_number: u32, label: UniqueLabel) {
        self.labelmap.entry(line_number).or_default().push(label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{DynamicFunction, SourceManager};

    #[test]
    fn node_ids_are_dense() {
        let mut p = Program::new();
        p.insert_node(0, Microop::Alloca);
        p.insert_node(1, Microop::Store);
        assert_eq!(p.num_nodes(), 2);
        assert_eq!(p.node(1).microop, Microop::Store);
    }

    #[test]
    #[should_panic(expected = "dense")]
    fn out_of_order_node_panics() {
        let mut p = Program::new();
        p.insert_node(1, Microop::Alloca);
    }

    #[test]
    fn duplicate_edges_are_idempotent() {
        let mut p = Program::new();
        p.insert_node(0, Microop::Store);
        p.insert_node(1, Microop::Load);
        assert!(p.add_edge(0, 1, EdgeLabel::Memory));
        assert!(!p.add_edge(0, 1, EdgeLabel::Memory));
        assert!(p.add_edge(0, 1, EdgeLabel::Parameter(1)));
        assert!(p.add_edge(0, 1, EdgeLabel::Parameter(2)));
        assert!(!p.add_edge(0, 1, EdgeLabel::Parameter(2)));
        assert_eq!(p.num_edges(), 3);
    }

    #[test]
    fn edge_queries_distinguish_labels() {
        let mut p = Program::new();
        p.add_edge(3, 7, EdgeLabel::Control);
        assert!(p.has_control_edge(3, 7));
        assert!(!p.has_memory_edge(3, 7));
        assert!(!p.has_register_edge(3, 7, 1));
    }

    #[test]
    fn call_arg_chain_collapses() {
        let mut sm = SourceManager::new();
        let f = sm.insert_function("f");
        let g = sm.insert_function("g");
        let h = sm.insert_function("h");
        let arr = sm.insert_variable("arr");
        let p1 = sm.insert_variable("p");
        let q1 = sm.insert_variable("q");

        let origin = DynamicVariable::new(DynamicFunction::new(f, 1), arr);
        let mid = DynamicVariable::new(DynamicFunction::new(g, 1), p1);
        let leaf = DynamicVariable::new(DynamicFunction::new(h, 1), q1);

        let mut map = CallArgMap::default();
        map.add(mid, origin);
        map.add(leaf, mid);
        assert_eq!(map.lookup(leaf), origin);
        assert_eq!(map.lookup(mid), origin);
        // No entry: lookup returns the input.
        assert_eq!(map.lookup(origin), origin);
    }
}
