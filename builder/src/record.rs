// record.rs — Trace record parser
//
// Tokenizes one trace line into a typed record. Lines are comma-separated;
// the first token is a tag selecting the grammar (instruction / parameter /
// result / forward). Labelmap lines use a separate space-delimited grammar.
//
// Preconditions: the driver has already stripped the tag token.
// Postconditions: a well-formed line yields exactly one typed record.
// Failure modes: wrong field count, non-numeric fields, unknown microop or
//                tag → `RecordError`. All are fatal to the build.
// Side effects: none.

use std::fmt;

use crate::opcode::Microop;

// ── Error type ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RecordError {
    FieldCount { expected: &'static str, found: usize },
    InvalidInt { field: &'static str, value: String },
    InvalidFloat { field: &'static str, value: String },
    UnknownMicroop { code: u32 },
    MalformedBasicBlock { bblock: String },
    UnknownTag { tag: String },
    MalformedLabelmap { line: String },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::FieldCount { expected, found } => {
                write!(f, "expected {expected} fields, found {found}")
            }
            RecordError::InvalidInt { field, value } => {
                write!(f, "field '{field}' is not an integer: '{value}'")
            }
            RecordError::InvalidFloat { field, value } => {
                write!(f, "field '{field}' is not a number: '{value}'")
            }
            RecordError::UnknownMicroop { code } => {
                write!(f, "unknown microop code {code}")
            }
            RecordError::MalformedBasicBlock { bblock } => {
                write!(f, "basic block id '{bblock}' is not '<name>:<loop_depth>'")
            }
            RecordError::UnknownTag { tag } => {
                write!(f, "unknown record tag '{tag}'")
            }
            RecordError::MalformedLabelmap { line } => {
                write!(f, "malformed labelmap entry: '{line}'")
            }
        }
    }
}

impl std::error::Error for RecordError {}

// ── Tags ────────────────────────────────────────────────────────────────────

/// The record grammar selected by a line's first comma-delimited token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Instruction,
    Result,
    Forward,
    Parameter(u32),
}

/// Classify a tag token. `0` is an instruction, `r` a result, `f` a forward,
/// and any integer ≥ 1 a parameter with that slot number.
pub fn parse_tag(tag: &str) -> Result<Tag, RecordError> {
    match tag {
        "0" => Ok(Tag::Instruction),
        "r" => Ok(Tag::Result),
        "f" => Ok(Tag::Forward),
        _ => match tag.parse::<u32>() {
            Ok(slot) if slot >= 1 => Ok(Tag::Parameter(slot)),
            _ => Err(RecordError::UnknownTag {
                tag: tag.to_string(),
            }),
        },
    }
}

// ── Value classification ────────────────────────────────────────────────────

/// How an operand value field is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Integer,
    Float,
    Vector,
}

impl ValueType {
    /// Vector when wider than 64 bits; float when the text has a decimal
    /// point; integer otherwise.
    pub fn classify(size_bits: u32, value_str: &str) -> ValueType {
        if size_bits > 64 {
            ValueType::Vector
        } else if value_str.contains('.') {
            ValueType::Float
        } else {
            ValueType::Integer
        }
    }
}

// ── Records ─────────────────────────────────────────────────────────────────

/// Tag `0`: one executed instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionRecord {
    pub line_num: u32,
    pub static_function: String,
    /// The full `<name>:<loop_depth>` token, kept verbatim for PHI
    /// predecessor matching.
    pub bblock_id: String,
    pub bblock_name: String,
    pub loop_depth: u32,
    pub inst_id: String,
    pub microop: Microop,
    pub node_id: u32,
}

/// The operand fields shared by parameter and result records. The numeric
/// payload is parsed eagerly; vector payloads keep their hex text for the
/// codec and carry a numeric value of 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub size_bits: u32,
    pub value_str: String,
    pub value_type: ValueType,
    pub value: f64,
    pub is_reg: bool,
    pub label: String,
}

/// Tag `N ≥ 1`: the Nth operand of the current instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    pub slot: u32,
    pub operand: Operand,
    /// Predecessor basic-block id; present only on PHI parameters.
    pub prev_bblock: Option<String>,
}

/// Tag `r`: the current instruction's result operand.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub operand: Operand,
}

/// Tag `f`: a call-argument forwarding record.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardRecord {
    pub size_bits: u32,
    pub value: f64,
    pub is_reg: bool,
    pub label: String,
}

/// One entry from the labelmap prelude section.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelmapRecord {
    pub function: String,
    pub label: String,
    pub line_number: u32,
    /// Callers into which this label was inlined, in declaration order.
    pub inline_callers: Vec<String>,
}

// ── Field helpers ───────────────────────────────────────────────────────────

/// Split on commas, dropping one trailing empty field (trace lines carry a
/// trailing comma).
fn split_fields(rest: &str) -> Vec<&str> {
    let rest = rest.trim_end_matches(['\n', '\r']);
    let mut fields: Vec<&str> = rest.split(',').collect();
    if fields.last() == Some(&"") {
        fields.pop();
    }
    fields
}

fn parse_u32(field: &'static str, value: &str) -> Result<u32, RecordError> {
    value.parse::<u32>().map_err(|_| RecordError::InvalidInt {
        field,
        value: value.to_string(),
    })
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, RecordError> {
    Ok(parse_u32(field, value)? != 0)
}

// ── Parsers ─────────────────────────────────────────────────────────────────

/// Parse the remainder of a tag-`0` line:
/// `line_num,static_function,bblock_id,inst_id,microop,node_id`.
pub fn parse_instruction(rest: &str) -> Result<InstructionRecord, RecordError> {
    let fields = split_fields(rest);
    if fields.len() != 6 {
        return Err(RecordError::FieldCount {
            expected: "6",
            found: fields.len(),
        });
    }
    let (bblock_name, depth_str) =
        fields[2]
            .rsplit_once(':')
            .ok_or_else(|| RecordError::MalformedBasicBlock {
                bblock: fields[2].to_string(),
            })?;
    let code = parse_u32("microop", fields[4])?;
    let microop = Microop::from_code(code).ok_or(RecordError::UnknownMicroop { code })?;
    Ok(InstructionRecord {
        line_num: parse_u32("line_num", fields[0])?,
        static_function: fields[1].to_string(),
        bblock_id: fields[2].to_string(),
        bblock_name: bblock_name.to_string(),
        loop_depth: parse_u32("loop_depth", depth_str)?,
        inst_id: fields[3].to_string(),
        microop,
        node_id: parse_u32("node_id", fields[5])?,
    })
}

fn parse_operand(fields: &[&str]) -> Result<Operand, RecordError> {
    let size_bits = parse_u32("size", fields[0])?;
    let value_str = fields[1].to_string();
    let value_type = ValueType::classify(size_bits, &value_str);
    let value = if value_type == ValueType::Vector {
        0.0
    } else {
        value_str
            .parse::<f64>()
            .map_err(|_| RecordError::InvalidFloat {
                field: "value",
                value: value_str.clone(),
            })?
    };
    Ok(Operand {
        size_bits,
        value_str,
        value_type,
        value,
        is_reg: parse_bool("is_reg", fields[2])?,
        label: fields[3].to_string(),
    })
}

/// Parse the remainder of a tag-`N` line:
/// `size,value,is_reg,label[,prev_bbid]` — the fifth field appears only on
/// PHI parameters.
pub fn parse_parameter(rest: &str, slot: u32) -> Result<ParameterRecord, RecordError> {
    let fields = split_fields(rest);
    if fields.len() != 4 && fields.len() != 5 {
        return Err(RecordError::FieldCount {
            expected: "4 or 5",
            found: fields.len(),
        });
    }
    Ok(ParameterRecord {
        slot,
        operand: parse_operand(&fields)?,
        prev_bblock: fields.get(4).map(|s| s.to_string()),
    })
}

/// Parse the remainder of a tag-`r` line: `size,value,is_reg,label`.
pub fn parse_result(rest: &str) -> Result<ResultRecord, RecordError> {
    let fields = split_fields(rest);
    if fields.len() != 4 {
        return Err(RecordError::FieldCount {
            expected: "4",
            found: fields.len(),
        });
    }
    Ok(ResultRecord {
        operand: parse_operand(&fields)?,
    })
}

/// Parse the remainder of a tag-`f` line: `size,value,is_reg,label`.
pub fn parse_forward(rest: &str) -> Result<ForwardRecord, RecordError> {
    let fields = split_fields(rest);
    if fields.len() != 4 {
        return Err(RecordError::FieldCount {
            expected: "4",
            found: fields.len(),
        });
    }
    Ok(ForwardRecord {
        size_bits: parse_u32("size", fields[0])?,
        value: fields[1]
            .parse::<f64>()
            .map_err(|_| RecordError::InvalidFloat {
                field: "value",
                value: fields[1].to_string(),
            })?,
        is_reg: parse_bool("is_reg", fields[2])?,
        label: fields[3].to_string(),
    })
}

/// Parse one labelmap-section line:
/// `<func>/<label> <line_num>` optionally followed by `inline <caller>…`.
pub fn parse_labelmap_line(line: &str) -> Result<LabelmapRecord, RecordError> {
    let line = line.trim();
    let malformed = || RecordError::MalformedLabelmap {
        line: line.to_string(),
    };
    let (function, rest) = line.split_once('/').ok_or_else(malformed)?;
    let mut tokens = rest.split_whitespace();
    let label = tokens.next().ok_or_else(malformed)?;
    let line_number = tokens
        .next()
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    let inline_callers = match tokens.next() {
        Some("inline") => tokens.map(|s| s.to_string()).collect(),
        Some(_) => return Err(malformed()),
        None => Vec::new(),
    };
    Ok(LabelmapRecord {
        function: function.to_string(),
        label: label.to_string(),
        line_number,
        inline_callers,
    })
}
