// driver.rs — Trace streaming and build orchestration
//
// Opens a (possibly gzip-compressed) trace, detects the labelmap prelude,
// sequences records into the dependence engine, reports progress, and stops
// once the first function has returned. Edges are flushed once, at end of
// trace.
//
// Preconditions: `path` names a readable trace file.
// Postconditions: returns the final byte offset consumed (or `EndOfTrace`
//                 when no instruction was seen) together with the build
//                 bundle and provenance.
// Failure modes: I/O errors, malformed records, engine structural anomalies.
// Side effects: prints the summary block to stdout; writes the progress
//               sidecar file; `--verbose` timing lines on stderr.

use std::cell::Cell;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};

use crate::builder::{DddgBuilder, EngineError, GraphBundle};
use crate::datapath::Datapath;
use crate::opcode::Microop;
use crate::progress::ProgressTracker;
use crate::record::{self, RecordError, Tag};

const LABELMAP_START: &str = "%%%% LABEL MAP START %%%%";
const LABELMAP_END: &str = "%%%% LABEL MAP END %%%%";

/// Fixed line-buffer bound; longer lines mean a desynchronized producer.
const MAX_LINE_LEN: usize = 4096;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// ── Error type ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum BuildError {
    Io {
        path: PathBuf,
        source: io::Error,
    },
    Record {
        line: u64,
        source: RecordError,
    },
    Engine {
        line: u64,
        source: EngineError,
    },
    LineTooLong {
        line: u64,
        limit: usize,
    },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            BuildError::Record { line, source } => write!(f, "trace line {line}: {source}"),
            BuildError::Engine { line, source } => write!(f, "trace line {line}: {source}"),
            BuildError::LineTooLong { line, limit } => {
                write!(f, "trace line {line}: exceeds the {limit}-byte line buffer")
            }
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Io { source, .. } => Some(source),
            BuildError::Record { source, .. } => Some(source),
            BuildError::Engine { source, .. } => Some(source),
            BuildError::LineTooLong { .. } => None,
        }
    }
}

// ── Provenance ──────────────────────────────────────────────────────────────

/// Identity of one build: SHA-256 of the consumed (decompressed) trace bytes
/// and the builder version.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub trace_hash: [u8; 32],
    pub builder_version: &'static str,
}

impl Provenance {
    /// Hex string of the trace hash (64 characters).
    pub fn trace_hash_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.trace_hash {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

// ── Outcome ─────────────────────────────────────────────────────────────────

/// Where the build stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Final byte offset consumed from the trace file.
    Offset(u64),
    /// The trace (or what was left of it) held no instruction records.
    EndOfTrace,
}

/// Everything `build_initial_dddg` hands back.
#[derive(Debug)]
pub struct BuildResult {
    pub outcome: BuildOutcome,
    pub bundle: GraphBundle,
    pub provenance: Provenance,
}

// ── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Progress sidecar path; `None` disables progress reporting.
    pub progress_path: Option<PathBuf>,
    /// Print phase timing to stderr.
    pub verbose: bool,
    /// Suppress the stdout summary block.
    pub quiet: bool,
}

// ── Counting reader ─────────────────────────────────────────────────────────

/// Counts bytes read from the underlying file, below any decompression, so
/// the reported offset matches the on-disk position.
struct CountingReader<R> {
    inner: R,
    count: Rc<Cell<u64>>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.set(self.count.get() + n as u64);
        Ok(n)
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Stream the trace at `path` and build the dynamic data dependence graph.
pub fn build_initial_dddg(
    path: &Path,
    datapath: &mut dyn Datapath,
    options: &DriverOptions,
) -> Result<BuildResult, BuildError> {
    let io_err = |source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    };

    if !options.quiet {
        println!("-------------------------------");
        println!("      Generating DDDG          ");
        println!("-------------------------------");
    }
    let started = Instant::now();

    let mut file = File::open(path).map_err(io_err)?;
    let total_bytes = file.metadata().map_err(io_err)?.len();

    // Sniff the gzip magic, then rewind.
    let mut magic = [0u8; 2];
    let is_gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(_) => false,
    };
    file.seek(SeekFrom::Start(0)).map_err(io_err)?;

    let offset = Rc::new(Cell::new(0u64));
    let counting = CountingReader {
        inner: file,
        count: Rc::clone(&offset),
    };
    let raw: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(counting))
    } else {
        Box::new(counting)
    };
    let mut reader = BufReader::new(raw);

    let mut progress = options
        .progress_path
        .as_deref()
        .map(|p| ProgressTracker::create(p, total_bytes))
        .transpose()
        .map_err(io_err)?;

    let mut engine = DddgBuilder::new(datapath);
    let mut hasher = Sha256::new();
    let mut line = String::new();
    let mut line_no: u64 = 0;
    let mut first_function: Option<String> = None;
    let mut first_function_returned = false;
    let mut in_labelmap_section = false;
    let mut labelmap_parsed_or_not_present = false;

    loop {
        line.clear();
        let n = reader.read_line(&mut line).map_err(io_err)?;
        if n == 0 {
            break;
        }
        line_no += 1;
        if line.len() > MAX_LINE_LEN {
            return Err(BuildError::LineTooLong {
                line: line_no,
                limit: MAX_LINE_LEN,
            });
        }
        hasher.update(line.as_bytes());
        if let Some(p) = progress.as_mut() {
            p.update(offset.get(), engine.num_nodes()).map_err(io_err)?;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);

        // Scan for the labelmap section until it has been parsed or ruled
        // out by the first record line.
        if !labelmap_parsed_or_not_present {
            if !in_labelmap_section {
                if trimmed.contains(LABELMAP_START) {
                    in_labelmap_section = true;
                    continue;
                }
            } else {
                if trimmed.contains(LABELMAP_END) {
                    labelmap_parsed_or_not_present = true;
                    in_labelmap_section = false;
                    continue;
                }
                let rec = record::parse_labelmap_line(trimmed)
                    .map_err(|source| BuildError::Record {
                        line: line_no,
                        source,
                    })?;
                engine.consume_labelmap(&rec);
                continue;
            }
        }

        let Some((tag, rest)) = trimmed.split_once(',') else {
            // An empty or tagless line ends processing once the first
            // function has returned.
            if first_function_returned {
                break;
            }
            continue;
        };
        labelmap_parsed_or_not_present = true;

        let record_err = |source| BuildError::Record {
            line: line_no,
            source,
        };
        let engine_err = |source| BuildError::Engine {
            line: line_no,
            source,
        };
        match record::parse_tag(tag).map_err(record_err)? {
            Tag::Instruction => {
                let rec = record::parse_instruction(rest).map_err(record_err)?;
                if first_function.is_none() {
                    first_function = Some(rec.static_function.clone());
                }
                first_function_returned = rec.microop == Microop::Ret
                    && first_function.as_deref() == Some(rec.static_function.as_str());
                engine.consume_instruction(&rec).map_err(engine_err)?;
            }
            Tag::Result => {
                let rec = record::parse_result(rest).map_err(record_err)?;
                engine.consume_result(&rec).map_err(engine_err)?;
            }
            Tag::Forward => {
                let rec = record::parse_forward(rest).map_err(record_err)?;
                engine.consume_forward(&rec).map_err(engine_err)?;
            }
            Tag::Parameter(slot) => {
                let rec = record::parse_parameter(rest, slot).map_err(record_err)?;
                engine.consume_parameter(&rec).map_err(engine_err)?;
            }
        }
    }

    let final_offset = offset.get();
    if let Some(p) = progress.as_mut() {
        p.finish(final_offset, engine.num_nodes()).map_err(io_err)?;
    }

    let provenance = Provenance {
        trace_hash: hasher.finalize().into(),
        builder_version: env!("CARGO_PKG_VERSION"),
    };

    let seen_instructions = first_function.is_some();
    let bundle = engine.finish();
    if options.verbose {
        eprintln!(
            "tgc: dddg build complete, {:.1}ms",
            started.elapsed().as_secs_f64() * 1000.0
        );
        eprintln!("tgc: trace sha256 = {}", provenance.trace_hash_hex());
    }

    if seen_instructions {
        if !options.quiet {
            println!("-------------------------------");
            println!("Num of Nodes: {}", bundle.program.num_nodes());
            println!("Num of Edges: {}", bundle.program.num_edges());
            println!("Num of Reg Edges: {}", bundle.num_register_deps);
            println!("Num of MEM Edges: {}", bundle.num_memory_deps);
            println!("Num of Control Edges: {}", bundle.num_control_deps);
            println!("-------------------------------");
        }
        Ok(BuildResult {
            outcome: BuildOutcome::Offset(final_offset),
            bundle,
            provenance,
        })
    } else {
        if !options.quiet {
            println!("-------------------------------");
            println!("Reached end of trace.");
            println!("-------------------------------");
        }
        Ok(BuildResult {
            outcome: BuildOutcome::EndOfTrace,
            bundle,
            provenance,
        })
    }
}

// ── JSON summary ────────────────────────────────────────────────────────────

/// Serializable build summary for `--emit json` (schema v1).
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct GraphSummary {
    pub schema: u32,
    pub num_nodes: usize,
    pub num_edges: usize,
    pub num_register_deps: usize,
    pub num_memory_deps: usize,
    pub num_control_deps: usize,
    pub functions: Vec<String>,
    pub trace_sha256: String,
    pub builder_version: String,
}

impl GraphSummary {
    pub fn from_result(result: &BuildResult) -> Self {
        let mut functions: Vec<String> = (0..result.bundle.src_manager.num_functions() as u32)
            .map(|i| {
                result
                    .bundle
                    .src_manager
                    .function_name(crate::symbols::FunctionId(i))
                    .to_string()
            })
            .collect();
        functions.sort();
        GraphSummary {
            schema: 1,
            num_nodes: result.bundle.program.num_nodes(),
            num_edges: result.bundle.program.num_edges(),
            num_register_deps: result.bundle.num_register_deps,
            num_memory_deps: result.bundle.num_memory_deps,
            num_control_deps: result.bundle.num_control_deps,
            functions,
            trace_sha256: result.provenance.trace_hash_hex(),
            builder_version: result.provenance.builder_version.to_string(),
        }
    }

    /// Pretty-printed JSON for display and file output.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("summary serialization should not fail")
    }
}
