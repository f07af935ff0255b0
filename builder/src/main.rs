use clap::Parser;
use std::path::PathBuf;

use tgc::datapath::RecordingDatapath;
use tgc::dot;
use tgc::driver::{self, BuildOutcome, DriverOptions, GraphSummary};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Summary,
    Json,
    Dot,
}

#[derive(Parser, Debug)]
#[command(
    name = "tgc",
    version,
    about = "Trace Graph Constructor — builds dynamic data dependence graphs from execution traces"
)]
struct Cli {
    /// Input trace file (plain or gzip-compressed)
    trace: PathBuf,

    /// Output file path; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Summary)]
    emit: EmitStage,

    /// Ready-mode scheduling: suppress DMA-load memory dependences
    #[arg(long)]
    ready_mode: bool,

    /// Progress sidecar file
    #[arg(long, default_value = "dddg_parse_progress.out")]
    progress_file: PathBuf,

    /// Disable progress reporting
    #[arg(long)]
    no_progress: bool,

    /// Print builder phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("tgc: trace  = {}", cli.trace.display());
        eprintln!("tgc: emit   = {:?}", cli.emit);
        eprintln!("tgc: ready-mode = {}", cli.ready_mode);
    }

    let options = DriverOptions {
        progress_path: if cli.no_progress {
            None
        } else {
            Some(cli.progress_file.clone())
        },
        verbose: cli.verbose,
        quiet: !matches!(cli.emit, EmitStage::Summary),
    };

    let mut datapath = RecordingDatapath::new(cli.ready_mode);
    let result = match driver::build_initial_dddg(&cli.trace, &mut datapath, &options) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("tgc: error: {}", e);
            std::process::exit(2);
        }
    };

    if cli.verbose {
        if let BuildOutcome::Offset(bytes) = result.outcome {
            eprintln!("tgc: consumed {} bytes", bytes);
        }
    }

    let rendered = match cli.emit {
        // The summary block was already printed by the driver.
        EmitStage::Summary => None,
        EmitStage::Json => Some(GraphSummary::from_result(&result).to_json() + "\n"),
        EmitStage::Dot => Some(dot::emit_dot(
            &result.bundle.program,
            &result.bundle.src_manager,
        )),
    };

    if let Some(text) = rendered {
        match &cli.output {
            Some(path) => {
                if let Err(e) = std::fs::write(path, text) {
                    eprintln!("tgc: error: {}: {}", path.display(), e);
                    std::process::exit(2);
                }
            }
            None => print!("{}", text),
        }
    }

    if result.outcome == BuildOutcome::EndOfTrace {
        std::process::exit(1);
    }
}
