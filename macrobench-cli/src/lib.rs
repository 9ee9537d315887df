#![warn(missing_docs)]
//! Macrobench CLI Library
//!
//! Option translation, fork orchestration, score aggregation and the
//! `macrobench` command line. The same binary doubles as the worker: the
//! orchestrator re-launches it with the hidden `--worker` flag.
//!
//! # Example
//!
//! ```ignore
//! use macrobench_cli::{Harness, Orchestrator};
//! use macrobench_core::{HostConfig, Value, snapshot::decode_macro};
//!
//! let harness = Harness::new(Orchestrator::new(HostConfig::default())?);
//! let code = decode_macro("<% 1 1 + %>", harness.orchestrator().registry())?;
//! let options = Value::Map(vec![(Value::from("forks"), Value::Long(1))]);
//! let results = harness.run_macro(code, &options)?;
//! ```

mod aggregate;
mod config;
mod error;
mod harness;
mod options;
mod orchestrator;
mod supervisor;

pub use aggregate::{BENCHMARK_NAME, aggregate, iteration_score};
pub use config::*;
pub use error::{BenchError, ExecutionError, SerializationError};
pub use harness::{Harness, json_to_value, result_to_value};
pub use options::{
    Mode, OPTION_KEYS, RunSpec, ValidationError, format_duration, parse_duration,
};
pub use orchestrator::{
    Orchestrator, RUN_FAILURE, WORKER_BINARY_ENV, measurement_error, root_cause,
};
pub use supervisor::*;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use macrobench_core::{BenchConfiguration, HeapLimits, TransportHandles, Value, WorkerMain};
use macrobench_report::{OutputFormat, format_human_output, generate_json_report};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Macrobench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "macrobench")]
#[command(author, version, about = "Macrobench - fork-isolated benchmarks for stack-machine macros")]
pub struct Cli {
    /// Subcommand; required unless running as a worker
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Internal: run as worker process (used by the orchestrator)
    #[arg(long, hide = true)]
    pub worker: bool,

    /// Internal: benchmark snapshot handed to a worker
    #[arg(long, hide = true)]
    pub bench_config: Option<PathBuf>,

    /// Internal: host configuration handed to a worker
    #[arg(long, hide = true)]
    pub host_config: Option<PathBuf>,

    /// Internal: initial heap of a worker
    #[arg(long, hide = true)]
    pub heap_min: Option<String>,

    /// Internal: heap limit of a worker
    #[arg(long, hide = true)]
    pub heap_max: Option<String>,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Benchmark the macro or hook map stored in a snapshot file
    Run {
        /// Snapshot file holding `<% ... %>` or `{ 'macro' <% ... %> ... }`
        snapshot: PathBuf,

        #[command(flatten)]
        options: OptionArgs,

        /// Output format: json, human (defaults to [output] format)
        #[arg(long)]
        format: Option<String>,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a snapshot and its options and print the plan without running
    Check {
        /// Snapshot file
        snapshot: PathBuf,

        #[command(flatten)]
        options: OptionArgs,
    },
    /// Write a commented macrobench.toml to the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Benchmark options as JSON.
#[derive(Args, Debug, Default)]
pub struct OptionArgs {
    /// Options map as inline JSON, e.g. '{"forks":1,"measurementTime":"1s"}'
    #[arg(long)]
    pub options: Option<String>,

    /// File holding the options map as JSON; inline options override it
    #[arg(long)]
    pub options_file: Option<PathBuf>,
}

impl OptionArgs {
    /// The options map, file entries first.
    pub fn load(&self) -> anyhow::Result<Value> {
        let mut entries = Vec::new();
        if let Some(path) = &self.options_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            entries.extend(parse_options(&text).with_context(|| format!("parsing {}", path.display()))?);
        }
        if let Some(text) = &self.options {
            entries.extend(parse_options(text).context("parsing --options")?);
        }
        Ok(Value::Map(entries))
    }
}

fn parse_options(text: &str) -> anyhow::Result<Vec<(Value, Value)>> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    match json_to_value(&json) {
        Value::Map(entries) => Ok(entries),
        other => anyhow::bail!("options must be a JSON object, got a {}", other.type_name()),
    }
}

/// Run the Macrobench CLI with the process arguments.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the Macrobench CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        "macrobench=debug"
    } else {
        "macrobench=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.worker {
        return run_worker_mode(&cli);
    }

    match cli.command {
        Some(Commands::Run {
            ref snapshot,
            ref options,
            ref format,
            ref output,
        }) => run_benchmark(snapshot, options, format.as_deref(), output.as_deref()),
        Some(Commands::Check {
            ref snapshot,
            ref options,
        }) => check_benchmark(snapshot, options),
        Some(Commands::Init { force }) => init_config(force),
        None => anyhow::bail!("no command given, see `macrobench --help`"),
    }
}

/// Run as a worker process (IPC mode)
fn run_worker_mode(cli: &Cli) -> anyhow::Result<()> {
    let handles = TransportHandles {
        bench_config: cli
            .bench_config
            .clone()
            .context("worker launched without --bench-config")?,
        host_config: cli
            .host_config
            .clone()
            .context("worker launched without --host-config")?,
    };
    let heap = HeapLimits {
        min: cli.heap_min.clone(),
        max: cli.heap_max.clone(),
    };
    WorkerMain::new(handles, heap)
        .run()
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}

fn harness(config: &MacrobenchConfig) -> anyhow::Result<Harness> {
    let orchestrator = Orchestrator::new(config.host_config())?
        .with_timeout(config.runner.fork_timeout()?)
        .with_progress(config.runner.progress);
    Ok(Harness::new(orchestrator).with_defaults(config.default_options()))
}

fn load_bench(path: &Path, harness: &Harness) -> anyhow::Result<BenchConfiguration> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value = macrobench_core::snapshot::decode_value(&text, harness.orchestrator().registry())
        .with_context(|| format!("decoding {}", path.display()))?;
    let bench = BenchConfiguration::from_value(&value)
        .map_err(ValidationError::from)
        .with_context(|| format!("invalid benchmark in {}", path.display()))?;
    Ok(bench)
}

fn run_benchmark(
    snapshot: &Path,
    options: &OptionArgs,
    format: Option<&str>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let config = MacrobenchConfig::discover()?;
    let format: OutputFormat = format
        .unwrap_or(&config.output.format)
        .parse()
        .map_err(anyhow::Error::msg)?;
    let harness = harness(&config)?;
    let bench = load_bench(snapshot, &harness)?;
    let options = options.load()?;

    let results = harness.run(&bench, &options)?;

    let rendered = match format {
        OutputFormat::Json => generate_json_report(&results)?,
        OutputFormat::Human => format_human_output(&results),
    };
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "results written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{rendered}")?;
        }
    }
    Ok(())
}

fn check_benchmark(snapshot: &Path, options: &OptionArgs) -> anyhow::Result<()> {
    let config = MacrobenchConfig::discover()?;
    let harness = harness(&config)?;
    let bench = load_bench(snapshot, &harness)?;
    let spec = harness.plan(&options.load()?)?;
    print!("{}", describe_plan(&spec, &bench));
    Ok(())
}

fn init_config(force: bool) -> anyhow::Result<()> {
    let path = PathBuf::from(CONFIG_FILE);
    if path.exists() && !force {
        anyhow::bail!("{CONFIG_FILE} already exists, pass --force to overwrite");
    }
    std::fs::write(&path, MacrobenchConfig::default_toml())
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Text printed by `macrobench check`.
pub fn describe_plan(spec: &RunSpec, bench: &BenchConfiguration) -> String {
    let mut out = String::new();
    out.push_str("Macrobench Plan:\n");
    for (key, code) in bench.entries() {
        out.push_str(&format!(
            "  {key:<15} {}\n",
            macrobench_core::snapshot::encode_macro(code)
        ));
    }
    let modes: Vec<String> = spec
        .mode()
        .concrete_modes()
        .iter()
        .map(|m| m.name().to_string())
        .collect();
    out.push_str(&format!("  modes           {}\n", modes.join(", ")));
    if spec.forks() == 0 {
        out.push_str("  forks           0 (in-process)\n");
    } else {
        out.push_str(&format!(
            "  forks           {} (+{} warmup)\n",
            spec.forks(),
            spec.warmup_forks()
        ));
    }
    out.push_str(&format!(
        "  warmup          {} x {} (batch {}, {})\n",
        spec.warmup_iterations(),
        format_duration(spec.warmup_time()),
        spec.warmup_batch_size(),
        spec.warmup_mode_name()
    ));
    out.push_str(&format!(
        "  measurement     {} x {} (batch {})\n",
        spec.measurement_iterations(),
        format_duration(spec.measurement_time()),
        spec.measurement_batch_size()
    ));
    out.push_str(&format!(
        "  ops/invocation  {}\n  time unit       {}\n",
        spec.operations_per_invocation(),
        spec.time_unit()
    ));
    if !spec.profilers().is_empty() {
        out.push_str(&format!("  profilers       {}\n", spec.profilers().join(", ")));
    }
    let flags = spec.launch_flags();
    if !flags.is_empty() {
        out.push_str(&format!("  launch flags    {}\n", flags.join(" ")));
    }
    out
}
