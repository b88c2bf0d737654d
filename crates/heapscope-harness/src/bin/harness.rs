//! CLI entrypoint for the heapscope load harness.

use clap::{Parser, Subcommand, ValueEnum};
use heapscope_core::PipelineConfig;
use heapscope_harness::{WorkloadSpec, run_simulation};
use tracing_subscriber::EnvFilter;

/// Load and configuration tooling for heapscope.
#[derive(Debug, Parser)]
#[command(name = "heapscope-harness")]
#[command(about = "Synthetic load harness for the heapscope telemetry pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Markdown,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Drive a pipeline with synthetic producer threads and print a report.
    Simulate {
        /// Producer thread count.
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Allocations per producer thread.
        #[arg(long, default_value_t = 100_000)]
        allocs: u64,
        /// Startup option string (e.g. "sampling=10,capacity=4096").
        #[arg(long, default_value = "")]
        options: String,
        /// Probability of a free after each allocation.
        #[arg(long, default_value_t = 0.5)]
        free_ratio: f64,
        /// GC cycle period in allocations of the first producer (0 = never).
        #[arg(long, default_value_t = 10_000)]
        gc_every: u64,
        /// Distinct synthetic types.
        #[arg(long, default_value_t = 32)]
        types: u64,
        /// Workload seed (decimal or 0x...).
        #[arg(long, default_value = "0xDEAD_BEEF")]
        seed: String,
        /// Output format.
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// Print the configuration an option string resolves to.
    Options {
        /// Option string; falls back to HEAPSCOPE_OPTIONS when omitted.
        options: Option<String>,
    },
}

fn parse_seed(raw: &str) -> Result<u64, std::num::ParseIntError> {
    let cleaned = raw.replace('_', "");
    match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            threads,
            allocs,
            options,
            free_ratio,
            gc_every,
            types,
            seed,
            format,
        } => {
            let spec = WorkloadSpec {
                threads,
                allocs_per_thread: allocs,
                free_ratio,
                gc_every,
                type_count: types,
                seed: parse_seed(&seed)?,
            };
            let report = run_simulation(PipelineConfig::from_options(&options), &spec)?;
            match format {
                Format::Json => println!("{}", report.to_json()),
                Format::Markdown => print!("{}", report.to_markdown()),
            }
            if report.handles_promoted != report.handles_released {
                return Err(format!(
                    "handle leak: {} promoted, {} released",
                    report.handles_promoted, report.handles_released
                )
                .into());
            }
        }
        Command::Options { options } => {
            let config = match options {
                Some(options) => PipelineConfig::from_options(&options),
                None => PipelineConfig::from_env(),
            };
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
