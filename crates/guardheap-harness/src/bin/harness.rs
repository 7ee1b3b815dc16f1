//! CLI entrypoint for the guardheap harness.

use clap::{Parser, Subcommand};
use guardheap::diagnostics::sink_for;
use guardheap::{FatalPolicy, ReportFormat};
use guardheap_harness::{Scenario, StressConfig, run_scenario, run_stress};

/// Defect scenarios and stress runs for guardheap.
#[derive(Debug, Parser)]
#[command(name = "guardheap-harness")]
#[command(about = "Defect scenarios and stress runs for guardheap")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one named defect scenario and print its diagnostics to stdout.
    Scenario {
        /// Scenario name (clean, overflow, double-release, foreign-release,
        /// null-release, leak, realloc, or `all`).
        name: String,
        /// Diagnostic format (`text` or `jsonl`).
        #[arg(long, default_value = "text")]
        format: String,
        /// Abort the process on the first defect, like a real deployment.
        #[arg(long)]
        abort: bool,
    },
    /// Run a deterministic allocate/reallocate/release sequence.
    Stress {
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0xDEAD_BEEF")]
        seed: String,
        /// Number of operations to run.
        #[arg(long, default_value_t = 10_000)]
        steps: usize,
        /// Number of user handles the sequence juggles.
        #[arg(long, default_value_t = 64)]
        slots: usize,
    },
}

fn parse_seed(raw: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let cleaned = raw.trim().replace('_', "");
    let seed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => cleaned.parse()?,
    };
    Ok(seed)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Scenario {
            name,
            format,
            abort,
        } => {
            let format = ReportFormat::from_str_loose(&format);
            let policy = if abort {
                FatalPolicy::Abort
            } else {
                FatalPolicy::Return
            };
            let scenarios = if name.eq_ignore_ascii_case("all") {
                Scenario::ALL.to_vec()
            } else {
                vec![Scenario::from_name(&name)?]
            };

            let mut failed = 0_usize;
            for scenario in scenarios {
                let outcome = run_scenario(scenario, policy, sink_for(format, std::io::stdout()));
                eprintln!(
                    "scenario {}: expected={:?} observed={:?} leaks={} passed={}",
                    scenario.name(),
                    outcome.expected,
                    outcome.observed,
                    outcome.leaks,
                    outcome.passed()
                );
                if let Err(err) = outcome.into_result() {
                    eprintln!("{err}");
                    failed += 1;
                }
            }
            if failed > 0 {
                return Err(format!("{failed} scenario(s) did not behave as expected").into());
            }
        }
        Command::Stress { seed, steps, slots } => {
            let config = StressConfig {
                seed: parse_seed(&seed)?,
                steps,
                slots,
            };
            eprintln!(
                "Running {} steps over {} slots (seed {:#x})",
                config.steps, config.slots, config.seed
            );
            let report = run_stress(&config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
