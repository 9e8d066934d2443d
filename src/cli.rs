use crate::config::loader::EngineConfig;
use crate::config::types::LimitOverride;
use crate::core::engine::Engine;
use crate::core::types::{Operation, Response};
use crate::judge::compare::CompareOptions;
use crate::judge::pipeline::{JudgeRequest, TestCase};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: $OIBOX_CONFIG, then ./config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a C++ source file into the managed tree
    Compile {
        /// Source file to compile
        #[arg(long)]
        source: PathBuf,
        /// Logical program name
        #[arg(long)]
        name: Option<String>,
    },
    /// Run a previously compiled binary
    Run {
        /// Binary path returned by `compile`
        #[arg(long)]
        binary: PathBuf,
        /// File fed to stdin (empty stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,
        #[command(flatten)]
        limits: LimitArgs,
    },
    /// Compare two output files line by line
    Compare {
        #[arg(long)]
        actual: PathBuf,
        #[arg(long)]
        expected: PathBuf,
        /// Treat whitespace as significant
        #[arg(long)]
        strict_whitespace: bool,
        #[arg(long)]
        ignore_case: bool,
    },
    /// Run a binary under the debugger with a batch script
    Debug {
        #[arg(long)]
        binary: PathBuf,
        /// Debugger script (built-in backtrace script when omitted)
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Compile once and run every input, checking expected outputs
    Judge {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        name: Option<String>,
        /// Input files, one case each
        #[arg(long = "input", value_name = "FILE")]
        inputs: Vec<PathBuf>,
        /// Expected output files, matched to inputs by position
        #[arg(long = "expected", value_name = "FILE")]
        expected: Vec<PathBuf>,
        #[command(flatten)]
        limits: LimitArgs,
        #[arg(long)]
        strict_whitespace: bool,
        #[arg(long)]
        ignore_case: bool,
    },
    /// Handle one JSON operation and print the JSON response
    Handle {
        /// Request file, or `-` for stdin
        #[arg(long, default_value = "-")]
        request: String,
    },
    /// Remove managed files older than the retention period
    Cleanup {
        /// Override the configured retention
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
    /// Check that the compiler and debugger are installed
    CheckDeps {
        /// Show tool versions
        #[arg(long, short)]
        verbose: bool,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[derive(clap::Args, Debug, Default)]
struct LimitArgs {
    /// Time limit in milliseconds
    #[arg(long)]
    time_ms: Option<u64>,
    /// Memory limit in MB
    #[arg(long)]
    memory_mb: Option<u64>,
    /// Captured stdout limit in bytes
    #[arg(long)]
    output_bytes: Option<u64>,
}

impl From<LimitArgs> for LimitOverride {
    fn from(args: LimitArgs) -> Self {
        LimitOverride {
            time_limit_ms: args.time_ms,
            memory_limit_mb: args.memory_mb,
            output_limit_bytes: args.output_bytes,
        }
    }
}

fn compare_options(strict_whitespace: bool, ignore_case: bool) -> CompareOptions {
    CompareOptions {
        ignore_whitespace: !strict_whitespace,
        ignore_case,
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    if let Commands::ShowConfig = cli.command {
        return print_json(&config);
    }

    let engine = Engine::new(config)?;

    match cli.command {
        Commands::Compile { source, name } => {
            let text = read_text(&source)?;
            print_json(&engine.handle(Operation::Compile { source: text, name }))
        }
        Commands::Run {
            binary,
            input,
            limits,
        } => {
            let input = match input {
                Some(path) => read_text(&path)?,
                None => String::new(),
            };
            print_json(&engine.handle(Operation::Run {
                binary,
                input,
                limits: limits.into(),
            }))
        }
        Commands::Compare {
            actual,
            expected,
            strict_whitespace,
            ignore_case,
        } => print_json(&engine.handle(Operation::Compare {
            actual: read_text(&actual)?,
            expected: read_text(&expected)?,
            options: compare_options(strict_whitespace, ignore_case),
        })),
        Commands::Debug { binary, script } => {
            let script = script.as_deref().map(read_text).transpose()?;
            print_json(&engine.handle(Operation::Debug { binary, script }))
        }
        Commands::Judge {
            source,
            name,
            inputs,
            expected,
            limits,
            strict_whitespace,
            ignore_case,
        } => {
            if expected.len() > inputs.len().max(1) {
                anyhow::bail!(
                    "{} expected files given for {} inputs",
                    expected.len(),
                    inputs.len()
                );
            }
            let mut cases = Vec::new();
            for i in 0..inputs.len().max(1) {
                cases.push(TestCase {
                    input: match inputs.get(i) {
                        Some(path) => read_text(path)?,
                        None => String::new(),
                    },
                    expected: expected.get(i).map(|p| read_text(p)).transpose()?,
                });
            }
            let request = JudgeRequest {
                source: read_text(&source)?,
                name,
                cases,
                limits: limits.into(),
                compare: compare_options(strict_whitespace, ignore_case),
            };
            print_json(&engine.handle(Operation::Judge(request)))
        }
        Commands::Handle { request } => {
            let text = if request == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("Failed to read request from stdin")?;
                buf
            } else {
                read_text(Path::new(&request))?
            };
            let operation: Operation =
                serde_json::from_str(&text).context("Request is not a valid operation")?;
            let response = engine.handle(operation);
            print_json(&response)?;
            if let Response::Rejected { .. } = response {
                std::process::exit(2);
            }
            Ok(())
        }
        Commands::Cleanup { max_age_secs } => {
            let removed = engine.cleanup(max_age_secs.map(Duration::from_secs))?;
            print_json(&serde_json::json!({
                "root": engine.root(),
                "removed": removed,
            }))
        }
        Commands::CheckDeps { verbose } => check_dependencies(&engine, verbose),
        Commands::ShowConfig => print_json(engine.config()),
    }
}

fn check_dependencies(engine: &Engine, verbose: bool) -> Result<()> {
    println!("🔍 Checking toolchain...");
    println!();

    let report = engine.check_deps();
    for (label, probe) in [("Compiler", &report.compiler), ("Debugger", &report.debugger)] {
        if probe.available {
            println!("✅ {} ({}) - OK", label, probe.program);
            if verbose {
                if let Some(version) = &probe.version {
                    println!("  {}", version);
                }
            }
        } else {
            println!("❌ {} ({}) - MISSING", label, probe.program);
            if verbose {
                if let Some(error) = &probe.error {
                    println!("  {}", error);
                }
            }
        }
    }

    if report.temp_root_writable {
        println!("✅ Managed root {} - writable", report.temp_root.display());
    } else {
        println!("❌ Managed root {} - NOT writable", report.temp_root.display());
    }
    println!();

    if report.all_available() {
        println!("🎉 oibox is ready to use");
        Ok(())
    } else {
        println!("🔧 Install the missing tools, e.g.:");
        println!("   sudo apt install build-essential g++ gdb");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "oibox",
            "run",
            "--binary",
            "/tmp/x",
            "--time-ms",
            "250",
            "--memory-mb",
            "64",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { limits, input, .. } => {
                assert!(input.is_none());
                let limits = LimitOverride::from(limits);
                assert_eq!(limits.time_limit_ms, Some(250));
                assert_eq!(limits.memory_limit_mb, Some(64));
                assert_eq!(limits.output_limit_bytes, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_judge_collects_repeated_inputs() {
        let cli = Cli::try_parse_from([
            "oibox", "--config", "c.json", "judge", "--source", "a.cpp", "--input", "1.in",
            "--input", "2.in", "--expected", "1.out",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.json")));
        match cli.command {
            Commands::Judge {
                inputs, expected, ..
            } => {
                assert_eq!(inputs.len(), 2);
                assert_eq!(expected.len(), 1);
            }
            _ => panic!("expected judge"),
        }
    }

    #[test]
    fn test_strict_whitespace_flag() {
        assert!(compare_options(false, false).ignore_whitespace);
        assert!(!compare_options(true, false).ignore_whitespace);
    }
}
