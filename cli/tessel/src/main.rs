//! Tessel CLI: compile dataflow maps into native modules.

mod commands;
mod config;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tessel", version, about = "Compile dataflow maps into native code")]
struct Cli {
    /// Log compile phases (equivalent to RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that compiles a map.
#[derive(clap::Args)]
struct CompileArgs {
    /// Map to compile (JSON)
    map: PathBuf,
    /// Compiler parameters (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Module name, also the prefix of the generated API functions
    #[arg(long)]
    module_name: Option<String>,
    /// Name of the generated predict function
    #[arg(long)]
    function_name: Option<String>,
    /// Instrument the module with performance counters
    #[arg(long)]
    profile: bool,
    /// Target device (host, pi3, aarch64, cortex-m4)
    #[arg(long)]
    target: Option<String>,
    /// Print each node as it runs
    #[arg(long)]
    diagnostics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a map and write the requested artifacts
    Compile {
        #[command(flatten)]
        args: CompileArgs,
        /// Artifacts to write (ir, header, json, llvm-ir, bitcode, object)
        #[arg(long, value_delimiter = ',', default_value = "ir,header")]
        emit: Vec<String>,
        /// Output directory (default: current directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Compile a map and run it on the reference interpreter
    Run {
        #[command(flatten)]
        args: CompileArgs,
        /// Input values, comma separated
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        input: Vec<f64>,
    },
    /// Describe a map before and after refinement
    Inspect {
        /// Map to inspect (JSON)
        map: PathBuf,
        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Manage target devices
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },
}

#[derive(Subcommand)]
enum TargetAction {
    /// List the built-in target devices
    List,
    /// Show the settings of one target device
    Describe {
        /// Device name
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Compile {
            args,
            emit,
            output_dir,
        } => {
            let parameters = config::resolve_parameters(&args)?;
            let output_dir = match output_dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            commands::compile::run(&args.map, parameters, &emit, &output_dir)
        }
        Commands::Run { args, input } => {
            let parameters = config::resolve_parameters(&args)?;
            commands::run::run(&args.map, parameters, &input)
        }
        Commands::Inspect { map, format } => commands::inspect::run(&map, &format),
        Commands::Target { action } => match action {
            TargetAction::List => commands::target::list(),
            TargetAction::Describe { name } => commands::target::describe(&name),
        },
    }
}
