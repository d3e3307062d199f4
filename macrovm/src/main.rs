//! macrovm CLI

use clap::{Parser, Subcommand};
use macrovm::{DocumentId, EngineConfig, Exec, Runtime, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "macrovm", version, about = "Bytecode VM for editor macros")]
struct Cli {
    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Instructions per time slice, overriding the configuration
    #[arg(long, global = true)]
    quantum: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble and run a listing
    Run {
        /// Listing file
        file: PathBuf,
        /// Arguments passed to the main program as strings
        args: Vec<String>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the disassembly of every program in a listing
    Disasm {
        /// Listing file
        file: PathBuf,
    },
    /// Assemble a listing and report errors only
    Check {
        /// Listing file
        file: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("macrovm=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref(), cli.quantum).and_then(|config| match cli.command {
        Command::Run { file, args, json } => run_file(&file, args, json, config),
        Command::Disasm { file } => disasm_file(&file, config),
        Command::Check { file } => check_file(&file, config),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(
    path: Option<&Path>,
    quantum: Option<usize>,
) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(quantum) = quantum {
        config.quantum = quantum.max(1);
    }
    Ok(config)
}

/// Assemble `path`, rendering assembler errors against the listing
fn assemble_file(
    rt: &mut Runtime,
    path: &Path,
) -> Result<macrovm::Assembly, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let filename = path.display().to_string();
    match rt.assemble(&source) {
        Ok(assembly) => Ok(assembly),
        Err(e) => {
            macrovm::error::report_error(&filename, &source, &e);
            Err(e.into())
        }
    }
}

fn run_file(
    path: &Path,
    args: Vec<String>,
    json: bool,
    config: EngineConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rt = Runtime::with_config(config);
    let assembly = assemble_file(&mut rt, path)?;
    let args: Vec<Value> = args.iter().map(|a| rt.heap.string_value(a)).collect();

    let mut exec = rt.execute(&assembly.main, args, DocumentId(0));
    let mut slices = 1usize;
    let result = loop {
        exec = match exec {
            Exec::Done(value) => break Ok(value),
            Exec::Error(e) => break Err(e),
            Exec::TimeLimit(k) | Exec::Preempted(k) => {
                slices += 1;
                rt.resume(k)
            }
        };
    };
    debug!(slices, "run finished");

    let output = rt.take_output();
    if !output.is_empty() {
        print!("{}", String::from_utf8_lossy(&output));
    }
    let value = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&value.to_json(&rt.heap))?);
    } else if value.is_set() {
        println!("{}", value.render(&rt.heap));
    }
    if let Some(stats) = rt.maybe_collect() {
        info!(freed = stats.strings_freed + stats.nodes_freed, "collected after run");
    }
    Ok(())
}

fn disasm_file(path: &Path, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut rt = Runtime::with_config(config);
    let assembly = assemble_file(&mut rt, path)?;
    for (name, program) in &assembly.macros {
        println!(".macro {name}");
        print!("{}", program.disasm(&rt.symbols, &rt.heap));
        println!(".end\n");
    }
    print!("{}", assembly.main.disasm(&rt.symbols, &rt.heap));
    Ok(())
}

fn check_file(path: &Path, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut rt = Runtime::with_config(config);
    let assembly = assemble_file(&mut rt, path)?;
    println!(
        "✓ {} assembles: {} words, {} macro(s)",
        path.display(),
        assembly.main.len(),
        assembly.macros.len()
    );
    Ok(())
}
