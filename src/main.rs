use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use wam_resolution::{Clause, EngineError, MachineConfig, ResolutionEngine, Solutions};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
  /// Program files to consult, in order.
  files: Vec<PathBuf>,

  /// The query to run, e.g. "member(X, [1, 2, 3])".
  #[arg(short = 'q', long)]
  query: Option<String>,

  /// Prints the byte-code of every loaded predicate.
  #[arg(short = 'd', long)]
  disassemble: bool,

  /// Refuses bindings that would create cyclic terms.
  #[arg(long)]
  occurs_check: bool,
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  match run_cli() {
    Ok(()) => ExitCode::SUCCESS,
    Err(message) => {
      eprintln!("{}", message);
      ExitCode::FAILURE
    }
  }
}

fn run_cli() -> Result<(), String> {
  let cli = Cli::parse();
  let config = MachineConfig::default().with_occurs_check(cli.occurs_check);
  let mut engine = ResolutionEngine::with_config(config).map_err(|e| e.to_string())?;

  let mut directives: Vec<Clause> = Vec::new();
  for path in cli.files.iter() {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    match engine.consult(&text) {
      Ok(queries) => directives.extend(queries),
      // The clauses without errors are loaded; report the rest and carry on.
      Err(EngineError::Compile(errors)) => {
        for e in errors {
          error!(file = %path.display(), "{}", e);
        }
      }
      Err(e) => return Err(format!("{}: {}", path.display(), e)),
    }
  }

  if cli.disassemble {
    println!("{}", engine.disassemble().map_err(|e| e.to_string())?);
  }

  for directive in directives.iter() {
    print_solutions(engine.query_clause(directive).map_err(|e| e.to_string())?)?;
  }
  if let Some(query) = cli.query.as_deref() {
    print_solutions(engine.query(query).map_err(|e| e.to_string())?)?;
  }
  Ok(())
}

fn print_solutions(solutions: Solutions) -> Result<(), String> {
  let mut found = false;
  for solution in solutions {
    let solution = solution.map_err(|e| e.to_string())?;
    found = true;
    println!("{}.", solution);
  }
  if !found {
    println!("false.");
  }
  Ok(())
}
