use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;

/// Compile a source file into a FASM x86-32 assembly listing.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Arguments {
  /// Source file to compile.
  path: PathBuf,

  /// Write the listing here instead of standard output.
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// Increase log verbosity (-v: debug, -vv: trace).
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

fn main() {
  let args = Arguments::parse();
  let level = match args.verbose {
    0 => LevelFilter::Warn,
    1 => LevelFilter::Debug,
    _ => LevelFilter::Trace,
  };
  SimpleLogger::new().with_level(level).init().unwrap();

  let source = match fs::read_to_string(&args.path) {
    Ok(source) => source,
    Err(err) => {
      eprintln!("error: cannot read {}: {err}", args.path.display());
      process::exit(1);
    }
  };

  let file_name = args.path.display().to_string();
  let listing = match facc::compile(&source, &file_name) {
    Ok(listing) => listing,
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  };

  match args.output {
    Some(path) => {
      if let Err(err) = fs::write(&path, listing) {
        eprintln!("error: cannot write {}: {err}", path.display());
        process::exit(1);
      }
    }
    None => print!("{listing}"),
  }
}
