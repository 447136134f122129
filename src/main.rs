use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::Path;
use std::process;

use kat::error::Error;
use kat::printer;
use kat::repl::Repl;
use kat::vm::Vm;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "kat")]
#[command(version = VERSION)]
#[command(about = "A minimal Scheme interpreter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive REPL (the default)
    Repl,

    /// Evaluate a source file and print the last result
    Run {
        /// Path to the source file
        file: String,
    },
}

fn run_file(path: &str) -> Result<(), Error> {
    let vm = Vm::new();
    let result = vm.load_path(Path::new(path))?;
    println!("{}", printer::to_string(&vm.heap, result));
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Repl) | None => Repl::new().run(),
        Some(Commands::Run { file }) => {
            if let Err(e) = run_file(&file) {
                eprintln!("{}", e.to_string().red());
                process::exit(1);
            }
        }
    }
}
