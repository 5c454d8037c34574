//! stepc CLI
//!
//! Development driver for compiling and running a single `.stc` source
//! file. Not the public façade the core is built around (that's
//! `stepc_compiler::compile` plus `stepc_vm::Vm` used as a library); this
//! binary exists so the pipeline can be exercised from a shell.

use clap::Parser as ClapParser;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "stepc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile and run a stepc source file", long_about = None)]
struct Cli {
    /// Input source file
    input: PathBuf,

    /// Stack capacity for the VM
    #[arg(long, default_value_t = 2048)]
    stack_capacity: usize,

    /// Print each instruction as it executes
    #[arg(long)]
    trace: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_directive = if cli.trace { "stepc=trace" } else { "stepc=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_directive.parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let source = match std::fs::read_to_string(&cli.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading {}: {}", cli.input.display(), e);
            process::exit(1);
        }
    };

    let instructions = match stepc_compiler::compile(&source) {
        Ok(instructions) => instructions,
        Err(e) => {
            eprintln!("Compile error: {e}");
            process::exit(1);
        }
    };

    let config = stepc_vm::VmConfig::new().with_stack_capacity(cli.stack_capacity);
    let mut vm = stepc_vm::Vm::with_config(instructions, config);

    match vm.run_to_end() {
        Ok(Some(value)) => println!("{value}"),
        Ok(None) => {}
        Err(e) => {
            eprintln!("Runtime error: {e}");
            process::exit(1);
        }
    }
}
