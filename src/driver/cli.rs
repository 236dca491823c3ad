//! Command-line interface of the `mcc` binary.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mcc", about = "A small C compiler targeting x86-64")]
pub struct Cli {
    /// Input C source file
    pub input: PathBuf,

    /// Write assembly to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print the relocation table to stderr after compilation
    #[arg(long)]
    pub relocs: bool,

    /// Dump the parsed object table instead of generating code
    #[arg(long)]
    pub dump_ast: bool,

    /// Verbose progress output
    #[arg(short, long)]
    pub verbose: bool,
}
