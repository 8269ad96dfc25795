//! Command line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Config file (defaults to $SCRIPTPAD_CONFIG or ~/.scriptpad/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile and run a script file, streaming its output
    Run {
        file: PathBuf,
        /// Run this code instead of the file's body
        #[arg(long)]
        code: Option<String>,
    },
    /// Compile a script file and print its diagnostics
    Compile { file: PathBuf },
    /// Print the effective configuration
    Config,
}
