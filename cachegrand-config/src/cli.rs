//! The one externally visible CLI flag: `--config <path>`. Everything
//! else is config-file driven, grounded on the retrieval pack's own
//! `clap` derive usage for single-purpose binaries.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "cachegrand", about = "A single-node, multi-threaded, RESP-compatible key-value store")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short = 'c')]
    pub config: PathBuf,

    /// Run in the foreground instead of daemonizing.
    #[arg(long)]
    pub foreground: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
