pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "crabfs")]
#[command(about = "Copy files in and out of crabfs")]
pub struct Args {
    /// Path to the crabfs config directory (defaults to ~/.crabfs)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
