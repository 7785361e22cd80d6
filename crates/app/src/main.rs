mod args;
mod logging;
mod op;
mod ops;
mod state;
mod version;

use anyhow::Context as _;
use args::Args;
use clap::{Parser, Subcommand};
use op::Op;
use ops::{Cp, Keygen, Version};

command_enum! {
    (Cp, Cp),
    (Keygen, Keygen),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let ctx = match op::OpContext::load(args.config_path.clone())
        .with_context(|| "failed to load crabfs config")
    {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    logging::init_logging(ctx.state.config.log_level());

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
