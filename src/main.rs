mod cli;
mod logging;
mod model;
mod relay;
mod store;
#[cfg(feature = "tui")]
mod tui;
mod view;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_headless = args.command.is_some();

    cli::run(args).await?;
    // Headless runs may leave signalled children behind; don't wait on them.
    if is_headless {
        std::process::exit(0);
    }
    Ok(())
}
