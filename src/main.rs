mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use core_runtime::logging::{init_logging, LoggingConfig};

use cli::{Cli, Command};

#[core_async::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::default().with_level(cli.log_level);
    if let Some(format) = cli.log_format {
        logging = logging.with_format(format);
    }
    if let Some(filter) = cli.log_filter {
        logging = logging.with_filter(filter);
    }
    init_logging(logging)?;

    match cli.command {
        Command::Run(args) => commands::run(args).await,
        Command::Discover(args) => commands::discover(args).await,
        Command::Status(args) => commands::status(args).await,
        Command::Reset {
            collection,
            database,
        } => commands::reset(&collection, database).await,
    }
}
