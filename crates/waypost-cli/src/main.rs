//! `waypost` binary entry point.

use clap::Parser;
use waypost_cli::{CliArgs, WaypostCli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    WaypostCli::from_args("waypost", &args)?.run(args).await
}
