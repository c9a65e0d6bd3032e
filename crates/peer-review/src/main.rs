use anyhow::Result;
use clap::Parser;

use peer_review::cli::{self, Cli};
use peer_review::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);
    cli::run(cli).await
}
