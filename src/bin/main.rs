use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use vistore::cli::Cli;

#[tokio::main]
pub async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::from_args() {
        Cli::Run(run) => run.run().await,
        Cli::Query(query) => query.run().await,
    }
}
