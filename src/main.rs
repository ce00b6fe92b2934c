use clap::Parser;

use labbench::cli::{run, Cli};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}
