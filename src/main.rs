use clap::Parser;
use log::error;
use sqlflow_rust::cli::{self, Cli};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).format_timestamp_millis()
                                                                                       .init();
    let cli = Cli::parse();
    if let Err(e) = cli::run(cli).await {
        error!("sqlflow: {}", e);
        std::process::exit(e.exit_code());
    }
}
