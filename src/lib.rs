pub mod badges;
pub mod cli;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod model;
pub mod net;
pub mod persistence;
pub mod probes;
pub mod scanner;
pub mod topology;

use anyhow::Result;

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();
}

pub async fn run() -> Result<()> {
    init_logging();
    cli::run().await
}
