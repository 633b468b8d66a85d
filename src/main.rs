use anyhow::Result;
use tracing_subscriber::EnvFilter;

use hark::{run_cli, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG 优先，其次配置文件中的 log.level
    let level = Config::load_default()
        .map(|config| config.log.level)
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    run_cli().await
}
