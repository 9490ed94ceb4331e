use clap::Parser;
use terraplan_server::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Cli::parse().resolve()?;

    log::info!("[terraplan] db at {}", config.db_path.display());
    log::info!("[terraplan] server listening on http://{}", config.addr);
    terraplan_server::serve(config).await
}
