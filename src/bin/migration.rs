use anyhow::Context;
use storefront_api::{config, db};
use tracing::info;

/// Applies pending migrations against the configured database and exits.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    db::run_migrations(&pool)
        .await
        .context("migrations failed")?;

    info!("Database is up to date");
    Ok(())
}
