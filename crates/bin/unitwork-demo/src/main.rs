use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use unitwork_app::Cancellation;
use unitwork_demo::config::Config;
use unitwork_demo::demo::Walkthrough;
use unitwork_demo::model;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();

    // Database
    let db = config.storage().build().await?;
    let registry = model::registry();
    registry.validate()?;
    let registry = Arc::new(registry);
    let engine = db.engine(&registry);

    let report = Walkthrough::new(engine, registry, config.unit_of_work.committer.clone())
        .with_options(config.unit_of_work_options())
        .run(&Cancellation::none())
        .await?;

    tracing::info!(
        created = report.created.total(),
        reconciled = report.reconciled.total(),
        removed = report.removed.total(),
        skus = ?report.skus,
        "walkthrough complete"
    );
    Ok(())
}
