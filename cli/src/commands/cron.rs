use anyhow::Result;
use api::SgroupsService;
use scheduler::Scheduler;
use sgroups::Config;
use tracing::info;

/// Synchronize remote groups until interrupted
pub async fn execute(config: Config) -> Result<()> {
    let service = SgroupsService::connect(config).await?;
    let scheduler = Scheduler::new(
        service.config().clone(),
        service.cache().clone(),
        service.engine().clone(),
    );
    tokio::select! {
        result = scheduler.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupted, stopping cron"),
    }
    Ok(())
}
