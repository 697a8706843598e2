use std::time::Duration;

use forecast_core::EvaluationScheduler;
use tracing::{info, warn};

use crate::tasks;

/// Runs evaluation every `interval` and reputation reconcile every
/// `reconcile_every` cycles until ctrl-c. Task errors are logged and the
/// next cycle retries.
pub async fn run_loop(
    scheduler: EvaluationScheduler,
    interval: Duration,
    reconcile_every: u32,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut cycle: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                return Ok(());
            }
        }

        if let Err(e) = tasks::evaluate::run(&scheduler).await {
            warn!(error=%e, "evaluate task failed");
        }
        if cycle % u64::from(reconcile_every.max(1)) == 0 {
            if let Err(e) = tasks::reconcile::run(&scheduler).await {
                warn!(error=%e, "reconcile task failed");
            }
        }
        cycle += 1;
    }
}
