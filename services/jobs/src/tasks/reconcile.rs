use forecast_core::evaluation::ReconcileReport;
use forecast_core::EvaluationScheduler;
use tracing::{debug, warn};

pub async fn run(scheduler: &EvaluationScheduler) -> anyhow::Result<ReconcileReport> {
    let report = scheduler.reconcile().await?;
    debug!(scanned = report.scanned, applied = report.applied, "reconcile task executed");
    if report.failures > 0 {
        warn!(failures = report.failures, "reputation reconcile incomplete");
    }
    Ok(report)
}
