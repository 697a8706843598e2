use forecast_core::{EvaluationScheduler, TickReport};
use tracing::{info, warn};

pub async fn run(scheduler: &EvaluationScheduler) -> anyhow::Result<TickReport> {
    let report = scheduler.tick().await?;
    if report.due > 0 {
        info!(
            due = report.due,
            committed = report.committed,
            correct = report.correct,
            lost_races = report.lost_races,
            "evaluate task executed"
        );
    }
    let failures = report.price_failures + report.store_failures;
    if failures > 0 {
        warn!(
            price_failures = report.price_failures,
            store_failures = report.store_failures,
            "some due predictions were skipped and stay pending"
        );
    }
    if report.reputation_failures > 0 || report.notify_failures > 0 {
        warn!(
            reputation_failures = report.reputation_failures,
            notify_failures = report.notify_failures,
            "evaluated with side-effect failures"
        );
    }
    Ok(report)
}
