use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{extract::State, http::header, response::IntoResponse};
use forecast_core::Rejection;

use crate::state::AppState;

/// Submission counters, rendered in Prometheus text format.
#[derive(Debug, Default)]
pub struct Counters {
    submitted: AtomicU64,
    accepted: AtomicU64,
    flagged: AtomicU64,
    invalid: AtomicU64,
    conflict: AtomicU64,
    rate_limited: AtomicU64,
    unknown_instrument: AtomicU64,
    price_unavailable: AtomicU64,
    internal: AtomicU64,
}

impl Counters {
    pub fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self, flagged: bool) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        if flagged {
            self.flagged.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn rejected(&self, r: &Rejection) {
        let c = match r {
            Rejection::Invalid(_) => &self.invalid,
            Rejection::Conflict => &self.conflict,
            Rejection::RateLimited { .. } => &self.rate_limited,
            Rejection::UnknownInstrument(_) => &self.unknown_instrument,
            Rejection::PriceUnavailable(_) => &self.price_unavailable,
            Rejection::Store(_) => &self.internal,
        };
        c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render(&self) -> String {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let mut out = String::new();
        for (name, help, c) in [
            ("submitted", "Prediction submissions received", &self.submitted),
            ("accepted", "Predictions stored", &self.accepted),
            ("flagged", "Predictions stored with an abuse flag", &self.flagged),
        ] {
            counter_header(&mut out, name, help);
            let _ = writeln!(out, "forecast_predictions_{name}_total {}", load(c));
        }
        counter_header(&mut out, "rejected", "Submissions refused, by reason");
        for (reason, c) in [
            ("invalid", &self.invalid),
            ("conflict", &self.conflict),
            ("rate_limited", &self.rate_limited),
            ("unknown_instrument", &self.unknown_instrument),
            ("price_unavailable", &self.price_unavailable),
            ("internal", &self.internal),
        ] {
            let _ = writeln!(
                out,
                "forecast_predictions_rejected_total{{reason=\"{reason}\"}} {}",
                load(c)
            );
        }
        out
    }
}

fn counter_header(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP forecast_predictions_{name}_total {help}");
    let _ = writeln!(out, "# TYPE forecast_predictions_{name}_total counter");
}

pub async fn get(State(state): State<AppState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], state.counters.render())
}
