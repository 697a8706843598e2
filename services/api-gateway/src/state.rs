use std::sync::Arc;

use forecast_core::auth::JwtAuth;
use forecast_core::store::{PredictionStore, ReputationLedger};
use forecast_core::AdmissionController;

use crate::cache::StatsCache;
use crate::routes::metrics::Counters;

#[derive(Clone)]
pub struct AppState {
    pub admission: AdmissionController,
    pub store: Arc<dyn PredictionStore>,
    pub ledger: Arc<dyn ReputationLedger>,
    pub jwt: Arc<JwtAuth>,
    pub stats_cache: StatsCache,
    pub counters: Arc<Counters>,
}
