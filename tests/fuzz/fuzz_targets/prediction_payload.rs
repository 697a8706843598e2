#![no_main]
use forecast_core::model::PredictionPayload;
use libfuzzer_sys::fuzz_target;

// Arbitrary request bodies must either fail to parse or validate/reject
// cleanly; an accepted payload must stay inside the documented bounds.
fuzz_target!(|data: &[u8]| {
    let Ok(payload) = serde_json::from_slice::<PredictionPayload>(data) else {
        return;
    };
    if let Ok(valid) = payload.validate() {
        assert!(!valid.instrument_id.is_empty());
        let id_chars = valid.instrument_id.chars().count();
        assert!(id_chars <= forecast_core::model::MAX_INSTRUMENT_ID_CHARS);
        if let Some(r) = &valid.reasoning {
            assert!(r.chars().count() <= forecast_core::model::MAX_REASONING_CHARS);
        }
        if let Some(t) = valid.forecast.target_price() {
            assert!(t.is_finite() && t > 0.0);
        }
    }
});
