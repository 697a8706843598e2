//! Correctness rules, applied once at evaluation time.

use crate::model::{Direction, Forecast};

/// Judges a forecast against the baseline captured at admission.
///
/// Direction calls need a strict move the right way; a flat close is wrong
/// for both `up` and `down`. Price targets use the crossing rule: the target
/// sets the implied direction relative to the baseline and the close must be
/// at or beyond it.
pub fn judge(forecast: &Forecast, initial_price: f64, actual_price: f64) -> bool {
    match *forecast {
        Forecast::Direction { direction } => match direction {
            Direction::Up => actual_price > initial_price,
            Direction::Down => actual_price < initial_price,
        },
        Forecast::Price { target_price } => {
            if target_price >= initial_price {
                actual_price >= target_price
            } else {
                actual_price <= target_price
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(d: Direction) -> Forecast {
        Forecast::Direction { direction: d }
    }

    fn target(p: f64) -> Forecast {
        Forecast::Price { target_price: p }
    }

    #[test]
    fn direction_calls() {
        assert!(judge(&dir(Direction::Up), 100.0, 105.0));
        assert!(!judge(&dir(Direction::Up), 100.0, 95.0));
        assert!(judge(&dir(Direction::Down), 100.0, 95.0));
        assert!(!judge(&dir(Direction::Down), 100.0, 105.0));
    }

    #[test]
    fn flat_close_is_wrong_either_way() {
        assert!(!judge(&dir(Direction::Up), 100.0, 100.0));
        assert!(!judge(&dir(Direction::Down), 100.0, 100.0));
    }

    #[test]
    fn upside_target_must_be_reached() {
        assert!(judge(&target(110.0), 100.0, 112.0));
        assert!(judge(&target(110.0), 100.0, 110.0));
        assert!(!judge(&target(110.0), 100.0, 105.0));
    }

    #[test]
    fn downside_target_must_be_reached() {
        assert!(judge(&target(90.0), 100.0, 85.0));
        assert!(judge(&target(90.0), 100.0, 90.0));
        assert!(!judge(&target(90.0), 100.0, 95.0));
    }

    #[test]
    fn target_at_baseline_counts_as_upside() {
        assert!(judge(&target(100.0), 100.0, 100.0));
        assert!(!judge(&target(100.0), 100.0, 99.0));
    }
}
