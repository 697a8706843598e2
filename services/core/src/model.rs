use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Rejection;

pub const MAX_REASONING_CHARS: usize = 1000;
pub const MAX_INSTRUMENT_ID_CHARS: usize = 64;
/// Upper bound on rows returned by list queries.
pub const MAX_LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1m")]
    OneMonth,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Self::OneHour, Self::OneDay, Self::OneWeek, Self::OneMonth];

    pub fn duration(self) -> chrono::Duration {
        match self {
            Self::OneHour => chrono::Duration::hours(1),
            Self::OneDay => chrono::Duration::hours(24),
            Self::OneWeek => chrono::Duration::days(7),
            Self::OneMonth => chrono::Duration::days(30),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1m",
        }
    }
}

impl FromStr for Timeframe {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Self::OneHour),
            "1d" => Ok(Self::OneDay),
            "1w" => Ok(Self::OneWeek),
            "1m" => Ok(Self::OneMonth),
            other => Err(Rejection::Invalid(format!("invalid timeframe '{other}'"))),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl FromStr for Direction {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(Rejection::Invalid(format!("invalid direction '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionKind {
    Price,
    Direction,
}

impl PredictionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Direction => "direction",
        }
    }
}

/// What the user is calling. Holding the payload inside the variant keeps
/// `targetPrice` and `direction` mutually exclusive for the life of a record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Forecast {
    Price {
        #[serde(rename = "targetPrice")]
        target_price: f64,
    },
    Direction { direction: Direction },
}

impl Forecast {
    pub fn kind(&self) -> PredictionKind {
        match self {
            Self::Price { .. } => PredictionKind::Price,
            Self::Direction { .. } => PredictionKind::Direction,
        }
    }

    pub fn target_price(&self) -> Option<f64> {
        match self {
            Self::Price { target_price } => Some(*target_price),
            Self::Direction { .. } => None,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Price { .. } => None,
            Self::Direction { direction } => Some(*direction),
        }
    }

    /// Rebuilds a forecast from flat storage columns.
    pub fn from_columns(
        kind: &str,
        target_price: Option<f64>,
        direction: Option<&str>,
    ) -> Option<Self> {
        match (kind, target_price, direction) {
            ("price", Some(target_price), None) => Some(Self::Price { target_price }),
            ("direction", None, Some(d)) => {
                d.parse().ok().map(|direction| Self::Direction { direction })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Pending,
    Evaluated,
}

impl PredictionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Evaluated => "evaluated",
        }
    }
}

/// Untrusted submission body, exactly as the client sent it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionPayload {
    pub instrument_id: Option<String>,
    #[serde(alias = "predictionType")]
    pub kind: Option<String>,
    pub target_price: Option<f64>,
    pub direction: Option<String>,
    pub timeframe: Option<String>,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPayload {
    pub instrument_id: String,
    pub forecast: Forecast,
    pub timeframe: Timeframe,
    pub reasoning: Option<String>,
}

impl PredictionPayload {
    /// Shape checks first, then the timeframe. Nothing here touches storage.
    pub fn validate(&self) -> Result<ValidatedPayload, Rejection> {
        let instrument_id = self
            .instrument_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Rejection::Invalid("instrumentId is required".into()))?;
        if instrument_id.chars().count() > MAX_INSTRUMENT_ID_CHARS {
            return Err(Rejection::Invalid("instrumentId is too long".into()));
        }

        let forecast = match self.kind.as_deref() {
            Some("price") => {
                if self.direction.is_some() {
                    return Err(Rejection::Invalid(
                        "direction is not allowed for a price prediction".into(),
                    ));
                }
                let target_price = self.target_price.ok_or_else(|| {
                    Rejection::Invalid("targetPrice is required for a price prediction".into())
                })?;
                if !target_price.is_finite() || target_price <= 0.0 {
                    return Err(Rejection::Invalid("targetPrice must be a positive number".into()));
                }
                Forecast::Price { target_price }
            }
            Some("direction") => {
                if self.target_price.is_some() {
                    return Err(Rejection::Invalid(
                        "targetPrice is not allowed for a direction prediction".into(),
                    ));
                }
                let direction = self.direction.as_deref().ok_or_else(|| {
                    Rejection::Invalid("direction is required for a direction prediction".into())
                })?;
                let direction = direction.parse()?;
                Forecast::Direction { direction }
            }
            Some(other) => return Err(Rejection::Invalid(format!("invalid kind '{other}'"))),
            None => return Err(Rejection::Invalid("kind is required".into())),
        };

        let reasoning = self.reasoning.as_deref().map(str::trim).filter(|s| !s.is_empty());
        if reasoning.is_some_and(|r| r.chars().count() > MAX_REASONING_CHARS) {
            return Err(Rejection::Invalid(format!(
                "reasoning exceeds {MAX_REASONING_CHARS} characters"
            )));
        }

        let timeframe = self
            .timeframe
            .as_deref()
            .ok_or_else(|| Rejection::Invalid("timeframe is required".into()))?
            .parse()?;

        Ok(ValidatedPayload {
            instrument_id: instrument_id.to_string(),
            forecast,
            timeframe,
            reasoning: reasoning.map(str::to_string),
        })
    }
}

/// An accepted submission that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionDraft {
    pub user_id: String,
    pub instrument_id: String,
    pub forecast: Forecast,
    pub timeframe: Timeframe,
    pub reasoning: Option<String>,
    pub initial_price: f64,
    pub created_at: DateTime<Utc>,
    pub target_date: DateTime<Utc>,
    pub flagged: bool,
    pub flag_reason: Option<String>,
}

impl PredictionDraft {
    pub fn new(
        user_id: &str,
        payload: ValidatedPayload,
        initial_price: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            instrument_id: payload.instrument_id,
            forecast: payload.forecast,
            timeframe: payload.timeframe,
            reasoning: payload.reasoning,
            initial_price,
            created_at,
            target_date: created_at + payload.timeframe.duration(),
            flagged: false,
            flag_reason: None,
        }
    }

    pub fn flag(mut self, reason: impl Into<String>) -> Self {
        self.flagged = true;
        self.flag_reason = Some(reason.into());
        self
    }

    pub fn into_prediction(self, id: Uuid) -> Prediction {
        Prediction {
            id,
            user_id: self.user_id,
            instrument_id: self.instrument_id,
            forecast: self.forecast,
            timeframe: self.timeframe,
            created_at: self.created_at,
            target_date: self.target_date,
            initial_price: self.initial_price,
            status: PredictionStatus::Pending,
            actual_price: None,
            is_correct: None,
            evaluated_at: None,
            flagged: self.flagged,
            flag_reason: self.flag_reason,
            reasoning: self.reasoning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub id: Uuid,
    pub user_id: String,
    pub instrument_id: String,
    #[serde(flatten)]
    pub forecast: Forecast,
    pub timeframe: Timeframe,
    pub created_at: DateTime<Utc>,
    pub target_date: DateTime<Utc>,
    pub initial_price: f64,
    pub status: PredictionStatus,
    pub actual_price: Option<f64>,
    pub is_correct: Option<bool>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub flagged: bool,
    pub flag_reason: Option<String>,
    pub reasoning: Option<String>,
}

impl Prediction {
    pub fn kind(&self) -> PredictionKind {
        self.forecast.kind()
    }

    pub fn is_pending(&self) -> bool {
        self.status == PredictionStatus::Pending
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.target_date <= now
    }

    /// The single legal transition. Returns false, leaving the record
    /// untouched, when it was already evaluated.
    pub fn evaluate(&mut self, actual_price: f64, is_correct: bool, at: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = PredictionStatus::Evaluated;
        self.actual_price = Some(actual_price);
        self.is_correct = Some(is_correct);
        self.evaluated_at = Some(at);
        true
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionFilter {
    pub instrument_id: Option<String>,
    pub user_id: Option<String>,
    pub evaluated: Option<bool>,
    pub limit: Option<usize>,
}

impl PredictionFilter {
    pub fn for_user(user_id: &str) -> Self {
        Self { user_id: Some(user_id.to_string()), ..Self::default() }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }

    pub fn matches(&self, p: &Prediction) -> bool {
        self.instrument_id.as_deref().map_or(true, |i| i == p.instrument_id)
            && self.user_id.as_deref().map_or(true, |u| u == p.user_id)
            && self.evaluated.map_or(true, |e| e == !p.is_pending())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionTotals {
    pub total: u64,
    pub evaluated: u64,
    pub correct: u64,
}

impl PredictionTotals {
    pub fn from_predictions<'a>(predictions: impl IntoIterator<Item = &'a Prediction>) -> Self {
        predictions.into_iter().fold(Self::default(), |mut acc, p| {
            acc.total += 1;
            if !p.is_pending() {
                acc.evaluated += 1;
            }
            if p.is_correct == Some(true) {
                acc.correct += 1;
            }
            acc
        })
    }

    /// Percentage of evaluated predictions judged correct, two decimals.
    pub fn accuracy(&self) -> f64 {
        percentage(self.correct, self.evaluated)
    }
}

/// Per-user reputation aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStanding {
    pub user_id: String,
    pub total_predictions: u64,
    pub accurate_predictions: u64,
    pub reputation_score: i64,
}

impl UserStanding {
    pub fn new(user_id: &str) -> Self {
        Self { user_id: user_id.to_string(), ..Self::default() }
    }

    pub fn accuracy(&self) -> f64 {
        percentage(self.accurate_predictions, self.total_predictions)
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(kind: &str) -> PredictionPayload {
        PredictionPayload {
            instrument_id: Some("AAPL".into()),
            kind: Some(kind.into()),
            timeframe: Some("1d".into()),
            ..PredictionPayload::default()
        }
    }

    #[test]
    fn target_date_is_created_plus_timeframe() {
        let created = DateTime::from_timestamp(1_700_000_000, 123_000).unwrap();
        let expected = [
            (Timeframe::OneHour, chrono::Duration::hours(1)),
            (Timeframe::OneDay, chrono::Duration::hours(24)),
            (Timeframe::OneWeek, chrono::Duration::days(7)),
            (Timeframe::OneMonth, chrono::Duration::days(30)),
        ];
        for (tf, d) in expected {
            let v = ValidatedPayload {
                instrument_id: "AAPL".into(),
                forecast: Forecast::Direction { direction: Direction::Up },
                timeframe: tf,
                reasoning: None,
            };
            let draft = PredictionDraft::new("u1", v, 100.0, created);
            assert_eq!(draft.target_date, created + d, "timeframe {tf}");
        }
    }

    #[test]
    fn direction_payload_validates() {
        let mut p = payload("direction");
        p.direction = Some("down".into());
        let v = p.validate().unwrap();
        assert_eq!(v.forecast, Forecast::Direction { direction: Direction::Down });
        assert_eq!(v.timeframe, Timeframe::OneDay);
    }

    #[test]
    fn payload_for_the_other_kind_is_rejected() {
        let mut p = payload("price");
        p.target_price = Some(110.0);
        p.direction = Some("up".into());
        assert!(matches!(p.validate(), Err(Rejection::Invalid(_))));

        let mut p = payload("direction");
        p.direction = Some("up".into());
        p.target_price = Some(110.0);
        assert!(matches!(p.validate(), Err(Rejection::Invalid(_))));
    }

    #[test]
    fn missing_or_bad_fields_are_rejected() {
        assert!(payload("price").validate().is_err());
        assert!(payload("direction").validate().is_err());
        assert!(payload("range").validate().is_err());

        let mut p = payload("price");
        p.target_price = Some(-3.0);
        assert!(p.validate().is_err());

        let mut p = payload("price");
        p.target_price = Some(120.0);
        p.timeframe = Some("2h".into());
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("timeframe"));

        let mut p = payload("direction");
        p.direction = Some("up".into());
        p.reasoning = Some("x".repeat(MAX_REASONING_CHARS + 1));
        assert!(p.validate().is_err());
    }

    #[test]
    fn legacy_prediction_type_field_is_accepted() {
        let p: PredictionPayload = serde_json::from_str(
            r#"{"instrumentId":"TSLA","predictionType":"price",
                "targetPrice":250.5,"timeframe":"1w"}"#,
        )
        .unwrap();
        assert_eq!(p.validate().unwrap().forecast, Forecast::Price { target_price: 250.5 });
    }

    #[test]
    fn prediction_json_carries_only_its_kind_payload() {
        let v = ValidatedPayload {
            instrument_id: "AAPL".into(),
            forecast: Forecast::Price { target_price: 110.0 },
            timeframe: Timeframe::OneHour,
            reasoning: None,
        };
        let p = PredictionDraft::new("u1", v, 100.0, Utc::now()).into_prediction(Uuid::new_v4());
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["kind"], "price");
        assert_eq!(json["targetPrice"], 110.0);
        assert!(json.get("direction").is_none());
        assert_eq!(json["timeframe"], "1h");
        assert_eq!(json["status"], "pending");

        let back: Prediction = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn evaluate_happens_once() {
        let v = ValidatedPayload {
            instrument_id: "AAPL".into(),
            forecast: Forecast::Direction { direction: Direction::Up },
            timeframe: Timeframe::OneHour,
            reasoning: None,
        };
        let mut p =
            PredictionDraft::new("u1", v, 100.0, Utc::now()).into_prediction(Uuid::new_v4());
        assert!(p.evaluate(103.0, true, Utc::now()));
        assert!(!p.evaluate(90.0, false, Utc::now()));
        assert_eq!(p.actual_price, Some(103.0));
        assert_eq!(p.is_correct, Some(true));
    }

    #[test]
    fn forecast_columns_round_trip_only_when_consistent() {
        assert_eq!(
            Forecast::from_columns("direction", None, Some("up")),
            Some(Forecast::Direction { direction: Direction::Up })
        );
        assert_eq!(Forecast::from_columns("price", Some(5.0), Some("up")), None);
        assert_eq!(Forecast::from_columns("direction", None, None), None);
    }

    #[test]
    fn accuracy_is_zero_without_evaluations() {
        assert_eq!(PredictionTotals::default().accuracy(), 0.0);
        let t = PredictionTotals { total: 4, evaluated: 3, correct: 2 };
        assert_eq!(t.accuracy(), 66.67);
    }
}
