//! Prediction lifecycle and evaluation engine.
//!
//! Admission control, the pending → evaluated state machine, time-triggered
//! judging and the reputation feedback it drives. The HTTP gateway, the job
//! runner and the realtime relay are thin processes around this crate.

pub mod admission;
pub mod auth;
pub mod clock;
pub mod connection;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod judge;
pub mod logging;
pub mod model;
pub mod price;
pub mod reputation;
pub mod store;

pub use admission::{AdmissionController, AdmissionPolicy};
pub use error::{Rejection, ReputationError, SourceError, StoreError};
pub use evaluation::{EvaluationScheduler, SchedulerConfig, TickReport};
pub use events::{LogDispatcher, NotificationDispatcher, OutcomeEvent};
pub use model::{Direction, Forecast, Prediction, PredictionKind, PredictionStatus, Timeframe};
pub use reputation::ReputationEngine;
