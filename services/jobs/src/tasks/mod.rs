pub mod evaluate;
pub mod reconcile;
