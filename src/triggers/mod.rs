/// Alert decision engine, rule implementations and health grading
pub mod health;
pub mod rules;
pub mod trigger_engine;

pub use health::HealthStatus;
pub use rules::{AlertThreshold, FailRateRule, RegionConcentrationRule};
pub use trigger_engine::{AlertDecisionEngine, AlertVerdict, Decision, TriggerRule};
