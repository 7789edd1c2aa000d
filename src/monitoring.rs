//! Monitoring and alerting for the API request path and the scheduled
//! refresh job.
//!
//! Both monitors keep bounded in-memory histories, evaluate thresholds
//! synchronously as records arrive, and push alerts to registered handlers
//! with per-handler fault isolation.

pub mod alert;
pub mod api;
pub mod job;
