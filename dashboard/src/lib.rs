//! Client for a garden irrigation controller hosted on a ThingsBoard-style IoT
//! platform: live telemetry, threshold alerts, pump control, history charts and
//! watering schedules.

pub mod alerts;
pub mod codec;
pub mod config;
pub mod errors;
pub mod history;
pub mod metrics;
pub mod model;
pub mod platform;
pub mod rest;
pub mod schedule;
pub mod session;
pub mod state;

pub use errors::{Error, Result};
pub use session::Session;
