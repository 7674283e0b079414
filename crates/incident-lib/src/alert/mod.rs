//! Alerting for incidents
//!
//! This module provides:
//! - The cadence gate deciding whether and when to notify
//! - The notification transport trait and a logging transport

mod alerter;
mod notifier;

pub use alerter::Alerter;
pub use notifier::{LogNotifier, Notifier};
