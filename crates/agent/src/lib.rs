//! Incident agent library: HTTP API and configuration

pub mod api;
pub mod config;
