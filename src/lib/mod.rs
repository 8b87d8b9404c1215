//! Worker-side execution core of the cube orchestrator.
//!
//! A [`worker::types::Worker`] owns the task registry and the request queue,
//! and drives a container [`tasks::runtime::Runtime`] to realize requested
//! task states. [`worker::api::TaskServer`] exposes it over HTTP.

pub mod config;
pub mod queue;
pub mod tasks;
pub mod worker;
