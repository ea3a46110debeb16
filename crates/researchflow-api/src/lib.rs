//! HTTP surface for the research pipeline: a blocking JSON endpoint, a
//! server-sent-events endpoint and health probes.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
