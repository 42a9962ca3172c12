//! paperflow: client-side orchestration of paper-to-presentation backends.
//!
//! A [`session::Session`] drives the fixed stage list of
//! [`pipeline::PRESENTATION_STAGES`] through a [`gateway::RemoteCall`]
//! implementation, reports progress through a [`reporter::Reporter`] and runs
//! the gallery poller alongside. The podcast and presentation download
//! features reuse the same [`poller`].

pub mod cli;
pub mod config;
pub mod error;
pub mod features;
pub mod gateway;
pub mod orchestrator;
pub mod pipeline;
pub mod poller;
pub mod reporter;
pub mod session;
pub mod ui;

#[cfg(test)]
mod testing;
