//! Dabble inbound: turns emailed journal replies into dated entries.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod safety;
pub mod store;
pub mod tracking;
