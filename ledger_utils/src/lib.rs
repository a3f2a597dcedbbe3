#![warn(missing_docs)]

//! logging and environment-variable configuration helpers shared by the ledger binary and its tests

pub mod config;
pub mod log;
