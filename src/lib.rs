extern crate log;

pub mod cli;
pub mod digest;
pub mod engine;
pub mod error;
pub mod record;
pub mod registry;
pub mod replica;
pub mod wire;
