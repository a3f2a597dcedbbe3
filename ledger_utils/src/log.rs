//! Logging initialization, adapted from the simulation's log4rs setup: a console appender at the
//! configured root level, plus a per-subsystem file appender scoped by logging `target`.

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::env_str_or;

/// Initializes the global logger. `replica_id` is folded into the per-replica log file name so
/// that several replicas running in the same process (as the integration tests do) don't clobber
/// each other's log output.
pub fn initialize_logging(replica_id: u32) {
    let level = parse_level(&env_str_or("LEDGER_LOG_LEVEL", "info"));

    let stdout = ConsoleAppender::builder().build();

    let log_engine = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{l} - {m}{n}")))
        .append(true)
        .build(format!("log/replica-{}-engine.log", replica_id));

    let mut builder =
        Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));

    if let Ok(log_engine) = log_engine {
        builder = builder
            .appender(Appender::builder().build("log_engine", Box::new(log_engine)))
            .logger(
                Logger::builder()
                    .appender("log_engine")
                    .additive(true)
                    .build("engine", LevelFilter::Debug),
            );
    }

    let config = builder
        .build(Root::builder().appender("stdout").build(level))
        .expect("logging configuration must be valid");

    // Re-initializing the logger from several replicas in the same test process is harmless; the
    // second and later calls are no-ops.
    let _ = log4rs::init_config(config);
}

fn parse_level(name: &str) -> LevelFilter {
    match name.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}
