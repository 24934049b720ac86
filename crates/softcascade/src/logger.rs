//! A small `log` backend that writes timestamped records to stderr.

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

pub struct Logger {
    level: LevelFilter,
    start: Instant,
}

impl Logger {
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level,
            start: Instant::now(),
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let t = self.start.elapsed().as_secs_f64();
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "[{t:9.3}s {:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Install the logger globally. Fails if another logger is already set.
pub fn init_with_level(level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger = LOGGER.get_or_init(|| Logger::new(level));
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}
