// `log` backend for the kernel
use core::fmt;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Writes every enabled record to a plain formatting sink, one line each:
/// `[LEVEL] target: message`.
pub struct KernelLogger {
    sink: fn(fmt::Arguments),
    level: LevelFilter,
}

impl KernelLogger {
    pub const fn new(sink: fn(fmt::Arguments), level: LevelFilter) -> Self {
        Self { sink, level }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        (self.sink)(format_args!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// Install `logger` as the global logger. Only the first call succeeds.
pub fn init(logger: &'static KernelLogger) -> Result<(), SetLoggerError> {
    log::set_logger(logger)?;
    log::set_max_level(logger.level);
    Ok(())
}
