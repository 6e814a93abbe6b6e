//! Console Logger
//!
//! Backs the `log` facade with the serial console. Lines look like
//! `[INFO  kproc::process] process 3: exit(0)`.

use alloc::sync::Arc;
use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Once;

use crate::fs::Console;

static LOGGER: Once<ConsoleLogger> = Once::new();

/// A `log::Log` that writes to a [`Console`].
pub struct ConsoleLogger {
    console: Arc<dyn Console>,
    level: LevelFilter,
}

struct ConsoleWriter<'a>(&'a dyn Console);

impl Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_bytes(s.as_bytes());
        Ok(())
    }
}

impl ConsoleLogger {
    pub fn new(console: Arc<dyn Console>, level: LevelFilter) -> Self {
        Self { console, level }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut out = ConsoleWriter(&*self.console);
        let _ = writeln!(out, "[{:<5} {}] {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

/// Install the console logger. Only the first call has any effect.
pub fn init(console: Arc<dyn Console>, level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(|| ConsoleLogger::new(console, level));
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}
