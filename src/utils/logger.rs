/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fs;
use std::io;
use std::path::Path;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use flexi_logger::{
    colored_opt_format, writers::LogWriter, Age, Cleanup, Criterion, DeferredNow, Duplicate,
    FileSpec, Level, Logger, LoggerHandle, Naming, Record,
};

use public::counter::{Counter as StatsCounter, CounterType, CounterValue, OwnedCountable};

use crate::config::LogConfig;
use crate::error::Result;

#[derive(Default)]
struct Counter {
    error: AtomicU64,
    warning: AtomicU64,
}

// A writer calculating log count by level without actually writing log
pub struct LogLevelWriter(Arc<Counter>);

impl LogLevelWriter {
    pub fn new() -> (Self, LogLevelCounter) {
        let c = Arc::new(Counter::default());
        (Self(c.clone()), LogLevelCounter(Arc::downgrade(&c)))
    }
}

impl LogWriter for LogLevelWriter {
    fn write(&self, _: &mut DeferredNow, record: &Record<'_>) -> io::Result<()> {
        match record.level() {
            Level::Error => &self.0.error,
            Level::Warn => &self.0.warning,
            _ => return Ok(()),
        }
        .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

pub struct LogLevelCounter(Weak<Counter>);

impl OwnedCountable for LogLevelCounter {
    fn get_counters(&self) -> Vec<StatsCounter> {
        match self.0.upgrade() {
            Some(counters) => vec![
                (
                    "error",
                    CounterType::Counted,
                    CounterValue::Unsigned(counters.error.swap(0, Ordering::Relaxed)),
                ),
                (
                    "warning",
                    CounterType::Counted,
                    CounterValue::Unsigned(counters.warning.swap(0, Ordering::Relaxed)),
                ),
            ],
            None => vec![],
        }
    }

    fn closed(&self) -> bool {
        self.0.strong_count() == 0
    }
}

/// Starts the global logger, `RUST_LOG` overrides the configured level.
///
/// Logs go to stderr, and additionally to a daily rotated file when `log-file` is set. The
/// returned handle must be kept alive for the lifetime of the program.
pub fn init_logger(config: &LogConfig) -> Result<(LoggerHandle, LogLevelCounter)> {
    let (log_level_writer, log_level_counter) = LogLevelWriter::new();
    let logger = Logger::try_with_env_or_str(&config.log_level)?.format(colored_opt_format);
    let logger = if config.log_file.is_empty() {
        logger.log_to_writer(Box::new(log_level_writer))
    } else {
        let path = Path::new(&config.log_file);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        logger
            .log_to_file_and_writer(FileSpec::try_from(path)?, Box::new(log_level_writer))
            .rotate(
                Criterion::Age(Age::Day),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(config.log_retention as usize),
            )
            .append()
    };
    let handle = logger.duplicate_to_stderr(Duplicate::All).start()?;
    Ok((handle, log_level_counter))
}
