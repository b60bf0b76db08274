use std::io::{self, Write};
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[derive(Clone, Debug)]
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {label} {current}/{total} ({pct:5.1}%)");
    }
}

/// `log` backend printing `[mm:ss] LEVEL target: msg` to stderr, timed from install.
pub struct ConsoleLogger {
    level: LevelFilter,
    t0: Instant,
}

impl ConsoleLogger {
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level,
            t0: Instant::now(),
        }
    }

    /// Installs the logger for the process. Fails if another logger is already set.
    pub fn install(level: LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(Self::new(level)))?;
        log::set_max_level(level);
        Ok(())
    }

    fn format(&self, record: &Record) -> String {
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let target = record.target().split("::").last().unwrap_or_default();
        match record.level() {
            Level::Info => format!("[{ts}] {}", record.args()),
            level => format!("[{ts}] {level} {target}: {}", record.args()),
        }
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
        let line = self.format(record);
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{line}");
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// `--quiet` wins over `--verbose`.
pub fn level_for(verbose: bool, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Warn
    } else if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use log::{Level, LevelFilter, Log, Record};

    use super::{fmt_elapsed, level_for, ConsoleLogger};

    #[test]
    fn elapsed_switches_to_hours() {
        assert_eq!(fmt_elapsed(65.4), "01:05");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
        assert_eq!(fmt_elapsed(-1.0), "00:00");
    }

    #[test]
    fn logger_filters_and_formats() {
        let logger = ConsoleLogger::new(LevelFilter::Info);
        let args = format_args!("mode pandoc");
        let record = Record::builder()
            .level(Level::Warn)
            .target("doc_translator::adapters")
            .args(args)
            .build();
        assert!(logger.enabled(record.metadata()));
        assert!(logger.format(&record).ends_with("] WARN adapters: mode pandoc"));

        let debug = Record::builder().level(Level::Debug).build();
        assert!(!logger.enabled(debug.metadata()));
    }

    #[test]
    fn quiet_wins() {
        assert_eq!(level_for(true, true), LevelFilter::Warn);
        assert_eq!(level_for(true, false), LevelFilter::Debug);
        assert_eq!(level_for(false, false), LevelFilter::Info);
    }
}
