//! Process-wide logger setup
//!
//! One logger per process, installed once at startup through the `log`
//! facade with a `fern` dispatcher:
//!
//! - Coordinator: colored console plus the shared log file
//! - Participant: colored console only, every line tagged with rank and host
//!
//! Line format: `[YYYY-mm-dd HH:MM:SS] [LEVEL] message`.

use crate::config::LoggingConfig;
use crate::distributed::Rank;
use crate::Result;
use anyhow::Context;
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::Dispatch;
use log::LevelFilter;
use std::path::Path;

fn colors() -> ColoredLevelConfig {
    ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::BrightBlack)
}

/// Minimum level for the log file (and the console, unless quieted)
pub fn file_level(config: &LoggingConfig, verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        config.level.to_level_filter()
    }
}

/// Minimum console level
///
/// With progress display off only warnings and errors reach the console.
pub fn console_level(config: &LoggingConfig, verbose: bool) -> LevelFilter {
    let level = file_level(config, verbose);
    if config.show_progress || verbose {
        level
    } else {
        level.min(LevelFilter::Warn)
    }
}

/// Console dispatcher; `prefix` is prepended to every line
fn console(level: LevelFilter, prefix: String) -> Dispatch {
    let colors = colors();
    Dispatch::new()
        .level(level)
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}] [{}] {}",
                prefix,
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                message
            ))
        })
        .chain(std::io::stderr())
}

fn base(level: LevelFilter) -> Dispatch {
    Dispatch::new()
        .level(level)
        .level_for("mio", LevelFilter::Warn)
        .level_for("tokio", LevelFilter::Warn)
}

/// Install the coordinator logger
///
/// A log file that cannot be opened is reported on stderr and the run
/// continues with console logging only.
pub fn init_coordinator(config: &LoggingConfig, log_path: &Path, verbose: bool) -> Result<()> {
    let file_level = file_level(config, verbose);
    let console_level = console_level(config, verbose);

    let mut dispatch = base(file_level.max(console_level)).chain(console(console_level, String::new()));

    if let Some(dir) = log_path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Failed to create log directory '{}': {}", dir.display(), e);
        }
    }

    match fern::log_file(log_path) {
        Ok(file) => {
            dispatch = dispatch.chain(
                Dispatch::new()
                    .level(file_level)
                    .format(|out, message, record| {
                        out.finish(format_args!(
                            "[{}] [{}] {}",
                            Local::now().format("%Y-%m-%d %H:%M:%S"),
                            record.level(),
                            message
                        ))
                    })
                    .chain(file),
            );
        }
        Err(e) => eprintln!("Failed to open log file '{}': {}", log_path.display(), e),
    }

    dispatch.apply().context("Failed to install logger")?;
    log::debug!("Logging to console and '{}'", log_path.display());
    Ok(())
}

/// Install a participant logger (console only)
pub fn init_participant(rank: Rank, hostname: &str, verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    base(level)
        .chain(console(level, participant_prefix(rank, hostname)))
        .apply()
        .context("Failed to install logger")
}

/// Install a console logger for commands that run before any config is loaded
pub fn init_console(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    base(level)
        .chain(console(level, String::new()))
        .apply()
        .context("Failed to install logger")
}

fn participant_prefix(rank: Rank, hostname: &str) -> String {
    format!("[WORKER {} @ {}] ", rank, hostname)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_levels() {
        let mut config = LoggingConfig::default();
        assert_eq!(file_level(&config, false), LevelFilter::Info);
        assert_eq!(console_level(&config, false), LevelFilter::Info);

        config.show_progress = false;
        assert_eq!(file_level(&config, false), LevelFilter::Info);
        assert_eq!(console_level(&config, false), LevelFilter::Warn);

        config.level = LogLevel::Error;
        assert_eq!(console_level(&config, false), LevelFilter::Error);

        assert_eq!(file_level(&config, true), LevelFilter::Debug);
        assert_eq!(console_level(&config, true), LevelFilter::Debug);
    }

    #[test]
    fn test_participant_prefix() {
        assert_eq!(participant_prefix(3, "w3"), "[WORKER 3 @ w3] ");
    }
}
