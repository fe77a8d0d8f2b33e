//! Structured logging setup.
//!
//! The filter is taken from `RUST_LOG` when set, otherwise from the
//! configured level. Output is JSON for production or a human-readable
//! format for development, written to stdout or to a configured file.

use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;
use crate::{Error, Result};

const LEVEL_NAMES: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate the configured level and normalize it into a filter directive.
fn level_directive(level: &str) -> Result<String> {
    let mut name = level.to_lowercase();
    if name == "warning" {
        name = "warn".to_string();
    }
    if LEVEL_NAMES.contains(&name.as_str()) {
        Ok(name)
    } else {
        Err(Error::InvalidInput(format!("Invalid log level: {level}")))
    }
}

/// Log sink: the configured file in append mode, stdout otherwise.
fn log_writer(file_path: Option<&str>) -> Result<BoxMakeWriter> {
    match file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Internal(format!("Cannot open log file {path}: {e}")))?;
            Ok(BoxMakeWriter::new(Arc::new(file)))
        }
        None => Ok(BoxMakeWriter::new(std::io::stdout)),
    }
}

/// Initialize the global subscriber from configuration.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let directive = level_directive(&config.level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let writer = log_writer(config.file_path.as_deref())?;

    let base = fmt::layer()
        .with_writer(writer)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(
                base.json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    } else {
        registry
            .with(base.pretty().with_file(false).with_line_number(true))
            .init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive_accepts_known_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert_eq!(level_directive(level).unwrap(), level);
        }
        assert_eq!(level_directive("INFO").unwrap(), "info");
        assert_eq!(level_directive("warning").unwrap(), "warn");
    }

    #[test]
    fn test_level_directive_rejects_garbage() {
        assert!(level_directive("verbose").is_err());
        assert!(level_directive("").is_err());
    }

    #[test]
    fn test_log_writer_defaults_to_stdout() {
        assert!(log_writer(None).is_ok());
    }
}
