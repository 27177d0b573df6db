use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, Once};

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive
    /// string such as `info,graphstats.storage=trace`.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file. If the file cannot be opened, file
    /// logging is disabled while other sinks remain active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    /// Effective filter: the configured directives, then `RUST_LOG` when set.
    /// Unparsable directives fall back to `info`.
    pub fn env_filter(&self) -> EnvFilter {
        let mut directives = Self::normalize_level_directives(&self.level);
        if let Some(env) = std::env::var("RUST_LOG")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            directives = format!("{directives},{}", env.trim());
        }
        EnvFilter::try_new(&directives)
            .or_else(|_| EnvFilter::try_new(Self::normalize_level_directives(&self.level)))
            .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::INFO.into()))
    }

    /// Writer for every enabled sink, and whether opening the log file failed.
    fn make_writer(&self) -> (BoxMakeWriter, bool) {
        let mut writer = BoxMakeWriter::new(io::sink);
        if self.stderr {
            writer = BoxMakeWriter::new(writer.and(io::stderr));
        }
        let Some(path) = &self.file else {
            return (writer, false);
        };
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => (BoxMakeWriter::new(writer.and(Mutex::new(file))), false),
            Err(_) => (writer, true),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber.
///
/// Safe to call multiple times; only the first call has an effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let (writer, file_failed) = config.make_writer();
        let fmt = tracing_subscriber::fmt::layer().with_ansi(false);
        let layer: Box<dyn Layer<_> + Send + Sync> = if config.json {
            fmt.json().with_writer(writer).boxed()
        } else {
            fmt.with_writer(writer).boxed()
        };

        let installed = tracing_subscriber::registry()
            .with(config.env_filter())
            .with(layer)
            .try_init()
            .is_ok();
        if let (true, true, Some(path)) = (installed, file_failed, &config.file) {
            tracing::warn!(
                target: "graphstats.config",
                path = %path.display(),
                "failed to open log file; logging without it"
            );
        }
    });
}
