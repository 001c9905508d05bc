//! Environment-driven `tracing` subscriber setup for binaries embedding the
//! stores. The library itself only emits events.
//!
//! | variable              | values                        | default               |
//! |-----------------------|-------------------------------|-----------------------|
//! | `REGISTRY_LOG_LEVEL`  | any `EnvFilter` directive     | `info`                |
//! | `REGISTRY_LOG_FORMAT` | `human`, `json`               | `human`               |
//! | `REGISTRY_LOG_OUTPUT` | `console`, `file`, `both`     | `console`             |
//! | `REGISTRY_LOG_FILE`   | path of the daily-rolled file | `/tmp/registry.log`   |
//!
//! `RUST_LOG` takes precedence over `REGISTRY_LOG_LEVEL` when set.

use crate::error::{StoreError, StoreResult};
use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub file: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
            output: LogOutput::Console,
            file: PathBuf::from("/tmp/registry.log"),
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let format = match lookup("REGISTRY_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };
        let output = match lookup("REGISTRY_LOG_OUTPUT").as_deref() {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            _ => LogOutput::Console,
        };
        Self {
            level: lookup("REGISTRY_LOG_LEVEL").unwrap_or(defaults.level),
            format,
            output,
            file: lookup("REGISTRY_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.file),
        }
    }
}

// Writes every line to both writers
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write_all(buf);
        let res_b = self.b.write_all(buf);
        res_a.or(res_b).map(|_| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = Tee<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    ["hyper=warn", "reqwest=warn"]
        .into_iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(filter, |filter, directive| filter.add_directive(directive))
}

/// Install the global subscriber from the environment.
///
/// Keep the returned guard alive for as long as file logging should flush.
pub fn init_subscriber() -> StoreResult<Option<WorkerGuard>> {
    init_with(&LogSettings::from_env())
}

pub fn init_with(settings: &LogSettings) -> StoreResult<Option<WorkerGuard>> {
    let subscriber = registry().with(env_filter(&settings.level));
    let json = settings.format == LogFormat::Json;

    let file_writer = || {
        let dir = settings
            .file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = settings
            .file
            .file_name()
            .unwrap_or_else(|| "registry.log".as_ref());
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name))
    };

    let mut guard = None;
    let result = match settings.output {
        LogOutput::Console => {
            let layer = tracing_subscriber::fmt::layer().with_writer(io::stdout);
            if json {
                subscriber.with(layer.json()).try_init()
            } else {
                subscriber.with(layer).try_init()
            }
        }
        LogOutput::File => {
            let (writer, file_guard) = file_writer();
            guard = Some(file_guard);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            if json {
                subscriber.with(layer.json()).try_init()
            } else {
                subscriber.with(layer).try_init()
            }
        }
        LogOutput::Both => {
            let (writer, file_guard) = file_writer();
            guard = Some(file_guard);
            let tee = MakeTee {
                make_a: io::stdout,
                make_b: writer,
            };
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(tee);
            if json {
                subscriber.with(layer.json()).try_init()
            } else {
                subscriber.with(layer).try_init()
            }
        }
    };

    result.map_err(|e| StoreError::Config(format!("Failed to install log subscriber: {e}")))?;
    Ok(guard)
}
