//! Logging setup.
//!
//! Console output goes through an `EnvFilter`ed fmt layer. Warnings and
//! errors raised by this crate are also appended to a failure log, one
//! `[DD/MM/YYYY HH:MM:SS] msg` line each. Ingestion and processing keep
//! separate failure logs; an event is routed by the [`Phase`] span it was
//! emitted under.

use std::fmt;
use std::path::Path;

use chrono::Local;
use tracing::{Event, Level, Metadata, Span, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::dynamic_filter_fn;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::Config;
use crate::error::ConfigError;

const FAILURE_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Only events from this crate reach the failure logs.
const CRATE_TARGET: &str = "inbox_rules";

/// A run phase with its own failure log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetch,
    Process,
}

impl Phase {
    /// Span that tags everything emitted inside it with this phase.
    pub fn span(self) -> Span {
        match self {
            Self::Fetch => tracing::info_span!("fetch"),
            Self::Process => tracing::info_span!("process"),
        }
    }

    fn from_span_name(name: &str) -> Option<Self> {
        match name {
            "fetch" => Some(Self::Fetch),
            "process" => Some(Self::Process),
            _ => None,
        }
    }

    pub fn log_file(self, config: &Config) -> &Path {
        match self {
            Self::Fetch => &config.fetch_log_file,
            Self::Process => &config.process_log_file,
        }
    }
}

/// Bare `[timestamp] message` lines, no level or target.
pub struct FailureLineFormat;

impl<S, N> FormatEvent<S, N> for FailureLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "[{}] ", Local::now().format(FAILURE_TIMESTAMP_FORMAT))?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Innermost phase span around the current position, if any.
fn current_phase<S>(cx: &Context<'_, S>) -> Option<Phase>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    cx.lookup_current()?
        .scope()
        .find_map(|span| Phase::from_span_name(span.name()))
}

/// Failure-log layer for `phase`. With `catch_all`, it also takes events
/// emitted outside any phase span.
fn failure_layer<S, W>(phase: Phase, catch_all: bool, writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let routing = dynamic_filter_fn(move |meta: &Metadata<'_>, cx: &Context<'_, S>| {
        // spans stay enabled so the phase lookup can see them
        if meta.is_span() {
            return true;
        }
        if *meta.level() > Level::WARN || !meta.target().starts_with(CRATE_TARGET) {
            return false;
        }
        match current_phase(cx) {
            Some(current) => current == phase,
            None => catch_all,
        }
    });

    tracing_subscriber::fmt::layer::<S>()
        .with_ansi(false)
        .event_format(FailureLineFormat)
        .with_writer(writer)
        .with_filter(routing)
}

fn file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "log file".into(),
        message,
    };

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| invalid(format!("{} has no file name", path.display())))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| invalid(format!("{}: {e}", path.display())))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Keeps the failure-log writers flushing until dropped.
pub struct LogGuard {
    _workers: Vec<WorkerGuard>,
}

/// Install the global subscriber with a failure log per phase in `phases`.
/// Events outside any phase span go to the first phase's log.
pub fn init(config: &Config, phases: &[Phase]) -> Result<LogGuard, ConfigError> {
    let mut workers = Vec::with_capacity(phases.len());
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    for (index, &phase) in phases.iter().enumerate() {
        let (writer, guard) = file_writer(phase.log_file(config))?;
        workers.push(guard);
        layers.push(failure_layer::<Registry, _>(phase, index == 0, writer).boxed());
    }

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    tracing_subscriber::registry()
        .with(layers)
        .with(console)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            key: "log file".into(),
            message: format!("logging already initialized: {e}"),
        })?;

    Ok(LogGuard { _workers: workers })
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use regex::Regex;
    use tracing::{info, warn};

    use super::*;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }

        fn messages(&self) -> Vec<String> {
            let line = Regex::new(r"^\[\d{2}/\d{2}/\d{4} \d{2}:\d{2}:\d{2}\] (.*)$").unwrap();
            self.contents()
                .lines()
                .map(|l| line.captures(l).unwrap()[1].to_string())
                .collect()
        }
    }

    #[test]
    fn failure_lines_are_timestamped_and_warn_only() {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::registry()
            .with(failure_layer::<Registry, _>(Phase::Fetch, true, move || writer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            info!("progress line");
            warn!("Error fetching email m1: boom");
            tracing::error!("Database error: gone");
        });

        assert_eq!(
            buffer.messages(),
            vec!["Error fetching email m1: boom", "Database error: gone"]
        );
    }

    #[test]
    fn events_route_to_their_phase_log() {
        let fetch = Buffer::default();
        let process = Buffer::default();
        let (fetch_writer, process_writer) = (fetch.clone(), process.clone());
        let layers = vec![
            failure_layer::<Registry, _>(Phase::Fetch, true, move || fetch_writer.clone()).boxed(),
            failure_layer::<Registry, _>(Phase::Process, false, move || process_writer.clone())
                .boxed(),
        ];
        let subscriber = tracing_subscriber::registry().with(layers);

        tracing::subscriber::with_default(subscriber, || {
            Phase::Fetch.span().in_scope(|| warn!("Error fetching email m1: boom"));
            Phase::Process.span().in_scope(|| {
                let _nested = tracing::info_span!("record").entered();
                warn!("Failed action 'mark_as_read' on message m1: denied");
            });
            warn!("Failed to load configuration: bad");
        });

        assert_eq!(
            fetch.messages(),
            vec!["Error fetching email m1: boom", "Failed to load configuration: bad"]
        );
        assert_eq!(
            process.messages(),
            vec!["Failed action 'mark_as_read' on message m1: denied"]
        );
    }

    #[test]
    fn other_crates_stay_out_of_failure_log() {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::registry()
            .with(failure_layer::<Registry, _>(Phase::Fetch, true, move || writer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            warn!(target: "hyper::proto", "connection reset");
            warn!("Error fetching email m2: timeout");
        });

        assert_eq!(buffer.messages(), vec!["Error fetching email m2: timeout"]);
    }

    #[test]
    fn init_rejects_path_without_file_name() {
        let config = Config {
            fetch_log_file: "/".into(),
            ..Default::default()
        };
        assert!(matches!(
            init(&config, &[Phase::Fetch]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
