//! Tracing setup for the binaries.

use std::env;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE: &str = "benefit_console.log";

// ─────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleSettings {
    /// Default filter; `RUST_LOG` wins when set.
    pub log_level: String,
    /// Enables a daily rolling file sink next to stdout.
    pub log_dir: Option<String>,
    pub log_json: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_dir: None,
            log_json: false,
        }
    }
}

impl ConsoleSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: env::var("BENEFIT_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_dir: env::var("BENEFIT_LOG_DIR")
                .ok()
                .filter(|d| !d.trim().is_empty()),
            log_json: env::var("BENEFIT_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.log_json),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Init
// ─────────────────────────────────────────────────────────

/// Installs the global subscriber. Keep the returned guard alive for the
/// whole process or buffered file lines are lost.
pub fn init_logging(settings: &ConsoleSettings) -> Option<WorkerGuard> {
    let (subscriber, guard) = build_subscriber(settings);
    subscriber.init();
    guard
}

type BoxedSubscriber = Box<dyn Subscriber + Send + Sync>;

/// Stdout always; a daily rolling file (text or JSON) when a log dir is set.
fn build_subscriber(settings: &ConsoleSettings) -> (BoxedSubscriber, Option<WorkerGuard>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    let Some(dir) = settings.log_dir.as_deref() else {
        return (Box::new(registry.with(stdout_layer())), None);
    };

    let (non_blocking, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE));

    let subscriber: BoxedSubscriber = if settings.log_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        Box::new(registry.with(file_layer).with(stdout_layer()))
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        Box::new(registry.with(file_layer).with(stdout_layer()))
    };

    (subscriber, Some(guard))
}

fn stdout_layer<S>() -> fmt::Layer<S> {
    fmt::layer().with_target(false).with_ansi(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = ConsoleSettings::default();
        assert_eq!(s.log_level, "info");
        assert!(s.log_dir.is_none());
        assert!(!s.log_json);
    }

    #[test]
    fn test_every_sink_combination_builds_and_writes() {
        let dir = std::env::temp_dir().join(format!("benefit-log-{}", uuid::Uuid::new_v4()));
        let dir_str = dir.to_string_lossy().into_owned();

        for (log_dir, log_json) in [(None, false), (Some(dir_str.clone()), false), (Some(dir_str.clone()), true)] {
            let settings = ConsoleSettings {
                log_level: "info".into(),
                log_dir,
                log_json,
            };
            let (subscriber, guard) = build_subscriber(&settings);
            assert_eq!(guard.is_some(), settings.log_dir.is_some());
            tracing::subscriber::with_default(subscriber, || {
                tracing::info!(log_json, "sink check");
            });
            drop(guard);
        }

        let written = std::fs::read_dir(&dir).unwrap().count();
        assert!(written >= 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
