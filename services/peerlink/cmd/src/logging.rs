//! Console log format for the probe.
//!
//! One line per event: `[time] LEVEL module message key=value ...`, where
//! `module` is the event target with the crate prefix shortened so library
//! and probe lines line up.

use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const MODULE_WIDTH: usize = 16;

/// Formatter installed by the probe's subscriber
pub struct ProbeLogFormatter {
    crate_prefix: &'static str,
}

impl ProbeLogFormatter {
    /// `crate_prefix` is stripped from targets, e.g. `peerlink_`.
    pub fn new(crate_prefix: &'static str) -> Self {
        Self { crate_prefix }
    }

    fn module<'a>(&self, target: &'a str) -> &'a str {
        target.strip_prefix(self.crate_prefix).unwrap_or(target)
    }
}

fn level_style(level: &Level) -> (&'static str, &'static str) {
    match *level {
        Level::ERROR => ("ERROR", "\x1b[31m"),
        Level::WARN => ("WARN", "\x1b[33m"),
        Level::INFO => ("INFO", "\x1b[32m"),
        Level::DEBUG => ("DEBUG", "\x1b[34m"),
        Level::TRACE => ("TRACE", "\x1b[2m"),
    }
}

impl<S, N> FormatEvent<S, N> for ProbeLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let (label, color) = level_style(meta.level());
        let mut fields = LineVisitor::default();
        event.record(&mut fields);

        write!(writer, "[{}] ", chrono::Local::now().format("%H:%M:%S%.3f"))?;
        if writer.has_ansi_escapes() {
            write!(writer, "{}{:<5}\x1b[0m ", color, label)?;
        } else {
            write!(writer, "{:<5} ", label)?;
        }
        writeln!(
            writer,
            "{:<width$} {}{}",
            self.module(meta.target()),
            fields.message,
            fields.extra,
            width = MODULE_WIDTH
        )
    }
}

/// Splits an event into its message and the remaining `key=value` pairs
#[derive(Default)]
struct LineVisitor {
    message: String,
    extra: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.extra, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.extra, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_prefix_is_stripped() {
        let formatter = ProbeLogFormatter::new("peerlink_");
        assert_eq!(formatter.module("peerlink_session::peer"), "session::peer");
        assert_eq!(formatter.module("peerlink"), "peerlink");
        assert_eq!(formatter.module("tokio::net"), "tokio::net");
    }

    #[test]
    fn test_every_level_has_a_label() {
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            let (label, color) = level_style(&level);
            assert_eq!(label, level.as_str());
            assert!(color.starts_with("\x1b["));
        }
    }
}
