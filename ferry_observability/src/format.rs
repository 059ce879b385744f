//! Human readable log lines.
//!
//! `2025-06-01T10:00:00.123Z  INFO ferry_sink_core::dispatcher: connected to the store mode=Stream`
use std::{fmt, io};

use nu_ansi_term::{Color, Style};
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tracing::{Event, Level, Subscriber, field};
use tracing_subscriber::{
    field::{RecordFields, VisitFmt, VisitOutput},
    fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields, format::Writer},
    registry::LookupSpan,
};

const TIMESTAMP: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

/// Field names printed in red.
const ERROR_FIELDS: [&str; 2] = ["err", "error"];

#[derive(Debug, Clone, Copy, Default)]
pub struct LogFormat;

impl<S, N> FormatEvent<S, N> for LogFormat
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
        let ansi = writer.has_ansi_escapes();
        let meta = event.metadata();

        let dimmed = if ansi { Style::new().dimmed() } else { Style::new() };
        write!(writer, "{}", dimmed.prefix())?;
        if write_timestamp(&mut writer).is_err() {
            write!(writer, "<unknown-time>")?;
        }
        write!(writer, "{} ", dimmed.suffix())?;

        write!(writer, "{} ", LevelLabel::new(meta.level(), ansi))?;
        write!(
            writer,
            "{}{}:{} ",
            dimmed.prefix(),
            meta.target(),
            dimmed.suffix()
        )?;

        ctx.format_fields(writer.by_ref(), event)?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, " {}in {}{}", dimmed.prefix(), span.name(), dimmed.suffix())?;
            }
        }

        writeln!(writer)
    }
}

impl<'w> FormatFields<'w> for LogFormat {
    fn format_fields<R: RecordFields>(&self, writer: Writer<'w>, fields: R) -> fmt::Result {
        let mut visitor = FieldVisitor::new(writer, true);
        fields.record(&mut visitor);
        visitor.finish()
    }

    fn add_fields(
        &self,
        current: &'w mut FormattedFields<Self>,
        fields: &tracing::span::Record<'_>,
    ) -> fmt::Result {
        let is_empty = current.is_empty();
        let mut visitor = FieldVisitor::new(current.as_writer(), is_empty);
        fields.record(&mut visitor);
        visitor.finish()
    }
}

struct FieldVisitor<'a> {
    writer: Writer<'a>,
    is_empty: bool,
    result: fmt::Result,
}

impl<'a> FieldVisitor<'a> {
    fn new(writer: Writer<'a>, is_empty: bool) -> Self {
        Self {
            writer,
            is_empty,
            result: Ok(()),
        }
    }

    fn separator(&mut self) -> &'static str {
        if std::mem::replace(&mut self.is_empty, false) {
            ""
        } else {
            " "
        }
    }
}

impl field::Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if field.name() == "message" {
            self.record_debug(field, &format_args!("{value}"));
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        if self.result.is_err() {
            return;
        }

        let separator = self.separator();
        let name = field.name();
        self.result = if name == "message" {
            write!(self.writer, "{separator}{value:?}")
        } else if self.writer.has_ansi_escapes() {
            let color = if ERROR_FIELDS.contains(&name) {
                Color::Red
            } else {
                Color::Cyan
            };
            write!(
                self.writer,
                "{separator}{}={}",
                Style::new().italic().paint(name),
                color.paint(format!("{value:?}"))
            )
        } else {
            write!(self.writer, "{separator}{name}={value:?}")
        };
    }
}

impl VisitOutput<fmt::Result> for FieldVisitor<'_> {
    fn finish(self) -> fmt::Result {
        self.result
    }
}

impl VisitFmt for FieldVisitor<'_> {
    fn writer(&mut self) -> &mut dyn fmt::Write {
        &mut self.writer
    }
}

fn write_timestamp(writer: &mut Writer<'_>) -> fmt::Result {
    let mut adaptor = IoAdaptor { inner: writer };
    OffsetDateTime::now_utc()
        .format_into(&mut adaptor, TIMESTAMP)
        .map(|_| ())
        .map_err(|_| fmt::Error)
}

/// Writes formatted time through a `fmt::Write`.
struct IoAdaptor<'a> {
    inner: &'a mut dyn fmt::Write,
}

impl io::Write for IoAdaptor<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text =
            std::str::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.write_str(text).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct LevelLabel<'a> {
    level: &'a Level,
    ansi: bool,
}

impl<'a> LevelLabel<'a> {
    fn new(level: &'a Level, ansi: bool) -> Self {
        Self { level, ansi }
    }
}

impl fmt::Display for LevelLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, color) = match *self.level {
            Level::TRACE => ("TRACE", Color::Purple),
            Level::DEBUG => ("DEBUG", Color::Blue),
            Level::INFO => (" INFO", Color::Green),
            Level::WARN => (" WARN", Color::Yellow),
            Level::ERROR => ("ERROR", Color::Red),
        };

        if self.ansi {
            write!(f, "{}", color.bold().paint(label))
        } else {
            f.write_str(label)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_label_without_ansi() {
        assert_eq!(LevelLabel::new(&Level::INFO, false).to_string(), " INFO");
        assert_eq!(LevelLabel::new(&Level::ERROR, false).to_string(), "ERROR");
    }

    #[test]
    fn test_timestamp_format() {
        let mut out = String::new();
        write_timestamp(&mut Writer::new(&mut out)).expect("timestamp");

        assert_eq!(out.len(), "2025-06-01T10:00:00.123Z".len());
        assert!(out.ends_with('Z'));
    }
}
