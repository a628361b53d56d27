//! Compact, colourized event formatter.

use std::fmt::{self, Write};

use nu_ansi_term::Color;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::{FmtContext, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

/// Writes `LEVEL span{args}: fields` lines. Only the innermost span is named, together
/// with the arguments it was entered with, e.g. `DEBUG add_instance{size=4096}: ...`.
#[derive(Default)]
pub struct SimpleFormatter;

impl<S, N> FormatEvent<S, N> for SimpleFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let ansi = writer.has_ansi_escapes();
        let level = *event.metadata().level();
        let label = format!("{:>5}", level.as_str());
        write!(writer, "{} ", paint(ansi, level_color(level), &label))?;

        if let Some(span) = ctx.lookup_current() {
            write!(writer, "{}", paint(ansi, Color::Purple, span.name()))?;
            let extensions = span.extensions();
            match extensions.get::<FormattedFields<N>>() {
                Some(args) if !args.is_empty() => write!(writer, "{{{args}}}")?,
                _ => {}
            }
            writer.write_str(": ")?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn paint(ansi: bool, color: Color, text: &str) -> String {
    match ansi {
        true => color.paint(text).to_string(),
        false => text.to_owned(),
    }
}

fn level_color(level: Level) -> Color {
    match level {
        Level::TRACE => Color::Purple,
        Level::DEBUG => Color::Blue,
        Level::INFO => Color::Green,
        Level::WARN => Color::Yellow,
        Level::ERROR => Color::Red,
    }
}
