use std::fmt;
use std::io::IsTerminal;

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::{Format, FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::types::LogFormat;

/// Formatter that tags denial events with `[DENY]` and successful logins or
/// finished forwards with `[ALLOW]` before delegating to the inner format.
pub struct PrefixedFormatter<E> {
    inner: E,
    ansi: bool,
}

impl<E> PrefixedFormatter<E> {
    pub fn new(inner: E, ansi: bool) -> Self {
        Self { inner, ansi }
    }
}

impl<S, N, E> FormatEvent<S, N> for PrefixedFormatter<E>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    E: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        let msg = visitor.message.to_lowercase();

        match classify(&msg) {
            Some(Tag::Deny) if self.ansi => write!(writer, "\x1b[31m[DENY]\x1b[0m ")?,
            Some(Tag::Deny) => write!(writer, "[DENY] ")?,
            Some(Tag::Allow) if self.ansi => write!(writer, "\x1b[34m[ALLOW]\x1b[0m ")?,
            Some(Tag::Allow) => write!(writer, "[ALLOW] ")?,
            None => {}
        }
        self.inner.format_event(ctx, writer, event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Deny,
    Allow,
}

fn classify(msg: &str) -> Option<Tag> {
    const DENY: &[&str] = &["denied", "rejected", "auth failed", "connect failed"];
    const ALLOW: &[&str] = &["auth success", "forward completed"];
    if DENY.iter().any(|p| msg.contains(p)) {
        Some(Tag::Deny)
    } else if ALLOW.iter().any(|p| msg.contains(p)) {
        Some(Tag::Allow)
    } else {
        None
    }
}

/// Visitor that extracts the message field from a tracing event.
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

/// Initialize the global tracing subscriber on stderr.
///
/// `level` is an `EnvFilter` directive; an invalid one falls back to `warn`.
pub fn setup_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Pretty => {
            let ansi = std::io::stderr().is_terminal();
            pretty_subscriber(filter, ansi, std::io::stderr).init();
        }
    }
}

/// Tagged human-readable output on `writer`.
fn pretty_subscriber<W>(filter: EnvFilter, ansi: bool, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    // ansi has to be set while the stock format is still in place.
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .event_format(PrefixedFormatter::new(Format::default(), ansi))
        .with_writer(writer)
        .with_env_filter(filter)
        .finish()
}
