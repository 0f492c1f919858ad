//! Logging setup with an optional single-line JSON format.
//!
//! JSON format:
//! ```json
//! {"ts":"2024-12-28T15:04:05.123Z","level":"info","type":"app","msg":"worker spawned","ctx":{"service":"prefork","pid":4242},"data":{"workers":3}}
//! ```
//!
//! `ctx.pid` is read per event, so lines written by forked workers carry the
//! worker's own pid.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber.
///
/// Does nothing if a subscriber is already installed.
pub fn init(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("prefork=info"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(JsonFormatter::new(config.service_name.clone())),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("global subscriber already installed");
    }
}

/// Log entry with unified structure.
#[derive(Serialize)]
struct LogEntry<'a> {
    /// ISO 8601 timestamp with milliseconds, UTC
    ts: String,
    level: &'a str,
    /// Log type: app or error
    #[serde(rename = "type")]
    log_type: &'a str,
    msg: &'a str,
    ctx: LogContext<'a>,
    data: &'a BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct LogContext<'a> {
    service: &'a str,
    pid: u32,
}

/// JSON event formatter for `tracing_subscriber::fmt`.
pub struct JsonFormatter {
    service_name: String,
}

impl JsonFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn render(&self, level: &Level, visitor: &FieldVisitor) -> serde_json::Result<String> {
        let level_name = match *level {
            Level::TRACE | Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        let log_type = if *level == Level::ERROR { "error" } else { "app" };

        let entry = LogEntry {
            ts: iso8601_now(),
            level: level_name,
            log_type,
            msg: visitor.message.as_deref().unwrap_or_default(),
            ctx: LogContext {
                service: &self.service_name,
                pid: std::process::id(),
            },
            data: &visitor.fields,
        };
        serde_json::to_string(&entry)
    }
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let line = self
            .render(event.metadata().level(), &visitor)
            .map_err(|_| std::fmt::Error)?;
        writeln!(writer, "{}", line)
    }
}

/// Field visitor for collecting tracing fields.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: BTreeMap<String, serde_json::Value>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(
                field.name().to_string(),
                serde_json::Value::String(format!("{:?}", value)),
            );
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::json!(value));
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }
}

fn iso8601_now() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format_iso8601(now.as_secs(), now.subsec_millis())
}

/// Format seconds since the epoch as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
fn format_iso8601(secs: u64, millis: u32) -> String {
    let days = (secs / 86_400) as i64;
    let day_secs = secs % 86_400;

    // Civil date from day count (proleptic Gregorian)
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        year,
        month,
        day,
        day_secs / 3600,
        (day_secs % 3600) / 60,
        day_secs % 60,
        millis
    )
}
