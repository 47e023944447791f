//! `tracing` integration.
//!
//! [`LokiLayer`] turns tracing events into [`Record`]s and hands them to a
//! [`Pusher`]. Each event is rendered as one logfmt line without timestamp
//! or colors, e.g. `level=warn msg="disk almost full" mount=/var used=0.93`.
//! Loki stores the event time separately, so it is not repeated in the line.

use std::fmt::{self, Write};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::config::{Config, DEFAULT_VISIBLE_LEVELS};
use crate::pusher::{on_pusher_thread, Pusher, PusherError};
use crate::record::Record;

/// Layer that ships visible tracing events to Loki.
///
/// # Example
///
/// ```no_run
/// use loki_shipper::config::Config;
/// use loki_shipper::layer::LokiLayer;
/// use tracing_subscriber::prelude::*;
///
/// let layer = LokiLayer::new(Config::default()).expect("Failed to start Loki layer");
/// let pusher = layer.pusher();
/// tracing_subscriber::registry().with(layer).init();
///
/// tracing::info!(user = "alice", "logged in");
///
/// pusher.shutdown();
/// ```
pub struct LokiLayer {
    pusher: Arc<Pusher>,
    visible_levels: Vec<Level>,
}

impl LokiLayer {
    /// Start a pusher for `config` and wrap it in a layer.
    pub fn new(config: Config) -> Result<Self, PusherError> {
        let config = config.normalized();
        let visible_levels = config.visible_levels.clone();
        let pusher = Pusher::new(config)?;
        Ok(Self::with_pusher(Arc::new(pusher), visible_levels))
    }

    /// Wrap an existing pusher. An empty level list means the default levels.
    pub fn with_pusher(pusher: Arc<Pusher>, visible_levels: Vec<Level>) -> Self {
        let visible_levels = if visible_levels.is_empty() {
            DEFAULT_VISIBLE_LEVELS.to_vec()
        } else {
            visible_levels
        };
        Self {
            pusher,
            visible_levels,
        }
    }

    /// Handle to the pusher, used to shut it down at exit.
    pub fn pusher(&self) -> Arc<Pusher> {
        self.pusher.clone()
    }

    pub fn levels(&self) -> &[Level] {
        &self.visible_levels
    }

    pub fn is_visible(&self, level: &Level) -> bool {
        self.visible_levels.contains(level)
    }
}

impl<S: Subscriber> Layer<S> for LokiLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Pusher and HTTP stack diagnostics stay local
        if on_pusher_thread() {
            return;
        }

        let level = event.metadata().level();
        if !self.is_visible(level) {
            return;
        }

        self.pusher
            .push(Record::new(level_label(level), format_event(event)));
    }
}

/// Lowercase severity label, e.g. `warn`.
pub fn level_label(level: &Level) -> String {
    level.as_str().to_ascii_lowercase()
}

/// Render an event as a single logfmt line.
pub fn format_event(event: &Event<'_>) -> String {
    let mut visitor = FieldVisitor::default();
    event.record(&mut visitor);

    let mut line = String::new();
    write_pair(&mut line, "level", &level_label(event.metadata().level()));
    if let Some(message) = visitor.message.as_deref().filter(|m| !m.is_empty()) {
        write_pair(&mut line, "msg", message);
    }
    for (key, value) in &visitor.fields {
        write_pair(&mut line, key, value);
    }
    line
}

fn write_pair(line: &mut String, key: &str, value: &str) {
    if !line.is_empty() {
        line.push(' ');
    }
    line.push_str(key);
    line.push('=');
    if needs_quoting(value) {
        let _ = write!(line, "{:?}", value);
    } else {
        line.push_str(value);
    }
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '/' | '@' | '^' | '+'))
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(&'static str, String)>,
}

impl FieldVisitor {
    fn record(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            // Metadata copied in by tracing-log
            name if name.starts_with("log.") => {}
            name => self.fields.push((name, value)),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field, format!("{:?}", value));
    }
}
