use std::sync::{Arc, Mutex};

use tracing::{field::Visit, Event, Subscriber};
use tracing_subscriber::{layer::Context, Layer};

/// In-memory mirror of every `tracing` event, formatted one line per event,
/// so the CLI's "view log" option can dump the whole run on demand.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("log buffer poisoned").clone()
    }

    pub fn push(&self, line: String) {
        self.lines.lock().expect("log buffer poisoned").push(line);
    }
}

struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}

impl<S> Layer<S> for LogBuffer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor { message: None };
        event.record(&mut visitor);
        let line = format!(
            "[{}] {}",
            event.metadata().level(),
            visitor.message.unwrap_or_default()
        );
        self.push(line);
    }
}

/// Installs a formatted stderr subscriber plus a [`LogBuffer`] layer so
/// events are both printed live and captured for the CLI's "view log"
/// command.
pub fn init(buffer: LogBuffer) {
    use tracing_subscriber::prelude::*;

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let subscriber = tracing_subscriber::registry().with(fmt_layer).with(buffer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}
