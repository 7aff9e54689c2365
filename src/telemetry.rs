//! Tracing setup and a small formatter abstraction used by in-memory event
//! sinks that want human-readable output.

use tracing_subscriber::{EnvFilter, fmt};

/// Install a global `tracing` subscriber reading `RUST_LOG` (default `info`).
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_ansi(true).try_init();
}

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

/// Formats a `SyncEvent` into human-readable lines. Pluggable so hosts can
/// swap in colorized, JSON, or quiet renderings without touching the engine.
pub trait TelemetryFormatter: Send + Sync {
    fn render(&self, event: &crate::engine::events::SyncEvent) -> EventRender;
}

pub struct PlainFormatter;

impl TelemetryFormatter for PlainFormatter {
    fn render(&self, event: &crate::engine::events::SyncEvent) -> EventRender {
        EventRender {
            context: Some(event.kind_label().to_string()),
            lines: vec![format!("[{}] {}\n", event.kind_label(), event)],
        }
    }
}
