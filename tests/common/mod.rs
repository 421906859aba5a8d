#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jsbind_runtime_v8::{EngineConfig, GuardExecutor, Runtime};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// One captured log line.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub elapsed_ms: Option<u64>,
}

/// Collects events emitted through the dispatcher it was built into.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    pub fn dispatch(&self) -> tracing::Dispatch {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::Dispatch::new(subscriber)
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == level)
            .collect()
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    elapsed_ms: Option<u64>,
}

impl Visit for EventVisitor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "elapsed_ms" {
            self.elapsed_ms = Some(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            elapsed_ms: visitor.elapsed_ms,
        });
    }
}

/// Runtime with a short guard interval and its own executor.
pub fn runtime() -> Runtime {
    runtime_with(EngineConfig::default())
}

pub fn runtime_with(config: EngineConfig) -> Runtime {
    let config = config
        .with_guard_check_interval(Duration::from_millis(5))
        .with_executor(GuardExecutor::owned(1));
    Runtime::new(&config).unwrap()
}
