//! Validation hook bus: ordered, synchronous fan-out of life-cycle events.
//!
//! The bus only dispatches. Deciding whether accumulated results abort a
//! transition is the engine's job, which is what lets the same bus serve the
//! informational `StatusCheck` event.

use crate::events::{EventKind, StageEvent};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook '{hook}' failed: {message}")]
    Failed { hook: String, message: String },
    #[error("hook I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("hook store error: {0}")]
    Store(#[from] stagehand_store::StoreError),
}

impl HookError {
    pub fn failed(hook: impl Into<String>, message: impl Into<String>) -> Self {
        HookError::Failed {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

pub type HookFn = Arc<dyn Fn(&mut StageEvent) -> Result<(), HookError> + Send + Sync>;

/// A validator or observer that declares which events it handles and at what
/// priority.
pub trait StageSubscriber: Send + Sync {
    fn name(&self) -> &str;

    /// `(event, priority)` pairs. Lower priority runs first.
    fn subscriptions(&self) -> Vec<(EventKind, i32)>;

    fn handle(&self, event: &mut StageEvent) -> Result<(), HookError>;
}

#[derive(Clone)]
enum Handler {
    Fn(HookFn),
    Subscriber(Arc<dyn StageSubscriber>),
}

#[derive(Clone)]
struct Registration {
    kind: EventKind,
    priority: i32,
    seq: usize,
    name: String,
    handler: Handler,
}

/// Explicit registration list built at composition time.
#[derive(Clone, Default)]
pub struct HookBus {
    registrations: Vec<Registration>,
    next_seq: usize,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: EventKind, priority: i32, name: String, handler: Handler) {
        self.registrations.push(Registration {
            kind,
            priority,
            seq: self.next_seq,
            name,
            handler,
        });
        self.next_seq += 1;
        self.registrations.sort_by_key(|r| (r.priority, r.seq));
    }

    /// Register a closure for one event kind.
    pub fn subscribe<F>(&mut self, kind: EventKind, priority: i32, name: impl Into<String>, f: F)
    where
        F: Fn(&mut StageEvent) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.push(kind, priority, name.into(), Handler::Fn(Arc::new(f)));
    }

    /// Register a subscriber for every `(event, priority)` it declares.
    pub fn add_subscriber(&mut self, subscriber: Arc<dyn StageSubscriber>) {
        for (kind, priority) in subscriber.subscriptions() {
            let name = subscriber.name().to_owned();
            self.push(kind, priority, name, Handler::Subscriber(Arc::clone(&subscriber)));
        }
    }

    /// Run every handler registered for the event's kind, in priority order.
    /// The first handler error stops dispatch and is returned as-is.
    pub fn dispatch(&self, event: &mut StageEvent) -> Result<(), HookError> {
        let kind = event.kind();
        for reg in self.registrations.iter().filter(|r| r.kind == kind) {
            trace!("dispatching {kind} to {} (priority {})", reg.name, reg.priority);
            match &reg.handler {
                Handler::Fn(f) => f(event)?,
                Handler::Subscriber(s) => s.handle(event)?,
            }
        }
        Ok(())
    }

    /// Handler names for `kind`, in dispatch order.
    pub fn handlers_for(&self, kind: EventKind) -> Vec<&str> {
        self.registrations
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
