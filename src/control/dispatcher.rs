use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::events::{ControlEvent, ControlEventKind};

type Handler = Arc<dyn Fn(ControlEvent) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Routes decoded control events to registered handlers.
///
/// Handlers are keyed by event kind, with an optional wildcard list that
/// sees every event. Dispatch is serialized: at most one handler chain
/// runs at a time for the session, and the webhook response is not sent
/// until dispatch completes, which back-pressures the platform.
#[derive(Default)]
pub struct ControlDispatcher {
    table: HashMap<ControlEventKind, Vec<Handler>>,
    wildcard: Vec<Handler>,
    serialize: Mutex<()>,
}

impl ControlDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn on<F>(&mut self, kind: ControlEventKind, handler: F)
    where
        F: Fn(ControlEvent) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.table.entry(kind).or_default().push(Arc::new(handler));
    }

    /// Register a wildcard handler invoked for every event.
    pub fn on_any<F>(&mut self, handler: F)
    where
        F: Fn(ControlEvent) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.wildcard.push(Arc::new(handler));
    }

    /// Run all handlers for `event`. The first handler error aborts the
    /// chain and is surfaced to the HTTP layer as a 500.
    pub async fn dispatch(&self, event: ControlEvent) -> Result<()> {
        let _guard = self.serialize.lock().await;

        debug!("Dispatching control event: {}", event.kind.as_str());

        for handler in &self.wildcard {
            handler(event.clone()).await?;
        }

        if let Some(handlers) = self.table.get(&event.kind) {
            for handler in handlers {
                handler(event.clone()).await?;
            }
        }

        Ok(())
    }
}
