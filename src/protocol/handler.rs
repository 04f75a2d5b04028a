use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::core::packet::Packet;
use crate::error::Result;
use crate::utils::metrics::Timer;

/// A request handler: reads the request, mutates the response.
pub type HandlerFn = dyn Fn(&Packet, &mut Packet) -> Result<()> + Send + Sync + 'static;

/// Ordered list of handlers run against every request.
///
/// Handlers run in registration order and share the same request and
/// response instances, so each one sees what earlier handlers wrote.
/// Execution is best-effort: a failing handler is logged and the remaining
/// handlers still run, which also means an early handler cannot veto the
/// response.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<HandlerFn>>,
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, handler: F)
    where
        F: Fn(&Packet, &mut Packet) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler in order. Returns how many of them failed.
    pub fn run(&self, request: &Packet, response: &mut Packet) -> u64 {
        let _timer = Timer::start("handler_chain");
        let mut failures = 0;

        for (index, handler) in self.handlers.iter().enumerate() {
            if let Err(e) = handler(request, response) {
                failures += 1;
                warn!(handler = index, error = %e, "Error handling request");
            }
        }

        failures
    }
}
