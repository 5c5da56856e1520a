use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

/// A connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection to the database at `path` was opened.
    Connect { path: String },
    /// The connection to the database at `path` was closed.
    Close { path: String },
}

impl ConnectionEvent {
    pub fn path(&self) -> &str {
        match self {
            ConnectionEvent::Connect { path } | ConnectionEvent::Close { path } => path,
        }
    }
}

type Listener = Box<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Synchronous, in-order delivery of connection lifecycle events.
///
/// Listeners run in subscription order on the thread performing the
/// lifecycle transition. A panicking listener is caught and logged; the
/// remaining listeners still run.
#[derive(Clone, Default)]
pub(crate) struct EventBus {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self, listener: Listener) {
        self.listeners.lock().push(listener);
    }

    pub(crate) fn emit(&self, event: &ConnectionEvent) {
        let listeners = self.listeners.lock();
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!("connection event listener panicked for {:?}", event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_run_in_subscription_order() {
        let bus = EventBus::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(Box::new(move |_| order.lock().push(tag)));
        }

        bus.emit(&ConnectionEvent::Connect {
            path: ":memory:".into(),
        });
        assert_eq!(&*order.lock(), &["first", "second", "third"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let bus = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Box::new(|_| panic!("listener bug")));
        let hits2 = hits.clone();
        bus.subscribe(Box::new(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(&ConnectionEvent::Close {
            path: ":memory:".into(),
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
