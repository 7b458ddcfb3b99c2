//! Session lifecycle events and observer registration.

use std::sync::Arc;

/// Event delivered to session observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UartEvent {
    /// The UART endpoints were resolved.
    Connected,
    /// The transport reported a disconnection.
    Disconnected,
    /// A notification was appended to the receive buffer.
    DataAvailable,
}

impl std::fmt::Display for UartEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::DataAvailable => write!(f, "DataAvailable"),
        }
    }
}

/// Handler for UART session events.
///
/// Callbacks run synchronously on the context that produced the event (the
/// connect pipeline or the notification listener). They are invoked without
/// any session lock held, so an observer may read from the session it
/// observes.
#[cfg_attr(test, mockall::automock)]
pub trait UartObserver: Send + Sync {
    /// The UART endpoints were resolved.
    fn connected(&self) {}

    /// The transport reported a disconnection.
    fn disconnected(&self) {}

    /// Received data is waiting in the buffer.
    fn available(&self) {}
}

/// Registered observers, in registration order.
///
/// Membership is by identity (`Arc` pointer), so registering the same
/// observer twice keeps a single entry.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn UartObserver>>,
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer if it is not already registered.
    ///
    /// Returns `true` if the observer was added.
    pub fn register(&mut self, observer: Arc<dyn UartObserver>) -> bool {
        if self.contains(&observer) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    /// Remove an observer.
    ///
    /// Returns `true` if it was registered.
    pub fn unregister(&mut self, observer: &Arc<dyn UartObserver>) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| !same_observer(o, observer));
        self.observers.len() != before
    }

    /// Check if an observer is registered.
    pub fn contains(&self, observer: &Arc<dyn UartObserver>) -> bool {
        self.observers.iter().any(|o| same_observer(o, observer))
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Check if no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Snapshot of the current membership, for delivery outside a lock.
    ///
    /// Observers registered or unregistered after the snapshot is taken do
    /// not affect a delivery already in progress.
    pub fn snapshot(&self) -> Vec<Arc<dyn UartObserver>> {
        self.observers.clone()
    }
}

// Data pointers only; vtable pointers for one type may differ across codegen units.
fn same_observer(a: &Arc<dyn UartObserver>, b: &Arc<dyn UartObserver>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Deliver an event to every observer, in order.
pub fn dispatch(observers: &[Arc<dyn UartObserver>], event: UartEvent) {
    for observer in observers {
        match event {
            UartEvent::Connected => observer.connected(),
            UartEvent::Disconnected => observer.disconnected(),
            UartEvent::DataAvailable => observer.available(),
        }
    }
}
