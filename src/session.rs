//! UART session: a byte stream over the Nordic UART Service.
//!
//! A [`UartSession`] wraps one remote device. Call [`UartSession::connect`]
//! once; after that, bytes notified by the device accumulate in a receive
//! buffer drained by the `read*` methods, and `write*` sends straight to the
//! device's TX characteristic.

use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ble::transport::{DeviceIdentity, Endpoint, GattTransport};
use crate::buffer::ReceiveBuffer;
use crate::config::SessionConfig;
use crate::connection::{self, Action, Completion, SessionState, UartEndpoints};
use crate::error::{Error, Result};
use crate::events::{dispatch, ObserverRegistry, UartEvent, UartObserver};

/// State touched from both the notification context and the caller.
///
/// One lock covers both so a notification's append and the observer
/// snapshot for its `available` event are taken together.
#[derive(Default)]
struct Shared {
    buffer: ReceiveBuffer,
    observers: ObserverRegistry,
}

/// Session internals shared with the pipeline and background tasks.
pub(crate) struct SessionInner {
    pub(crate) identity: DeviceIdentity,
    pub(crate) transport: Arc<dyn GattTransport>,
    config: SessionConfig,
    state: RwLock<SessionState>,
    endpoints: OnceLock<UartEndpoints>,
    shared: Mutex<Shared>,
    event_tx: broadcast::Sender<UartEvent>,
    connect_issued: AtomicBool,
}

impl SessionInner {
    pub(crate) fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Apply a completion to the state machine, returning the action to perform.
    pub(crate) fn advance(&self, completion: Completion) -> Result<Action> {
        let (old_state, new_state, action) = {
            let mut state = self.state.write();
            let current = *state;

            let (next, action) = match connection::transition(current, completion) {
                Some(step) => step,
                None if current == SessionState::Disconnected => {
                    return Err(Error::ConnectionLost);
                }
                None => {
                    return Err(Error::Internal(format!(
                        "no transition from {} on {:?}",
                        current, completion
                    )));
                }
            };

            *state = next;
            (current, next, action)
        };

        if old_state != new_state {
            debug!(
                "Session {} state changed: {} -> {}",
                self.identity, old_state, new_state
            );
        }

        Ok(action)
    }

    pub(crate) fn set_endpoints(&self, endpoints: UartEndpoints) -> Result<()> {
        self.endpoints
            .set(endpoints)
            .map_err(|_| Error::Internal("UART endpoints already resolved".to_string()))
    }

    pub(crate) fn notify_endpoint(&self) -> Result<Endpoint> {
        self.endpoints
            .get()
            .map(|e| e.notify.clone())
            .ok_or_else(|| Error::Internal("UART endpoints not resolved".to_string()))
    }

    /// Deliver an event to a snapshot of the observers, then to channel subscribers.
    pub(crate) fn emit(&self, event: UartEvent) {
        let observers = self.shared.lock().observers.snapshot();
        self.deliver(&observers, event);
    }

    /// Append a notification payload and announce it.
    pub(crate) fn on_notification(&self, value: &[u8]) {
        let observers = {
            let mut shared = self.shared.lock();
            shared.buffer.extend(value);
            shared.observers.snapshot()
        };
        self.deliver(&observers, UartEvent::DataAvailable);
    }

    fn deliver(&self, observers: &[Arc<dyn UartObserver>], event: UartEvent) {
        dispatch(observers, event);
        // No receivers is fine.
        let _ = self.event_tx.send(event);
    }
}

/// A byte-stream session with a Nordic UART Service device.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct UartSession {
    inner: Arc<SessionInner>,
}

impl UartSession {
    /// Create a session for a device with default configuration.
    ///
    /// The session is not connected; call [`connect`](Self::connect).
    pub fn new(transport: Arc<dyn GattTransport>) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Create a session with explicit configuration.
    pub fn with_config(transport: Arc<dyn GattTransport>, config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        Self {
            inner: Arc::new(SessionInner {
                identity: transport.identity(),
                transport,
                config,
                state: RwLock::new(SessionState::Idle),
                endpoints: OnceLock::new(),
                shared: Mutex::new(Shared::default()),
                event_tx,
                connect_issued: AtomicBool::new(false),
            }),
        }
    }

    // === Identification ===

    /// Get the identity of the remote device.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // === Connection ===

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Check if the pipeline reached the enable-notifications stage.
    ///
    /// This does not mean the request succeeded; await
    /// [`connect`](Self::connect) for that.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Start the connect pipeline.
    ///
    /// Returns immediately; the pipeline runs on the tokio runtime. Await the
    /// returned [`PendingConnect`] to learn whether it succeeded. Dropping it
    /// does not cancel the pipeline.
    ///
    /// A session connects at most once: a second call resolves to
    /// [`Error::AlreadyStarted`].
    pub fn connect(&self) -> PendingConnect {
        // Checked first so a call with no runtime leaves the session connectable.
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                return PendingConnect::failed(Error::Internal(format!(
                    "connect requires a tokio runtime: {}",
                    e
                )));
            }
        };

        if self.inner.connect_issued.swap(true, Ordering::SeqCst) {
            return PendingConnect::failed(Error::AlreadyStarted);
        }

        PendingConnect::spawned(runtime.spawn(connection::run(self.inner.clone())))
    }

    /// Request transport-level disconnection.
    ///
    /// The `disconnected` event is the confirmation that teardown happened.
    /// The receive buffer and observers are left as they are.
    pub async fn disconnect(&self) -> Result<()> {
        debug!("Requesting disconnect from {}", self.inner.identity);
        self.inner.transport.disconnect().await
    }

    // === Events ===

    /// Register an observer. Registering the same observer twice is a no-op.
    pub fn register(&self, observer: Arc<dyn UartObserver>) {
        self.inner.shared.lock().observers.register(observer);
    }

    /// Unregister an observer. Unregistering an unknown observer is a no-op.
    pub fn unregister(&self, observer: &Arc<dyn UartObserver>) {
        self.inner.shared.lock().observers.unregister(observer);
    }

    /// Subscribe to session events over a broadcast channel.
    ///
    /// Events arrive in the same order observers see them.
    pub fn subscribe(&self) -> broadcast::Receiver<UartEvent> {
        self.inner.event_tx.subscribe()
    }

    // === Data ===

    /// Number of received bytes waiting to be read.
    pub fn available(&self) -> usize {
        self.inner.shared.lock().buffer.len()
    }

    /// Read up to `count` of the oldest received bytes. Never waits.
    pub fn read(&self, count: usize) -> Vec<u8> {
        self.inner.shared.lock().buffer.read(count).to_vec()
    }

    /// Read every received byte.
    pub fn read_all(&self) -> Vec<u8> {
        self.inner.shared.lock().buffer.read_all().to_vec()
    }

    /// Read up to `length` bytes decoded as UTF-8.
    ///
    /// Less data than requested might be returned, and a cut inside a
    /// multi-byte character is decoded lossily.
    pub fn read_string(&self, length: usize) -> String {
        self.inner.shared.lock().buffer.read_string(length)
    }

    /// Read every received byte decoded as UTF-8.
    pub fn read_all_string(&self) -> String {
        self.inner.shared.lock().buffer.read_all_string()
    }

    /// Write bytes to the device.
    ///
    /// Silently dropped until the write endpoint is resolved. Otherwise the
    /// write is issued and not awaited.
    pub fn write(&self, data: &[u8]) {
        let Some(endpoints) = self.inner.endpoints.get() else {
            debug!(
                "Dropping write of {} bytes: endpoints not resolved",
                data.len()
            );
            return;
        };

        if self.state().is_terminal() {
            warn!("Writing {} bytes after disconnect", data.len());
        }

        self.inner.transport.write_characteristic(
            &endpoints.write,
            data,
            self.inner.config.write_with_response,
        );
    }

    /// Write a string to the device, encoded as UTF-8.
    pub fn write_str(&self, data: &str) {
        self.write(data.as_bytes());
    }
}

impl std::fmt::Debug for UartSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UartSession")
            .field("identity", &self.inner.identity)
            .field("state", &self.state())
            .field("available", &self.available())
            .finish()
    }
}

/// Outcome of [`UartSession::connect`].
#[must_use = "await to learn whether the connect pipeline succeeded"]
pub struct PendingConnect {
    inner: PendingInner,
}

enum PendingInner {
    Spawned(JoinHandle<Result<()>>),
    Failed(Option<Error>),
}

impl PendingConnect {
    fn spawned(handle: JoinHandle<Result<()>>) -> Self {
        Self {
            inner: PendingInner::Spawned(handle),
        }
    }

    fn failed(error: Error) -> Self {
        Self {
            inner: PendingInner::Failed(Some(error)),
        }
    }
}

impl Future for PendingConnect {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            PendingInner::Spawned(handle) => Pin::new(handle).poll(cx).map(|joined| {
                joined.unwrap_or_else(|e| Err(Error::Internal(format!("connect task failed: {}", e))))
            }),
            PendingInner::Failed(error) => Poll::Ready(Err(error
                .take()
                .unwrap_or_else(|| Error::Internal("connect result already taken".to_string())))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::*;
    use crate::testing::{wait_until, EventLog, FakeTransport};
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    fn session_with(fake: &FakeTransport) -> UartSession {
        UartSession::new(Arc::new(fake.clone()))
    }

    async fn ready_session(fake: &FakeTransport) -> UartSession {
        let session = session_with(fake);
        assert_ok!(session.connect().await);
        session
    }

    #[tokio::test]
    async fn test_connected_fires_between_resolution_and_notification_enable() {
        let fake = FakeTransport::new();
        let session = session_with(&fake);
        let observer = EventLog::sharing(fake.log());
        session.register(observer.clone());

        assert_ok!(session.connect().await);

        assert_eq!(
            fake.calls(),
            vec![
                "disconnected",
                "connect",
                "discover_services",
                "event:connected",
                "write_descriptor",
                "notifications",
                "set_notification",
            ]
        );
        assert_eq!(observer.count("connected"), 1);
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_descriptor_write_enables_notifications() {
        let fake = FakeTransport::new();
        let _session = ready_session(&fake).await;

        let writes = fake.descriptor_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].uuid, CLIENT_CHARACTERISTIC_CONFIG_UUID);
        assert_eq!(writes[0].characteristic_uuid, UART_RX_UUID);
        assert_eq!(writes[0].value, ENABLE_NOTIFICATION_VALUE.to_vec());
    }

    #[tokio::test]
    async fn test_discover_failure_stops_pipeline() {
        let fake = FakeTransport::new().failing_at("discover_services");
        let session = session_with(&fake);
        let observer = EventLog::new();
        session.register(observer.clone());

        let err = assert_err!(session.connect().await);

        assert_eq!(err.stage(), Some(SessionState::ResolvingEndpoints));
        assert_eq!(observer.count("connected"), 0);
        assert!(!fake.calls().iter().any(|c| c == "write_descriptor"));
        assert_eq!(session.state(), SessionState::ResolvingEndpoints);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_connecting_state() {
        let fake = FakeTransport::new().failing_at("connect");
        let session = session_with(&fake);

        let err = assert_err!(session.connect().await);

        assert_eq!(err.stage(), Some(SessionState::Connecting));
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(fake.calls(), vec!["disconnected", "connect"]);
    }

    #[tokio::test]
    async fn test_missing_endpoint_fails_before_connected() {
        let fake = FakeTransport::new().without_characteristic(UART_RX_UUID);
        let session = session_with(&fake);
        let observer = EventLog::new();
        session.register(observer.clone());

        let err = assert_err!(session.connect().await);

        assert!(matches!(err, Error::CharacteristicNotFound { .. }), "{:?}", err);
        assert_eq!(observer.count("connected"), 0);
        assert_eq!(session.state(), SessionState::ResolvingEndpoints);

        // The write endpoint was never assigned, so writes are dropped.
        session.write(b"dropped");
        assert!(fake.writes().is_empty());
    }

    #[tokio::test]
    async fn test_notification_enable_failure_after_connected() {
        let fake = FakeTransport::new().failing_at("set_notification");
        let session = session_with(&fake);
        let observer = EventLog::new();
        session.register(observer.clone());

        let err = assert_err!(session.connect().await);

        assert_eq!(err.stage(), Some(SessionState::Ready));
        assert_eq!(observer.count("connected"), 1);
        // The stage was reached even though enabling failed.
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_second_connect_rejected() {
        let fake = FakeTransport::new();
        let session = ready_session(&fake).await;

        let err = assert_err!(session.connect().await);
        assert!(matches!(err, Error::AlreadyStarted));
        assert_eq!(fake.count("connect"), 1);
    }

    #[tokio::test]
    async fn test_disconnect_event_fires_once() {
        let fake = FakeTransport::new();
        let session = ready_session(&fake).await;
        let observer = EventLog::new();
        session.register(observer.clone());

        fake.notify(UART_RX_UUID, b"pending");
        wait_until(|| session.available() == 7).await;

        fake.trigger_disconnect();
        fake.trigger_disconnect();
        wait_until(|| observer.count("disconnected") >= 1).await;
        tokio::task::yield_now().await;

        assert_eq!(observer.count("disconnected"), 1);
        assert_eq!(session.state(), SessionState::Disconnected);
        // Teardown does not touch buffered data.
        assert_eq!(session.available(), 7);
    }

    #[tokio::test]
    async fn test_disconnect_mid_pipeline_fails_connect() {
        let fake = FakeTransport::new().gated_at("write_descriptor");
        let session = session_with(&fake);
        let observer = EventLog::new();
        session.register(observer.clone());

        let pending = session.connect();
        wait_until(|| session.state() == SessionState::Subscribing).await;

        fake.trigger_disconnect();
        wait_until(|| session.state() == SessionState::Disconnected).await;
        fake.open_gate();

        let err = assert_err!(pending.await);
        assert!(matches!(err, Error::ConnectionLost), "{:?}", err);
        assert_eq!(observer.count("disconnected"), 1);
        assert_eq!(observer.count("connected"), 1);
        assert!(!fake.calls().iter().any(|c| c == "set_notification"));
    }

    #[tokio::test]
    async fn test_disconnect_requests_transport() {
        let fake = FakeTransport::new();
        let session = ready_session(&fake).await;

        assert_ok!(session.disconnect().await);
        assert_eq!(fake.count("disconnect"), 1);
        // Only the transport's disconnected stream confirms teardown.
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_writes_reach_transport_in_order() {
        let fake = FakeTransport::new();
        let session = ready_session(&fake).await;

        session.write(&[0x00, 0xff]);
        session.write_str("second");
        session.write(&[]);

        assert_eq!(
            fake.writes(),
            vec![vec![0x00, 0xff], b"second".to_vec(), Vec::new()]
        );
    }

    #[tokio::test]
    async fn test_write_before_connect_is_dropped() {
        let fake = FakeTransport::new();
        let session = session_with(&fake);

        session.write(b"early");
        session.write_str("early");

        assert!(fake.writes().is_empty());
    }

    #[tokio::test]
    async fn test_write_uses_configured_response_mode() {
        let fake = FakeTransport::new();
        let session = UartSession::with_config(
            Arc::new(fake.clone()),
            SessionConfig::new().with_write_response(true),
        );
        assert_ok!(session.connect().await);

        session.write(b"x");
        assert_eq!(fake.write_modes(), vec![true]);
    }

    #[tokio::test]
    async fn test_notifications_fill_buffer_and_announce() {
        let fake = FakeTransport::new();
        let session = ready_session(&fake).await;
        let observer = EventLog::new();
        session.register(observer.clone());
        let mut events = session.subscribe();

        fake.notify(UART_RX_UUID, &[1, 2, 3]);
        fake.notify(UART_TX_UUID, &[9, 9]);
        fake.notify(UART_RX_UUID, &[4]);
        wait_until(|| observer.count("available") == 2).await;

        assert_eq!(session.available(), 4);
        assert_eq!(session.read(2), vec![1, 2]);
        assert_eq!(session.available(), 2);
        assert_eq!(session.read(10), vec![3, 4]);
        assert_eq!(session.available(), 0);
        assert!(session.read(1).is_empty());

        assert_eq!(assert_ok!(events.recv().await), UartEvent::DataAvailable);
        assert_eq!(assert_ok!(events.recv().await), UartEvent::DataAvailable);
    }

    #[tokio::test]
    async fn test_echo_round_trip_string() {
        let fake = FakeTransport::new();
        let session = ready_session(&fake).await;

        let message = "héllo, wörld ✓";
        session.write_str(message);
        for written in fake.writes() {
            fake.notify(UART_RX_UUID, &written);
        }
        wait_until(|| session.available() == message.len()).await;

        assert_eq!(session.read_string(7), "héllo,");
        assert_eq!(session.read_all_string(), " wörld ✓");
        assert_eq!(session.available(), 0);
    }

    #[tokio::test]
    async fn test_read_all_drains() {
        let fake = FakeTransport::new();
        let session = ready_session(&fake).await;

        fake.notify(UART_RX_UUID, b"abc");
        fake.notify(UART_RX_UUID, b"def");
        wait_until(|| session.available() == 6).await;

        assert_eq!(session.read_all(), b"abcdef".to_vec());
        assert_eq!(session.available(), 0);
        assert!(session.read_all().is_empty());
    }

    #[tokio::test]
    async fn test_observer_may_read_during_delivery() {
        struct Drainer {
            session: UartSession,
            drained: Mutex<Vec<u8>>,
        }

        impl UartObserver for Drainer {
            fn available(&self) {
                let data = self.session.read_all();
                self.drained.lock().extend(data);
            }
        }

        let fake = FakeTransport::new();
        let session = ready_session(&fake).await;
        let drainer = Arc::new(Drainer {
            session: session.clone(),
            drained: Mutex::new(Vec::new()),
        });
        session.register(drainer.clone());

        fake.notify(UART_RX_UUID, b"live");
        wait_until(|| drainer.drained.lock().len() == 4).await;

        assert_eq!(*drainer.drained.lock(), b"live".to_vec());
        assert_eq!(session.available(), 0);
    }

    #[tokio::test]
    async fn test_register_twice_delivers_once() {
        let fake = FakeTransport::new();
        let session = session_with(&fake);
        let observer = EventLog::new();
        let handle: Arc<dyn UartObserver> = observer.clone();

        session.register(handle.clone());
        session.register(handle.clone());
        assert_ok!(session.connect().await);
        assert_eq!(observer.count("connected"), 1);

        session.unregister(&handle);
        session.unregister(&handle);
        fake.notify(UART_RX_UUID, b"z");
        wait_until(|| session.available() == 1).await;
        assert_eq!(observer.count("available"), 0);
    }

    #[test]
    fn test_connect_outside_runtime_fails() {
        let fake = FakeTransport::new();
        let session = session_with(&fake);

        let err = futures::executor::block_on(session.connect()).unwrap_err();
        assert!(matches!(err, Error::Internal(_)), "{:?}", err);
    }

    #[test]
    fn test_connect_after_missing_runtime_still_runs() {
        let fake = FakeTransport::new();
        let session = session_with(&fake);

        let err = futures::executor::block_on(session.connect()).unwrap_err();
        assert!(matches!(err, Error::Internal(_)), "{:?}", err);
        assert!(fake.calls().is_empty());

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            assert_ok!(session.connect().await);
        });
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(fake.count("connect"), 1);
    }

    #[test]
    fn test_session_debug() {
        let session = session_with(&FakeTransport::new());
        let debug = format!("{:?}", session);
        assert!(debug.contains("Idle"), "{}", debug);
        assert_eq!(session.identity().as_str(), "fake-uart");
    }
}
