//! In-memory transport and observer fakes for driving sessions in tests.

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::ble::transport::{
    DescriptorWrite, DeviceIdentity, Endpoint, GattTransport, Notification, Service,
};
use crate::ble::uuids::*;
use crate::error::{Error, Result};
use crate::events::UartObserver;

struct FakeState {
    identity: Mutex<String>,
    services: Mutex<Vec<Service>>,
    fail_at: Mutex<Option<&'static str>>,
    gate_at: Mutex<Option<&'static str>>,
    gate: Notify,
    log: Arc<Mutex<Vec<String>>>,
    writes: Mutex<Vec<(Vec<u8>, bool)>>,
    descriptor_writes: Mutex<Vec<DescriptorWrite>>,
    notify_tx: UnboundedSender<Notification>,
    notify_rx: Mutex<Option<UnboundedReceiver<Notification>>>,
    disconnect_tx: UnboundedSender<()>,
    disconnect_rx: Mutex<Option<UnboundedReceiver<()>>>,
}

/// Scriptable GATT transport exposing a well-formed UART service.
///
/// Every request is appended to a call log. A request can be made to fail
/// (`failing_at`) or to wait for [`open_gate`](Self::open_gate) (`gated_at`).
#[derive(Clone)]
pub(crate) struct FakeTransport {
    state: Arc<FakeState>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        let (notify_tx, notify_rx) = unbounded();
        let (disconnect_tx, disconnect_rx) = unbounded();

        Self {
            state: Arc::new(FakeState {
                identity: Mutex::new("fake-uart".to_string()),
                services: Mutex::new(vec![uart_service()]),
                fail_at: Mutex::new(None),
                gate_at: Mutex::new(None),
                gate: Notify::new(),
                log: Arc::new(Mutex::new(Vec::new())),
                writes: Mutex::new(Vec::new()),
                descriptor_writes: Mutex::new(Vec::new()),
                notify_tx,
                notify_rx: Mutex::new(Some(notify_rx)),
                disconnect_tx,
                disconnect_rx: Mutex::new(Some(disconnect_rx)),
            }),
        }
    }

    pub(crate) fn named(self, identity: &str) -> Self {
        *self.state.identity.lock() = identity.to_string();
        self
    }

    pub(crate) fn failing_at(self, call: &'static str) -> Self {
        *self.state.fail_at.lock() = Some(call);
        self
    }

    pub(crate) fn gated_at(self, call: &'static str) -> Self {
        *self.state.gate_at.lock() = Some(call);
        self
    }

    pub(crate) fn without_uart_service(self) -> Self {
        self.state.services.lock().clear();
        self
    }

    pub(crate) fn without_characteristic(self, uuid: Uuid) -> Self {
        for service in self.state.services.lock().iter_mut() {
            service.characteristics.retain(|c| c.uuid != uuid);
        }
        self
    }

    pub(crate) fn without_notify_descriptor(self) -> Self {
        for service in self.state.services.lock().iter_mut() {
            for characteristic in service.characteristics.iter_mut() {
                characteristic.descriptors.clear();
            }
        }
        self
    }

    /// Release a gated request.
    pub(crate) fn open_gate(&self) {
        self.state.gate.notify_one();
    }

    /// Push a notification as if the device sent it.
    pub(crate) fn notify(&self, uuid: Uuid, value: &[u8]) {
        let _ = self.state.notify_tx.unbounded_send(Notification {
            uuid,
            value: value.to_vec(),
        });
    }

    /// Report a transport-level disconnection.
    pub(crate) fn trigger_disconnect(&self) {
        let _ = self.state.disconnect_tx.unbounded_send(());
    }

    pub(crate) fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.state.log.clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.log.lock().clone()
    }

    pub(crate) fn count(&self, call: &str) -> usize {
        self.state.log.lock().iter().filter(|c| *c == call).count()
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.state
            .writes
            .lock()
            .iter()
            .map(|(data, _)| data.clone())
            .collect()
    }

    pub(crate) fn write_modes(&self) -> Vec<bool> {
        self.state.writes.lock().iter().map(|(_, mode)| *mode).collect()
    }

    pub(crate) fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.state.descriptor_writes.lock().clone()
    }

    async fn request(&self, call: &'static str) -> Result<()> {
        self.state.log.lock().push(call.to_string());

        let gated = *self.state.gate_at.lock() == Some(call);
        if gated {
            self.state.gate.notified().await;
        }

        if *self.state.fail_at.lock() == Some(call) {
            return Err(Error::Bluetooth(btleplug::Error::NotConnected));
        }
        Ok(())
    }
}

fn uart_service() -> Service {
    Service {
        uuid: UART_SERVICE_UUID,
        characteristics: vec![
            Endpoint {
                service_uuid: UART_SERVICE_UUID,
                uuid: UART_TX_UUID,
                descriptors: Vec::new(),
            },
            Endpoint {
                service_uuid: UART_SERVICE_UUID,
                uuid: UART_RX_UUID,
                descriptors: vec![CLIENT_CHARACTERISTIC_CONFIG_UUID],
            },
        ],
    }
}

#[async_trait]
impl GattTransport for FakeTransport {
    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.state.identity.lock().clone())
    }

    async fn connect(&self) -> Result<()> {
        self.request("connect").await
    }

    async fn discover_services(&self) -> Result<()> {
        self.request("discover_services").await
    }

    fn service(&self, uuid: &Uuid) -> Option<Service> {
        self.state
            .services
            .lock()
            .iter()
            .find(|s| s.uuid == *uuid)
            .cloned()
    }

    async fn write_descriptor(&self, write: &DescriptorWrite) -> Result<()> {
        self.request("write_descriptor").await?;
        self.state.descriptor_writes.lock().push(write.clone());
        Ok(())
    }

    async fn set_notification(&self, _endpoint: &Endpoint, _enabled: bool) -> Result<()> {
        self.request("set_notification").await
    }

    fn write_characteristic(&self, _endpoint: &Endpoint, value: &[u8], with_response: bool) {
        self.state
            .writes
            .lock()
            .push((value.to_vec(), with_response));
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
        self.request("notifications").await?;
        let rx = self.state.notify_rx.lock().take();
        rx.map(|rx| rx.boxed())
            .ok_or_else(|| Error::Internal("notifications already taken".to_string()))
    }

    async fn disconnected(&self) -> Result<BoxStream<'static, ()>> {
        self.request("disconnected").await?;
        let rx = self.state.disconnect_rx.lock().take();
        rx.map(|rx| rx.boxed())
            .ok_or_else(|| Error::Internal("disconnect stream already taken".to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        self.request("disconnect").await
    }
}

/// Observer that counts events, optionally mirroring them into a shared log.
pub(crate) struct EventLog {
    events: Mutex<Vec<&'static str>>,
    shared: Option<Arc<Mutex<Vec<String>>>>,
}

impl EventLog {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            shared: None,
        })
    }

    /// Mirror events into `log` as `event:<name>`, interleaved with transport calls.
    pub(crate) fn sharing(log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            shared: Some(log),
        })
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }

    fn record(&self, event: &'static str) {
        self.events.lock().push(event);
        if let Some(log) = &self.shared {
            log.lock().push(format!("event:{}", event));
        }
    }
}

impl UartObserver for EventLog {
    fn connected(&self) {
        self.record("connected");
    }

    fn disconnected(&self) {
        self.record("disconnected");
    }

    fn available(&self) {
        self.record("available");
    }
}

/// Yield to background tasks until `condition` holds.
///
/// Panics after two seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await;

    assert!(reached.is_ok(), "condition not reached in time");
}
