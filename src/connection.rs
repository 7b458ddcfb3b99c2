//! Connection pipeline for a UART session.
//!
//! The connect sequence is an explicit state machine. [`transition`] is the
//! whole table: a pure function from the current [`SessionState`] and the
//! [`Completion`] just observed to the next state and the [`Action`] to
//! perform. [`run`] drives it against the session's transport, issuing each
//! stage only after the previous stage's completion.

use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::transport::{Endpoint, GattTransport, Notification};
use crate::ble::uuids::*;
use crate::error::{Error, Result};
use crate::events::UartEvent;
use crate::session::SessionInner;

/// Lifecycle state of a UART session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// `connect()` has not been called.
    #[default]
    Idle,
    /// Transport connect request in flight.
    Connecting,
    /// Service discovery in flight, then endpoint lookup.
    ResolvingEndpoints,
    /// Notification descriptor write in flight.
    Subscribing,
    /// Notifications enabled (or being enabled); data flows into the buffer.
    Ready,
    /// The transport reported a disconnection. Terminal.
    Disconnected,
}

impl SessionState {
    /// Check if the session reached its terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::ResolvingEndpoints => write!(f, "ResolvingEndpoints"),
            Self::Subscribing => write!(f, "Subscribing"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// A completion observed by the pipeline or the disconnect watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The caller invoked `connect()`.
    ConnectRequested,
    /// The transport connect request succeeded.
    Connected,
    /// Service discovery succeeded.
    ServicesDiscovered,
    /// Write and notify endpoints were found.
    EndpointsResolved,
    /// The notification descriptor write succeeded.
    DescriptorWritten,
    /// The enable-notifications request succeeded.
    NotificationsEnabled,
    /// The transport reported a disconnection.
    TransportDisconnected,
}

/// Side effect issued on entering a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Issue the transport connect request.
    Connect,
    /// Issue service discovery.
    DiscoverServices,
    /// Look up the UART endpoints and emit `connected`.
    ResolveEndpoints,
    /// Write the notify endpoint's client configuration descriptor.
    WriteDescriptor,
    /// Enable notifications on the notify endpoint.
    EnableNotifications,
    /// The pipeline completed.
    Finish,
    /// Emit `disconnected`.
    EmitDisconnected,
}

/// The pipeline's transition table.
///
/// Returns `None` when `completion` is not expected in `state`; in particular
/// nothing leaves `Disconnected`, and `Idle` has not been connected yet so it
/// cannot be disconnected.
pub fn transition(state: SessionState, completion: Completion) -> Option<(SessionState, Action)> {
    use Completion as C;
    use SessionState as S;

    match (state, completion) {
        (S::Idle, C::ConnectRequested) => Some((S::Connecting, Action::Connect)),
        (S::Connecting, C::Connected) => Some((S::ResolvingEndpoints, Action::DiscoverServices)),
        (S::ResolvingEndpoints, C::ServicesDiscovered) => {
            Some((S::ResolvingEndpoints, Action::ResolveEndpoints))
        }
        (S::ResolvingEndpoints, C::EndpointsResolved) => {
            Some((S::Subscribing, Action::WriteDescriptor))
        }
        (S::Subscribing, C::DescriptorWritten) => Some((S::Ready, Action::EnableNotifications)),
        (S::Ready, C::NotificationsEnabled) => Some((S::Ready, Action::Finish)),
        (S::Idle | S::Disconnected, C::TransportDisconnected) => None,
        (_, C::TransportDisconnected) => Some((S::Disconnected, Action::EmitDisconnected)),
        _ => None,
    }
}

/// The write and notify endpoints of the UART service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UartEndpoints {
    /// TX characteristic, written by the host.
    pub write: Endpoint,
    /// RX characteristic, notified by the device.
    pub notify: Endpoint,
}

impl UartEndpoints {
    /// Look up both endpoints on a transport whose services were discovered.
    ///
    /// A missing service, characteristic, or notify descriptor is an error;
    /// the session never proceeds with an unresolved endpoint.
    pub fn resolve(transport: &dyn GattTransport) -> Result<Self> {
        let service =
            transport
                .service(&UART_SERVICE_UUID)
                .ok_or_else(|| Error::ServiceNotFound {
                    uuid: UART_SERVICE_UUID.to_string(),
                })?;

        let lookup = |uuid: Uuid| {
            service
                .characteristic(&uuid)
                .cloned()
                .ok_or_else(|| Error::CharacteristicNotFound {
                    uuid: uuid.to_string(),
                })
        };

        let write = lookup(UART_TX_UUID)?;
        let notify = lookup(UART_RX_UUID)?;

        if !notify.has_descriptor(&CLIENT_CHARACTERISTIC_CONFIG_UUID) {
            return Err(Error::DescriptorNotFound {
                uuid: CLIENT_CHARACTERISTIC_CONFIG_UUID.to_string(),
            });
        }

        Ok(Self { write, notify })
    }
}

/// Drive the connect pipeline to completion.
///
/// Subscribes to the transport's disconnect stream first, then walks the
/// transition table. Stage failures stop the pipeline and leave the state at
/// the stage that failed.
pub(crate) async fn run(inner: Arc<SessionInner>) -> Result<()> {
    let disconnects = inner.transport.disconnected().await?;
    spawn_disconnect_watcher(&inner, disconnects);

    info!("Connecting to {}", inner.identity);

    let mut completion = Completion::ConnectRequested;
    loop {
        let action = inner.advance(completion)?;
        match perform(&inner, action).await? {
            Some(next) => completion = next,
            None => return Ok(()),
        }
    }
}

/// Perform one action, returning the completion it produced.
///
/// `None` means the action has no follow-up stage.
pub(crate) async fn perform(inner: &Arc<SessionInner>, action: Action) -> Result<Option<Completion>> {
    let transport = &inner.transport;

    match action {
        Action::Connect => {
            transport
                .connect()
                .await
                .map_err(|e| Error::at_stage(SessionState::Connecting, e))?;
            debug!("Transport connected to {}", inner.identity);
            Ok(Some(Completion::Connected))
        }
        Action::DiscoverServices => {
            transport
                .discover_services()
                .await
                .map_err(|e| Error::at_stage(SessionState::ResolvingEndpoints, e))?;
            Ok(Some(Completion::ServicesDiscovered))
        }
        Action::ResolveEndpoints => {
            let endpoints = UartEndpoints::resolve(transport.as_ref())?;
            inner.set_endpoints(endpoints)?;

            info!("Connected to {}", inner.identity);
            // Observers hear `connected` before notifications are live.
            inner.emit(UartEvent::Connected);

            Ok(Some(Completion::EndpointsResolved))
        }
        Action::WriteDescriptor => {
            let notify = inner.notify_endpoint()?;
            let write = notify
                .descriptor_write(CLIENT_CHARACTERISTIC_CONFIG_UUID, &ENABLE_NOTIFICATION_VALUE);

            transport
                .write_descriptor(&write)
                .await
                .map_err(|e| Error::at_stage(SessionState::Subscribing, e))?;
            Ok(Some(Completion::DescriptorWritten))
        }
        Action::EnableNotifications => {
            let notify = inner.notify_endpoint()?;
            let notifications = transport
                .notifications()
                .await
                .map_err(|e| Error::at_stage(SessionState::Ready, e))?;

            transport
                .set_notification(&notify, true)
                .await
                .map_err(|e| Error::at_stage(SessionState::Ready, e))?;

            spawn_notification_listener(inner, notifications, notify.uuid);
            Ok(Some(Completion::NotificationsEnabled))
        }
        Action::Finish => {
            info!("UART session ready on {}", inner.identity);
            Ok(None)
        }
        Action::EmitDisconnected => {
            info!("Disconnected from {}", inner.identity);
            inner.emit(UartEvent::Disconnected);
            Ok(None)
        }
    }
}

/// Feed notify-endpoint payloads into the session until the stream ends or
/// the session is dropped.
fn spawn_notification_listener(
    inner: &Arc<SessionInner>,
    mut notifications: BoxStream<'static, Notification>,
    uuid: Uuid,
) {
    let session = Arc::downgrade(inner);

    tokio::spawn(async move {
        debug!("Notification listener started for {}", uuid);

        while let Some(notification) = notifications.next().await {
            if notification.uuid != uuid {
                continue;
            }

            let Some(inner) = session.upgrade() else {
                break;
            };

            trace!(
                "Notification from {}: {} bytes",
                uuid,
                notification.value.len()
            );
            inner.on_notification(&notification.value);
        }

        debug!("Notification listener stopped for {}", uuid);
    });
}

/// Watch for the first disconnection that applies to the session.
fn spawn_disconnect_watcher(inner: &Arc<SessionInner>, mut disconnects: BoxStream<'static, ()>) {
    let session = Arc::downgrade(inner);

    tokio::spawn(async move {
        while disconnects.next().await.is_some() {
            let Some(inner) = session.upgrade() else {
                break;
            };

            match inner.advance(Completion::TransportDisconnected) {
                Ok(action) => {
                    // Emitting never fails.
                    let _ = perform(&inner, action).await;
                    break;
                }
                Err(e) => debug!("Ignoring disconnect for {}: {}", inner.identity, e),
            }
        }

        debug!("Disconnect watcher stopped");
    });
}
