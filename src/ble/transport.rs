//! The GATT transport boundary.
//!
//! [`GattTransport`] is everything the connect pipeline needs from the radio
//! stack. The btleplug-backed implementation lives in
//! [`peripheral`](crate::ble::peripheral); tests drive the pipeline with an
//! in-memory fake.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;

/// Opaque identity of a remote device (platform address or identifier).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Create an identity from its platform representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A characteristic exposed by the remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// UUID of the service the characteristic belongs to.
    pub service_uuid: Uuid,
    /// UUID of the characteristic.
    pub uuid: Uuid,
    /// UUIDs of the descriptors attached to the characteristic.
    pub descriptors: Vec<Uuid>,
}

impl Endpoint {
    /// Check if the characteristic carries a descriptor.
    pub fn has_descriptor(&self, uuid: &Uuid) -> bool {
        self.descriptors.contains(uuid)
    }

    /// Build a write of `value` to one of this characteristic's descriptors.
    pub fn descriptor_write(&self, uuid: Uuid, value: &[u8]) -> DescriptorWrite {
        DescriptorWrite {
            service_uuid: self.service_uuid,
            characteristic_uuid: self.uuid,
            uuid,
            value: value.to_vec(),
        }
    }
}

/// A resolved GATT service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// UUID of the service.
    pub uuid: Uuid,
    /// Characteristics within the service.
    pub characteristics: Vec<Endpoint>,
}

impl Service {
    /// Look up a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&Endpoint> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// A pending write to a characteristic descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// UUID of the owning characteristic.
    pub characteristic_uuid: Uuid,
    /// UUID of the descriptor.
    pub uuid: Uuid,
    /// Value to write.
    pub value: Vec<u8>,
}

/// Value pushed by the device on a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// UUID of the characteristic that sent the notification.
    pub uuid: Uuid,
    /// The notification payload.
    pub value: Vec<u8>,
}

/// Connection and characteristic primitives of a single remote device.
///
/// Every `async` method is one request whose completion the connect
/// pipeline awaits before issuing the next stage.
#[async_trait]
pub trait GattTransport: Send + Sync {
    /// Identity of the remote device.
    fn identity(&self) -> DeviceIdentity;

    /// Establish the transport connection.
    async fn connect(&self) -> Result<()>;

    /// Discover services and characteristics.
    async fn discover_services(&self) -> Result<()>;

    /// Look up a discovered service.
    fn service(&self, uuid: &Uuid) -> Option<Service>;

    /// Write a characteristic descriptor.
    async fn write_descriptor(&self, write: &DescriptorWrite) -> Result<()>;

    /// Enable or disable notifications on a characteristic.
    async fn set_notification(&self, endpoint: &Endpoint, enabled: bool) -> Result<()>;

    /// Issue a write to a characteristic without waiting for it to complete.
    fn write_characteristic(&self, endpoint: &Endpoint, value: &[u8], with_response: bool);

    /// Stream of notifications from all subscribed characteristics.
    async fn notifications(&self) -> Result<BoxStream<'static, Notification>>;

    /// Stream yielding once per transport-level disconnection.
    async fn disconnected(&self) -> Result<BoxStream<'static, ()>>;

    /// Request transport-level disconnection.
    async fn disconnect(&self) -> Result<()>;
}
