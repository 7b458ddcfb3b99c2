//! btleplug-backed GATT transport.
//!
//! Wraps a platform [`Peripheral`] and the [`Adapter`] it was discovered on,
//! so disconnect events can be observed alongside characteristic traffic.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Descriptor, Peripheral as _, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{
    DescriptorWrite, DeviceIdentity, Endpoint, GattTransport, Notification, Service,
};
use crate::ble::uuids::{CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE};
use crate::error::{Error, Result};

/// Value written to the client configuration descriptor to disable notifications.
const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// How a descriptor write is carried out on the platform stack.
///
/// BlueZ and CoreBluetooth refuse direct writes to the client configuration
/// descriptor; they manage it through subscribe and unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorRequest {
    /// Subscribe to the owning characteristic.
    Subscribe,
    /// Unsubscribe from the owning characteristic.
    Unsubscribe,
    /// Write the value to the descriptor as-is.
    Raw,
}

impl DescriptorRequest {
    /// Classify a descriptor write.
    pub fn for_write(write: &DescriptorWrite) -> Self {
        if write.uuid != CLIENT_CHARACTERISTIC_CONFIG_UUID {
            return Self::Raw;
        }

        if write.value == ENABLE_NOTIFICATION_VALUE {
            Self::Subscribe
        } else if write.value == DISABLE_NOTIFICATION_VALUE {
            Self::Unsubscribe
        } else {
            Self::Raw
        }
    }
}

impl From<Characteristic> for Endpoint {
    fn from(characteristic: Characteristic) -> Self {
        Self {
            service_uuid: characteristic.service_uuid,
            uuid: characteristic.uuid,
            descriptors: characteristic
                .descriptors
                .into_iter()
                .map(|d| d.uuid)
                .collect(),
        }
    }
}

/// GATT transport for a btleplug peripheral.
#[derive(Clone)]
pub struct PeripheralTransport {
    /// The adapter the peripheral was discovered on.
    adapter: Adapter,
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Characteristics subscribed through this transport, as (service, characteristic).
    subscribed: Arc<Mutex<HashSet<(Uuid, Uuid)>>>,
}

impl PeripheralTransport {
    /// Create a transport for a peripheral.
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            adapter,
            peripheral,
            subscribed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Find the btleplug characteristic backing an endpoint.
    fn find_characteristic(&self, endpoint: &Endpoint) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == endpoint.uuid && c.service_uuid == endpoint.service_uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: endpoint.uuid.to_string(),
            })
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<()> {
        let key = (characteristic.service_uuid, characteristic.uuid);
        if self.subscribed.lock().contains(&key) {
            debug!("Already subscribed to {}", characteristic.uuid);
            return Ok(());
        }

        self.peripheral.subscribe(characteristic).await?;
        self.subscribed.lock().insert(key);
        debug!("Subscribed to {}", characteristic.uuid);
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<()> {
        let key = (characteristic.service_uuid, characteristic.uuid);
        if !self.subscribed.lock().contains(&key) {
            debug!("Not subscribed to {}, nothing to undo", characteristic.uuid);
            return Ok(());
        }

        self.peripheral.unsubscribe(characteristic).await?;
        self.subscribed.lock().remove(&key);
        debug!("Unsubscribed from {}", characteristic.uuid);
        Ok(())
    }
}

#[async_trait]
impl GattTransport for PeripheralTransport {
    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.peripheral.id().to_string())
    }

    async fn connect(&self) -> Result<()> {
        self.peripheral.connect().await.map_err(Error::Bluetooth)
    }

    async fn discover_services(&self) -> Result<()> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;

        debug!(
            "Discovered {} services on {}",
            self.peripheral.services().len(),
            self.identity()
        );

        Ok(())
    }

    fn service(&self, uuid: &Uuid) -> Option<Service> {
        self.peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == *uuid)
            .map(|s| Service {
                uuid: s.uuid,
                characteristics: s.characteristics.into_iter().map(Endpoint::from).collect(),
            })
    }

    async fn write_descriptor(&self, write: &DescriptorWrite) -> Result<()> {
        let request = DescriptorRequest::for_write(write);
        trace!("Descriptor write to {} as {:?}", write.uuid, request);

        if request == DescriptorRequest::Raw {
            let descriptor = Descriptor {
                uuid: write.uuid,
                service_uuid: write.service_uuid,
                characteristic_uuid: write.characteristic_uuid,
            };

            return self
                .peripheral
                .write_descriptor(&descriptor, &write.value)
                .await
                .map_err(Error::Bluetooth);
        }

        let characteristic = self.find_characteristic(&Endpoint {
            service_uuid: write.service_uuid,
            uuid: write.characteristic_uuid,
            descriptors: Vec::new(),
        })?;

        match request {
            DescriptorRequest::Subscribe => self.subscribe(&characteristic).await,
            _ => self.unsubscribe(&characteristic).await,
        }
    }

    async fn set_notification(&self, endpoint: &Endpoint, enabled: bool) -> Result<()> {
        let characteristic = self.find_characteristic(endpoint)?;

        if enabled {
            self.subscribe(&characteristic).await
        } else {
            self.unsubscribe(&characteristic).await
        }
    }

    fn write_characteristic(&self, endpoint: &Endpoint, value: &[u8], with_response: bool) {
        let characteristic = match self.find_characteristic(endpoint) {
            Ok(c) => c,
            Err(e) => {
                warn!("Dropping write of {} bytes: {}", value.len(), e);
                return;
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(
                    "Dropping write of {} bytes: no tokio runtime to issue it on",
                    value.len()
                );
                return;
            }
        };

        let peripheral = self.peripheral.clone();
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        let data = value.to_vec();

        runtime.spawn(async move {
            match peripheral.write(&characteristic, &data, write_type).await {
                Ok(()) => trace!(
                    "Wrote {} bytes to characteristic {}",
                    data.len(),
                    characteristic.uuid
                ),
                Err(e) => warn!("Write to {} failed: {}", characteristic.uuid, e),
            }
        });
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
        let notifications = self.peripheral.notifications().await?;

        Ok(notifications
            .map(|n| Notification {
                uuid: n.uuid,
                value: n.value,
            })
            .boxed())
    }

    async fn disconnected(&self) -> Result<BoxStream<'static, ()>> {
        let events = self.adapter.events().await?;
        let id = self.peripheral.id();

        Ok(events
            .filter_map(move |event| {
                let matched = matches!(event, CentralEvent::DeviceDisconnected(ref d) if *d == id);
                async move { matched.then_some(()) }
            })
            .boxed())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await.map_err(Error::Bluetooth)
    }
}
