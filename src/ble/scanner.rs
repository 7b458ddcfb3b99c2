//! BLE scanning functionality.
//!
//! Provides the scan primitive used to discover UART devices.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::peripheral::PeripheralTransport;
use crate::ble::transport::GattTransport;
use crate::error::{Error, Result};

/// A filtered advertisement scan.
///
/// `start` yields one transport per matching advertisement; `stop` ends the
/// scan and must be safe to call more than once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScanPrimitive: Send + Sync {
    /// Start scanning for devices advertising `service`.
    async fn start(&self, service: Uuid) -> Result<BoxStream<'static, Arc<dyn GattTransport>>>;

    /// Stop scanning.
    async fn stop(&self) -> Result<()>;
}

/// BLE scanner backed by the first available btleplug adapter.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Whether scanning is currently active.
    is_scanning: AtomicBool,
}

impl BleScanner {
    /// Create a new BLE scanner.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a new BLE scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            is_scanning: AtomicBool::new(false),
        }
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Resolve an advertising peripheral, keeping it only if it advertises `service`.
    async fn matching_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        service: Uuid,
    ) -> Option<Arc<dyn GattTransport>> {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        if !properties.services.contains(&service) {
            return None;
        }

        debug!(
            "Matched {} ({:?}, rssi {:?})",
            id, properties.local_name, properties.rssi
        );

        let transport: Arc<dyn GattTransport> =
            Arc::new(PeripheralTransport::new(adapter.clone(), peripheral));
        Some(transport)
    }
}

#[async_trait]
impl ScanPrimitive for BleScanner {
    async fn start(&self, service: Uuid) -> Result<BoxStream<'static, Arc<dyn GattTransport>>> {
        info!("Starting BLE scan for service {}", service);

        let events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await
            .map_err(Error::Bluetooth)?;

        self.is_scanning.store(true, Ordering::SeqCst);

        let adapter = self.adapter.clone();

        Ok(events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move {
                    let id = match event {
                        CentralEvent::DeviceDiscovered(id)
                        | CentralEvent::DeviceUpdated(id)
                        | CentralEvent::ServicesAdvertisement { id, .. } => id,
                        _ => return None,
                    };
                    Self::matching_peripheral(&adapter, id, service).await
                }
            })
            .boxed())
    }

    async fn stop(&self) -> Result<()> {
        if !self.is_scanning.swap(false, Ordering::SeqCst) {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        self.is_scanning.store(false, Ordering::SeqCst);
    }
}
