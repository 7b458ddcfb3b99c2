//! BLE communication module.
//!
//! This module provides the low-level Bluetooth Low Energy boundary: the
//! transport and scan traits the session is built on, and their btleplug
//! implementations.

pub mod peripheral;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use peripheral::PeripheralTransport;
pub use scanner::{BleScanner, ScanPrimitive};
pub use transport::{
    DescriptorWrite, DeviceIdentity, Endpoint, GattTransport, Notification, Service,
};
pub use uuids::*;
