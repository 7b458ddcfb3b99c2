//! BLE Service, Characteristic and Descriptor UUIDs.
//!
//! Protocol constants for the Nordic UART Service (NUS). None of these are
//! configurable.

use uuid::Uuid;

// UART Service (Nordic NUS - Nordic UART Service)
/// Nordic UART Service UUID.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// UART TX characteristic UUID (the write endpoint, host to device).
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// UART RX characteristic UUID (the notify endpoint, device to host).
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

// Standard GATT descriptors
/// Client Characteristic Configuration Descriptor UUID.
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Value written to the client configuration descriptor to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
