// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # nus-uart
//!
//! A cross-platform Rust library for talking to devices that expose the
//! Nordic UART Service (NUS) over Bluetooth Low Energy.
//!
//! The device side of a NUS link is a serial port: bytes written to the TX
//! characteristic arrive at the device, and bytes the device sends arrive as
//! notifications on the RX characteristic. This crate finds such a device,
//! runs the GATT setup needed to receive those notifications, buffers what
//! arrives, and tells you when something happened.
//!
//! ## Features
//!
//! - **Discovery**: Find the first device advertising the UART service
//! - **Connection Pipeline**: Connect, discover services, resolve endpoints,
//!   enable notifications, in that order
//! - **Receive Buffer**: Notifications are appended in arrival order and
//!   read back as bytes or strings
//! - **Events**: Observers and a broadcast channel both see `Connected`,
//!   `Disconnected` and `DataAvailable`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nus_uart::{find_first_uart, BleScanner, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scanner = BleScanner::new().await?;
//!
//!     // Resolves on the first UART advertisement; the scan is stopped.
//!     let session = find_first_uart(&scanner).await?;
//!     println!("Found {}", session.identity());
//!
//!     let mut events = session.subscribe();
//!     session.connect().await?;
//!
//!     session.write_str("hello\n");
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{}: {}", event, session.read_all_string());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for events and configuration

// Public modules
pub mod ble;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod events;
pub mod session;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::SessionConfig;
pub use connection::SessionState;
pub use discovery::{find_first, find_first_uart, find_first_within, DiscoverySession};
pub use error::{Error, Result};
pub use events::{UartEvent, UartObserver};
pub use session::{PendingConnect, UartSession};

// Re-export commonly used types from submodules
pub use ble::{
    BleScanner, DeviceIdentity, GattTransport, PeripheralTransport, ScanPrimitive,
    CLIENT_CHARACTERISTIC_CONFIG_UUID, UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID,
};
