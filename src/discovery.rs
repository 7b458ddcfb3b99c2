//! Discovery of UART devices.
//!
//! [`find_first`] scans for the first device advertising a service and wraps
//! it in a not-yet-connected [`UartSession`]. The scan is stopped as soon as
//! that device is seen; later advertisements are never looked at.
//!
//! There is no timeout by default: if nothing matches, the result never
//! resolves. Use [`find_first_within`] (or
//! [`DiscoverySession::first_match_within`]) to bound it; those stop the scan
//! when the limit passes. Wrapping [`find_first`] in `tokio::time::timeout`
//! instead drops the discovery without stopping the scan, so the caller must
//! then call [`ScanPrimitive::stop`] itself.

use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::scanner::ScanPrimitive;
use crate::ble::transport::GattTransport;
use crate::ble::uuids::UART_SERVICE_UUID;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::session::UartSession;

/// An in-progress scan for one device.
///
/// Created by [`start`](Self::start) and consumed by
/// [`first_match`](Self::first_match),
/// [`first_match_within`](Self::first_match_within) or
/// [`cancel`](Self::cancel). Each calls the scanner's `stop` exactly once.
pub struct DiscoverySession<'a, S: ScanPrimitive + ?Sized> {
    scanner: &'a S,
    service: Uuid,
    matches: Option<BoxStream<'static, Arc<dyn GattTransport>>>,
    config: SessionConfig,
}

impl<'a, S: ScanPrimitive + ?Sized> DiscoverySession<'a, S> {
    /// Start scanning for devices advertising `service`.
    ///
    /// # Errors
    ///
    /// Returns the scanner's error if the scan cannot be started.
    pub async fn start(scanner: &'a S, service: Uuid) -> Result<Self> {
        let matches = scanner.start(service).await?;
        debug!("Discovery started for service {}", service);

        Ok(Self {
            scanner,
            service,
            matches: Some(matches),
            config: SessionConfig::default(),
        })
    }

    /// Configuration for the session created on a match.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Service this discovery filters on.
    pub fn service(&self) -> Uuid {
        self.service
    }

    /// Wait for the first matching device and stop the scan.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScanEnded`] if the scanner stops producing
    /// advertisements before any match.
    pub async fn first_match(mut self) -> Result<UartSession> {
        let found = self.next_match().await;
        self.finish(found).await
    }

    /// Like [`first_match`](Self::first_match), but give up after `limit`.
    ///
    /// The scan is stopped either way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DiscoveryTimeout`] if nothing matched in time.
    pub async fn first_match_within(mut self, limit: Duration) -> Result<UartSession> {
        let outcome = tokio::time::timeout(limit, self.next_match()).await;
        match outcome {
            Ok(found) => self.finish(found).await,
            Err(_) => {
                debug!("Discovery for {} timed out after {:?}", self.service, limit);
                self.stop().await?;
                Err(Error::DiscoveryTimeout(limit))
            }
        }
    }

    async fn next_match(&mut self) -> Option<Arc<dyn GattTransport>> {
        match self.matches.as_mut() {
            Some(matches) => matches.next().await,
            None => None,
        }
    }

    async fn finish(&mut self, found: Option<Arc<dyn GattTransport>>) -> Result<UartSession> {
        if let Err(e) = self.stop().await {
            warn!("Failed to stop scan: {}", e);
        }

        let transport = found.ok_or(Error::ScanEnded)?;
        info!("Found UART device {}", transport.identity());

        Ok(UartSession::with_config(transport, self.config.clone()))
    }

    /// Stop scanning without waiting for a match.
    pub async fn cancel(mut self) -> Result<()> {
        debug!("Discovery cancelled for service {}", self.service);
        self.stop().await
    }

    async fn stop(&mut self) -> Result<()> {
        // Dropping the stream discards any advertisement already queued.
        if self.matches.take().is_none() {
            return Ok(());
        }
        self.scanner.stop().await
    }
}

impl<S: ScanPrimitive + ?Sized> Drop for DiscoverySession<'_, S> {
    fn drop(&mut self) {
        if self.matches.is_some() {
            warn!(
                "Discovery for {} dropped while scanning; call cancel() to stop the scan",
                self.service
            );
        }
    }
}

/// Find the first device advertising `service`.
pub async fn find_first<S: ScanPrimitive + ?Sized>(
    scanner: &S,
    service: Uuid,
) -> Result<UartSession> {
    DiscoverySession::start(scanner, service)
        .await?
        .first_match()
        .await
}

/// Find the first device advertising the Nordic UART Service.
pub async fn find_first_uart<S: ScanPrimitive + ?Sized>(scanner: &S) -> Result<UartSession> {
    find_first(scanner, UART_SERVICE_UUID).await
}

/// Find the first device advertising `service`, giving up after `limit`.
///
/// The scan is stopped whether or not a device was found.
pub async fn find_first_within<S: ScanPrimitive + ?Sized>(
    scanner: &S,
    service: Uuid,
    limit: Duration,
) -> Result<UartSession> {
    DiscoverySession::start(scanner, service)
        .await?
        .first_match_within(limit)
        .await
}
