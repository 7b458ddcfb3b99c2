//! Receive buffer for UART notification payloads.

use bytes::{Bytes, BytesMut};

/// Ordered FIFO of received bytes with drain-style reads.
///
/// Bytes are appended in delivery order and always read oldest-first.
/// The buffer has no size limit.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    bytes: BytesMut,
}

impl ReceiveBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a notification payload.
    pub fn extend(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Number of bytes currently held.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Remove and return up to `count` of the oldest bytes.
    ///
    /// Returns fewer bytes than requested if fewer are held.
    pub fn read(&mut self, count: usize) -> Bytes {
        let count = count.min(self.bytes.len());
        self.bytes.split_to(count).freeze()
    }

    /// Remove and return everything held.
    pub fn read_all(&mut self) -> Bytes {
        self.bytes.split().freeze()
    }

    /// Like [`read`](Self::read), decoded as UTF-8.
    ///
    /// A `count` that cuts a multi-byte code point leaves replacement
    /// characters at the cut.
    pub fn read_string(&mut self, count: usize) -> String {
        String::from_utf8_lossy(&self.read(count)).into_owned()
    }

    /// Like [`read_all`](Self::read_all), decoded as UTF-8.
    pub fn read_all_string(&mut self) -> String {
        String::from_utf8_lossy(&self.read_all()).into_owned()
    }
}
