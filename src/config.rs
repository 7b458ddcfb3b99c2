//! Session configuration.

/// Tunables for a [`UartSession`](crate::UartSession).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Request a response for writes to the TX characteristic.
    ///
    /// The caller never waits for the response either way.
    pub write_with_response: bool,
    /// Capacity of the broadcast channel behind
    /// [`UartSession::subscribe`](crate::UartSession::subscribe).
    pub event_channel_capacity: usize,
}

impl SessionConfig {
    /// Default capacity of the event broadcast channel.
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether writes request a response.
    pub fn with_write_response(mut self, with_response: bool) -> Self {
        self.write_with_response = with_response;
        self
    }

    /// Set the event channel capacity (minimum 1).
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_with_response: false,
            event_channel_capacity: Self::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::new();
        assert!(!config.write_with_response);
        assert_eq!(config.event_channel_capacity, 64);
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new()
            .with_write_response(true)
            .with_event_channel_capacity(0);
        assert!(config.write_with_response);
        assert_eq!(config.event_channel_capacity, 1);
    }
}
