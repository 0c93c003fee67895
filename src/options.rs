//! Connection-time configuration knobs (SPEC_FULL.md "Configuration"):
//! the set of parameters a caller passes when opening a connection, not a
//! daemon's startup file.

/// Builder for the knobs a connection's typed objects are constructed
/// with. `Default` matches the values named directly in spec.md.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Capacity of a streaming result's row queue (spec.md §4.5 "capacity
    /// on the order of 100").
    pub row_queue_capacity: usize,
    /// The protocol-version path segment the driver layer decorates the
    /// transport URL with (spec.md §6 "a trailing protocol-version
    /// segment (`/v1`)").
    pub protocol_path: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            row_queue_capacity: 100,
            protocol_path: "/v1".to_owned(),
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_queue_capacity(mut self, capacity: usize) -> Self {
        self.row_queue_capacity = capacity;
        self
    }

    pub fn protocol_path(mut self, path: impl Into<String>) -> Self {
        self.protocol_path = path.into();
        self
    }
}
