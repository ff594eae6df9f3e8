//! Endpoint rotation across interchangeable Overpass instances.

use tracing::info;

/// Default public Overpass instance pool.
pub const DEFAULT_ENDPOINTS: [&str; 3] = [
    "https://overpass-api.de/api/interpreter",
    "https://overpass.kumi.systems/api/interpreter",
    "https://overpass.osm.ch/api/interpreter",
];

/// Ordered pool of interchangeable endpoints.
///
/// Any request failure advances to the next endpoint, wrapping around.
/// The index lives here, owned by the client object, for the lifetime
/// of the run.
pub struct EndpointRotator {
    endpoints: Vec<String>,
    index: usize,
}

impl EndpointRotator {
    /// Panics if `endpoints` is empty; the pool is build-time data and
    /// an empty pool is a programming error.
    pub fn new(endpoints: Vec<String>) -> Self {
        assert!(!endpoints.is_empty(), "endpoint pool must not be empty");
        Self {
            endpoints,
            index: 0,
        }
    }

    pub fn current(&self) -> &str {
        &self.endpoints[self.index]
    }

    /// Move to the next endpoint after a failure.
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.endpoints.len();
        info!(endpoint = %self.current(), "rotated to next endpoint");
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl Default for EndpointRotator {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect())
    }
}
