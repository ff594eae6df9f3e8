//! Overpass API access: rate limiting, endpoint rotation and the
//! spatial query client.

pub mod client;
pub mod limiter;
pub mod rotator;

pub use client::{CellQuerier, CellQueryOutcome, ClientConfig, QueryError, SpatialQueryClient};
pub use limiter::RateLimiter;
pub use rotator::EndpointRotator;
