//! Core data models for the discovery engine.

pub mod place;

pub use place::{Center, NormalizedPlace, OsmType, PlaceState, RawElement};
