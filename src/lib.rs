//! Prospect - grid-based point-of-interest discovery for the directory.
//!
//! This library provides the discovery engine used by the discover binary:
//! grid generation, category translation, the Overpass client, adaptive
//! cell subdivision and the candidate writer.

pub mod config;
pub mod discord;
pub mod grid;
pub mod models;
pub mod orchestrator;
pub mod overpass;
pub mod store;
pub mod subdivide;
pub mod tags;
pub mod telemetry;

pub use models::{NormalizedPlace, OsmType, PlaceState, RawElement};
