//! Raw Overpass elements and the normalized candidate row shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Type of OSM object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsmType {
    Node,
    Way,
    Relation,
}

impl std::fmt::Display for OsmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsmType::Node => write!(f, "node"),
            OsmType::Way => write!(f, "way"),
            OsmType::Relation => write!(f, "relation"),
        }
    }
}

/// Resolved center point for ways/relations (`out center` output)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}

/// One element of an Overpass response, as received.
///
/// Nodes carry `lat`/`lon` directly; ways and relations carry a `center`
/// when the query asked for one. Anything without resolvable coordinates
/// is dropped during normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawElement {
    #[serde(rename = "type")]
    pub osm_type: OsmType,
    pub id: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub center: Option<Center>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl RawElement {
    /// Resolve coordinates: node lat/lon first, then the way/relation center.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => self.center.map(|c| (c.lat, c.lon)),
        }
    }
}

/// Lifecycle state of a directory record.
///
/// The discovery engine only ever produces `Candidate`; later states are
/// owned by the verification pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceState {
    Candidate,
    Verified,
    Rejected,
}

/// A discovered place, normalized for the candidate writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedPlace {
    /// Stable composite external identifier: "{osm_type}/{osm_id}"
    pub id: String,

    pub name: String,

    /// Assembled from whichever addr:* components were present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    pub lat: f64,
    pub lng: f64,

    /// Category under which this place was discovered
    pub category: String,

    /// Data source identifier
    pub source: String,

    pub state: PlaceState,

    /// Assigned by the downstream classifier, never by discovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,

    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl NormalizedPlace {
    pub fn external_id(osm_type: OsmType, osm_id: i64) -> String {
        format!("{}/{}", osm_type, osm_id)
    }
}
