//! Event records as delivered by the catalog backend
//!
//! Coordinates may arrive as numbers or numeric strings. Both are coerced to
//! `f64` while decoding; anything unparseable becomes `NaN` so that the
//! clustering pass can exclude it instead of failing the whole snapshot.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Opaque event identifier (the backend uses integers, strings are accepted too)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    Int(i64),
    Text(String),
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for EventId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self::Text(id)
    }
}

/// A single geolocated event
///
/// Fields other than `id`, `lat` and `long` are kept verbatim in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Latitude in degrees (`NaN` when the backend value was unusable)
    #[serde(default = "not_a_number", deserialize_with = "coerce_coordinate")]
    pub lat: f64,
    /// Longitude in degrees (`NaN` when the backend value was unusable)
    #[serde(
        rename = "long",
        alias = "lng",
        default = "not_a_number",
        deserialize_with = "coerce_coordinate"
    )]
    pub lng: f64,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Event {
    /// Create an event without metadata
    pub fn new(id: impl Into<EventId>, lat: f64, lng: f64) -> Self {
        Self {
            id: id.into(),
            lat,
            lng,
            metadata: Map::new(),
        }
    }

    /// Attach a metadata field
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether both coordinates are usable for clustering and bounding boxes
    #[inline]
    pub fn has_valid_coordinates(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// Full detail payload for one event
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventDetails {
    #[serde(default)]
    pub id: Option<EventId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(default, rename = "endDate")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub organizer: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn not_a_number() -> f64 {
    f64::NAN
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCoordinate {
    Number(f64),
    Text(String),
    Other(Value),
}

fn coerce_coordinate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let coordinate = match RawCoordinate::deserialize(deserializer)? {
        RawCoordinate::Number(value) => value,
        RawCoordinate::Text(text) => text.trim().parse::<f64>().unwrap_or(f64::NAN),
        RawCoordinate::Other(_) => f64::NAN,
    };
    Ok(coordinate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coordinates() {
        let event: Event = serde_json::from_str(r#"{"id": 1, "lat": 12.97, "long": 77.59}"#).unwrap();
        assert_eq!(event.id, EventId::Int(1));
        assert_eq!(event.lat, 12.97);
        assert_eq!(event.lng, 77.59);
        assert!(event.metadata.is_empty());
        assert!(event.has_valid_coordinates());
    }

    #[test]
    fn test_string_coordinates_are_coerced() {
        let event: Event =
            serde_json::from_str(r#"{"id": "a", "lat": " 12.5 ", "long": "77.25"}"#).unwrap();
        assert_eq!(event.id, EventId::from("a"));
        assert_eq!(event.lat, 12.5);
        assert_eq!(event.lng, 77.25);
    }

    #[test]
    fn test_unparseable_coordinates_become_nan() {
        let event: Event =
            serde_json::from_str(r#"{"id": 2, "lat": "north-ish", "long": null}"#).unwrap();
        assert!(event.lat.is_nan());
        assert!(event.lng.is_nan());
        assert!(!event.has_valid_coordinates());

        let missing: Event = serde_json::from_str(r#"{"id": 3, "lat": 1.0}"#).unwrap();
        assert!(missing.lng.is_nan());
    }

    #[test]
    fn test_metadata_passes_through() {
        let event: Event = serde_json::from_str(
            r#"{"id": 4, "lat": 1, "long": 2, "name": "Jazz night", "tags": ["music"]}"#,
        )
        .unwrap();
        assert_eq!(event.metadata["name"], "Jazz night");
        assert_eq!(event.metadata["tags"][0], "music");
    }

    #[test]
    fn test_lng_alias() {
        let event: Event = serde_json::from_str(r#"{"id": 5, "lat": 1, "lng": 2}"#).unwrap();
        assert_eq!(event.lng, 2.0);
    }

    #[test]
    fn test_event_id_display() {
        assert_eq!(EventId::from(42).to_string(), "42");
        assert_eq!(EventId::from("evt-9").to_string(), "evt-9");
    }

    #[test]
    fn test_details_decoding() {
        let details: EventDetails = serde_json::from_str(
            r#"{
                "id": 11, "lat": 12.9, "long": 77.6, "name": "Open mic",
                "description": null, "startDate": "2024-05-01T18:00:00Z",
                "venue": "The Hall", "keyword_names": ["comedy"]
            }"#,
        )
        .unwrap();
        assert_eq!(details.id, Some(EventId::Int(11)));
        assert_eq!(details.name, "Open mic");
        assert_eq!(details.start_date.as_deref(), Some("2024-05-01T18:00:00Z"));
        assert_eq!(details.venue.as_deref(), Some("The Hall"));
        assert!(details.end_date.is_none());
        assert_eq!(details.extra["keyword_names"][0], "comedy");
    }
}
