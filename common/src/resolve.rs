use alloc::{string::String, vec::Vec};
use serde::{Deserialize, Serialize};

// Placeholders used when the resolver leaves a field out
pub const UNKNOWN_TITLE: &str = "Unknown name";
pub const UNKNOWN_URL: &str = "Unknown url";
pub const UNKNOWN_DESCRIPTION: &str = "Unknown description";
pub const DEFAULT_FAVICON: &str = "/favicon.ico";

/// Coarse location sent along with every lookup
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// One device in a lookup batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanObject {
    pub url: String,
    pub rssi: i32,
}

/// Body of `POST /resolve-scan`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub location: Location,
    pub objects: Vec<ScanObject>,
}

/// A single metadata entry returned by the resolver. `id` is the url that
/// was submitted for the device and is the only required field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
}

#[cfg(feature = "std")]
impl MetadataRecord {
    /// Decode one entry of the `metadata` array on its own, so a bad entry
    /// doesn't take the rest of the batch down with it.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Body returned by `POST /resolve-scan`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub metadata: Vec<MetadataRecord>,
}
