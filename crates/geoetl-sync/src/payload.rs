use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Coordinates pushed by (or pulled from) an external system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatePayload {
    #[serde(default)]
    pub batch_id: String,
    pub points: Vec<CoordinatePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatePoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// What the ingest side accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub batch_id: String,
    pub accepted: usize,
}
