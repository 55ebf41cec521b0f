use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata record for one ingested artifact.
///
/// Created once, after the bytes are durably written; never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,

    /// Backend-relative path of the stored object.
    pub path: String,

    pub filename: String,

    /// Size reported by the destination after the write.
    pub size: u64,

    pub content_type: String,

    /// Hex SHA-256 of the ingested bytes.
    pub checksum: String,

    /// Name of the connection the artifact was written to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    pub created_at: DateTime<Utc>,
}
