/// Opaque node identifier (UUID v4 string).
pub type NodeId = String;

/// Opaque job identifier (UUID v4 string).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh opaque identifier for a node or job.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
