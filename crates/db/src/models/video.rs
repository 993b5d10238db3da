//! Video rows as written by the upload subsystem.

use carlitos_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `videos` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Video {
    pub id: DbId,
    pub filename: String,
    /// Object key in the video bucket (or path under the local storage root).
    pub storage_path: String,
    pub format: Option<String>,
    pub size_bytes: Option<i64>,
    pub extra_metadata: serde_json::Value,
    pub uploaded_by: Option<DbId>,
    pub created_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Video {
    /// `extra_metadata.stroke_type`, when the uploader recorded one.
    pub fn stroke_type(&self) -> Option<String> {
        self.extra_metadata
            .get("stroke_type")
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn video(extra: serde_json::Value) -> Video {
        Video {
            id: Uuid::new_v4(),
            filename: "serve.mp4".into(),
            storage_path: "videos/serve.mp4".into(),
            format: Some("mp4".into()),
            size_bytes: Some(1024),
            extra_metadata: extra,
            uploaded_by: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn stroke_type_from_metadata() {
        assert_eq!(
            video(json!({ "stroke_type": "Serve" })).stroke_type().as_deref(),
            Some("Serve")
        );
    }

    #[test]
    fn stroke_type_absent_or_blank() {
        assert_eq!(video(json!({})).stroke_type(), None);
        assert_eq!(video(json!({ "stroke_type": " " })).stroke_type(), None);
        assert_eq!(video(json!({ "stroke_type": 3 })).stroke_type(), None);
    }
}
