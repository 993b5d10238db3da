//! Repository for the `videos` table (read-only from the pipeline).

use carlitos_core::types::DbId;
use sqlx::PgPool;

use crate::models::video::Video;

const COLUMNS: &str = "id, filename, storage_path, format, size_bytes, extra_metadata, \
     uploaded_by, created_at, deleted_at";

pub struct VideoRepo;

impl VideoRepo {
    /// Find a video by id. Excludes soft-deleted rows.
    pub async fn find_active(pool: &PgPool, id: DbId) -> Result<Option<Video>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM videos WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, Video>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
