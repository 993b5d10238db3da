//! Repository for the `drills` knowledge base.

use carlitos_core::feedback::DrillCandidate;
use sqlx::PgPool;

use crate::models::drill::DrillRow;

pub struct DrillRepo;

impl DrillRepo {
    /// All live drills, ordered by title.
    pub async fn list_candidates(pool: &PgPool) -> Result<Vec<DrillCandidate>, sqlx::Error> {
        let rows = sqlx::query_as::<_, DrillRow>(
            "SELECT id, title, focus_area FROM drills \
             WHERE deleted_at IS NULL \
             ORDER BY title ASC",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(DrillCandidate::from).collect())
    }
}
