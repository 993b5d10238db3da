//! Knowledge-base drill rows.

use carlitos_core::feedback::DrillCandidate;
use carlitos_core::types::DbId;
use sqlx::FromRow;

/// The subset of a `drills` row offered to feedback generation.
#[derive(Debug, Clone, FromRow)]
pub struct DrillRow {
    pub id: DbId,
    pub title: String,
    pub focus_area: Option<String>,
}

impl From<DrillRow> for DrillCandidate {
    fn from(row: DrillRow) -> Self {
        DrillCandidate {
            id: row.id,
            title: row.title,
            focus_area: row.focus_area,
        }
    }
}
