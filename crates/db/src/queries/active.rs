// crates/db/src/queries/active.rs
// Per-user active job pointer.

use jobstream_core::JobId;

use super::jobs::now_ms;
use crate::{Database, DbResult};

impl Database {
    /// The job the user's pointer references, if it has not expired.
    pub async fn active_job_for_user(&self, user_id: &str) -> DbResult<Option<JobId>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT job_id FROM active_jobs WHERE user_id = ?1 AND expires_at > ?2",
        )
        .bind(user_id)
        .bind(now_ms())
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(id,)| JobId::from(id)))
    }

    pub async fn delete_active_job(&self, user_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM active_jobs WHERE user_id = ?1")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
