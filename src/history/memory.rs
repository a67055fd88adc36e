//! In-memory history.

use tokio::sync::Mutex;
use uuid::Uuid;

use super::{HistoryStore, require_user};
use crate::{
    error::{GradeError, GradeResult},
    prelude::*,
    record::GradingRecord,
};

/// History kept in memory, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Records, oldest first.
    records: Mutex<Vec<GradingRecord>>,
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn save(&self, record: &GradingRecord) -> GradeResult<GradingRecord> {
        require_user(&record.user_id)?;
        self.records.lock().await.push(record.clone());
        Ok(record.clone())
    }

    async fn list(&self, user_id: &str, limit: usize) -> GradeResult<Vec<GradingRecord>> {
        let user_id = require_user(user_id)?;
        let records = self.records.lock().await;
        // Later saves win ties, since the sort is stable.
        let mut mine = records
            .iter()
            .rev()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        mine.truncate(limit);
        Ok(mine)
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> GradeResult<()> {
        let user_id = require_user(user_id)?;
        let mut records = self.records.lock().await;
        let idx = records
            .iter()
            .position(|record| record.id == id && record.user_id == user_id)
            .ok_or(GradeError::NotFound(id))?;
        records.remove(idx);
        Ok(())
    }
}
