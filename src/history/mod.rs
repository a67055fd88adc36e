//! Grading history.
//!
//! Records are keyed by user. The default [`memory::MemoryStore`] lasts as
//! long as the process, which is fine for a single user on a laptop. For
//! anything shared, use [`supabase::SupabaseStore`].

use std::{fmt, sync::Arc};

use clap::{Args, ValueEnum};
use uuid::Uuid;

use crate::{
    error::{GradeError, GradeResult},
    prelude::*,
    record::GradingRecord,
};

pub mod memory;
pub mod supabase;

/// How many records we list by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// The most records we list at once.
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Keep a requested list size within `1..=MAX_HISTORY_LIMIT`.
pub fn clamp_history_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_HISTORY_LIMIT)
}

/// Where we keep grading records.
#[async_trait]
pub trait HistoryStore: fmt::Debug + Send + Sync + 'static {
    /// Save a record, returning it as stored.
    async fn save(&self, record: &GradingRecord) -> GradeResult<GradingRecord>;

    /// List up to `limit` of a user's records, newest first.
    async fn list(&self, user_id: &str, limit: usize) -> GradeResult<Vec<GradingRecord>>;

    /// Delete one of a user's records.
    async fn delete(&self, user_id: &str, id: Uuid) -> GradeResult<()>;
}

/// Check that we have a user to act for.
pub fn require_user(user_id: &str) -> GradeResult<&str> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        Err(GradeError::Unauthenticated)
    } else {
        Ok(user_id)
    }
}

/// Our history backends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum StoreType {
    /// Keep history in memory until the server exits.
    #[default]
    Memory,
    /// Supabase (PostgREST).
    Supabase,
}

/// History store options.
#[derive(Args, Clone, Debug)]
pub struct StoreOpts {
    /// Where to keep grading history.
    #[clap(long = "store", value_enum, default_value_t = StoreType::default())]
    pub store: StoreType,

    /// The Supabase project URL, like `https://abc.supabase.co`.
    #[clap(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// The Supabase API key.
    #[clap(long, env = "SUPABASE_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,

    /// The Supabase table holding grading records.
    #[clap(long, default_value = "grading_records")]
    pub supabase_table: String,
}

impl Default for StoreOpts {
    fn default() -> Self {
        Self {
            store: StoreType::default(),
            supabase_url: None,
            supabase_key: None,
            supabase_table: "grading_records".to_owned(),
        }
    }
}

impl StoreOpts {
    /// Create the configured store.
    pub fn create_store(&self) -> Result<Arc<dyn HistoryStore>> {
        match self.store {
            StoreType::Memory => Ok(Arc::new(memory::MemoryStore::default())),
            StoreType::Supabase => {
                let url = self
                    .supabase_url
                    .as_deref()
                    .ok_or_else(|| anyhow!("--store=supabase requires SUPABASE_URL"))?;
                let key = self
                    .supabase_key
                    .as_deref()
                    .ok_or_else(|| anyhow!("--store=supabase requires SUPABASE_KEY"))?;
                Ok(Arc::new(supabase::SupabaseStore::new(
                    url,
                    key,
                    &self.supabase_table,
                )?))
            }
        }
    }
}
