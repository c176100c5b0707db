//! Storage layer for yearwrap
//!
//! Persists sanitized statistics records, their write-once unlock material,
//! comparison pages and the commentary cache.

pub mod libsql;

use crate::error::Result;
use crate::types::{Comparison, NewRecord, RecordId, StatisticsRecord, UnlockMaterial};
use async_trait::async_trait;

/// Storage backend trait defining all required operations
#[async_trait]
pub trait StatsStorage: Send + Sync {
    /// Store a new record and return its generated id
    async fn create_record(&self, record: &NewRecord) -> Result<RecordId>;

    /// Read a record without touching its view counter
    async fn get_record(&self, year: i32, id: &RecordId) -> Result<Option<StatisticsRecord>>;

    /// Increment the view counter and return the updated record
    async fn view_record(&self, year: i32, id: &RecordId) -> Result<Option<StatisticsRecord>>;

    /// Year, unlock code and hydration payload of a record
    async fn unlock_material(&self, id: &RecordId) -> Result<Option<UnlockMaterial>>;

    /// Every record, optionally restricted to one year, oldest first
    async fn list_records(&self, year: Option<i32>) -> Result<Vec<StatisticsRecord>>;

    /// Link two records of different years into a comparison page
    async fn create_comparison(&self, first: &RecordId, second: &RecordId) -> Result<Comparison>;

    /// Increment the view counter of a comparison and return it
    async fn view_comparison(
        &self,
        year1: i32,
        year2: i32,
        id: &RecordId,
    ) -> Result<Option<Comparison>>;

    /// Cached completion for a prompt hash
    async fn cached_completion(&self, prompt_hash: &str) -> Result<Option<String>>;

    /// Remember a completion; an existing entry for the hash is kept
    async fn cache_completion(&self, prompt_hash: &str, prompt: &str, completion: &str)
        -> Result<()>;
}
