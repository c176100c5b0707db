//! Yearwrap - privacy-preserving store for yearly messaging statistics
//!
//! Users upload a summary of a year of messaging activity. The service
//! strips and anonymizes anything that identifies their contacts, keeps
//! the originals aside behind an unlock code, and ranks each record
//! against everyone else who uploaded for the same year.
//!
//! # Architecture
//!
//! - **Tree**: [`StatTree`], the recursive value every component works on
//! - **Privacy**: sanitizer, hydration patching and the unlock gate
//! - **Cohort**: population summaries and per-record percentiles
//! - **Storage**: the [`StatsStorage`] trait and its libsql backend
//! - **API**: axum HTTP surface with injected rate limiters
//! - **Services**: cached LLM commentary
//!
//! # Example
//!
//! ```ignore
//! use yearwrap_core::{LibsqlStorage, NewRecord, Sanitizer, StatsStorage};
//!
//! #[tokio::main]
//! async fn main() -> yearwrap_core::Result<()> {
//!     let storage = LibsqlStorage::new_local("wrap.db").await?;
//!     let raw = serde_json::from_str::<serde_json::Value>(&std::fs::read_to_string("raw.json")?)?;
//!
//!     let sanitized = Sanitizer::default().sanitize(&raw.into());
//!     let id = storage.create_record(&NewRecord::new(2024, sanitized)).await?;
//!     println!("stored {}", id);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cohort;
pub mod config;
pub mod error;
pub mod privacy;
pub mod services;
pub mod storage;
pub mod tree;
pub mod types;

// Re-export commonly used types
pub use cohort::{aggregate, aggregate_records, percentiles, AggregateSummary, CohortReport};
pub use config::ServerConfig;
pub use error::{Result, UnlockError, WrapError};
pub use privacy::{apply_hydration, capture_hydration, Sanitizer, UnlockCode, UnlockGate};
pub use services::{LlmConfig, LlmService};
pub use storage::{
    libsql::{ConnectionMode, LibsqlStorage},
    StatsStorage,
};
pub use tree::StatTree;
pub use types::{
    Comparison, HydrationPayload, NewRecord, RecordId, RecordMetadata, SanitizedTree,
    StatisticsRecord,
};
