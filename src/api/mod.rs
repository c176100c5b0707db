//! HTTP API for uploads, shared pages and the admin view
//!
//! Provides:
//! - Upload, view, unlock and percentile endpoints for single records
//! - Two-year comparison pages
//! - Admin cohort report
//! - Cached stat commentary

pub mod rate_limit;
pub mod server;

pub use rate_limit::{FixedWindowLimiter, RateDecision, RateLimiters};
pub use server::{build_router, ApiError, ApiServer, AppState};
