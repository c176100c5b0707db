//! Privacy layer: sanitizing uploads and selectively revealing them again
//!
//! Data flows raw tree → [`sanitizer`] → storage. A submitter who kept the
//! unlock code can pass it through [`unlock`] to get the hydration payload,
//! which [`hydration`] patches back onto a copy of the stored tree.

pub mod hydration;
pub mod sanitizer;
pub mod unlock;

pub use hydration::{apply_hydration, capture_hydration, merge_rule_for, parse_path, MergeRule};
pub use sanitizer::{anonymize_identifier, residual_pii, sanitize, SanitizePolicy, Sanitizer};
pub use unlock::{verify_unlock, UnlockCode, UnlockGate};
