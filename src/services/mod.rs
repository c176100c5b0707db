//! Services layer for yearwrap
//!
//! Outbound integrations that sit beside the core: currently the LLM
//! commentary client.

pub mod llm;

pub use llm::{Completion, LlmConfig, LlmService};
