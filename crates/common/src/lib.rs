//! NexoraOS Common Library
//!
//! Shared code for the NexoraOS gateway and poller including:
//! - Database models, storage traits and their implementations
//! - The LLM client with retry and tolerant JSON parsing
//! - The staged ebook generation pipeline and client-side poller
//! - Monetization catalog, analytics aggregation and the payment webhook
//! - Error types, configuration, authentication and metrics

pub mod analytics;
pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod monetization;
pub mod pipeline;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use db::{MemoryStore, Repository};
pub use llm::LlmClient;
pub use monetization::Catalog;
pub use pipeline::EbookPipeline;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
