//! Text translation through a LibreTranslate-compatible HTTP endpoint, with a response cache and
//! running statistics.

pub mod cache;
pub mod client;
pub mod error;
pub mod service;
pub mod stats;

pub use cache::{TranslationQuery, TranslationCache};
pub use client::{LibreTranslateClient, TranslationBackend};
pub use error::TranslateError;
pub use service::{TranslateConfig, TranslateRequest, TranslationService};
pub use stats::{StatsSnapshot, TranslationStats};
