use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{TranslationCache, TranslationQuery};
use crate::client::{LibreTranslateClient, TranslationBackend};
use crate::error::TranslateError;
use crate::stats::{StatsSnapshot, TranslationStats};

#[derive(Clone, Debug)]
pub struct TranslateConfig {
    pub url: String,
    pub api_key: Option<SecretString>,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub request_timeout: Duration,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000".to_string(),
            api_key: None,
            cache_ttl: Duration::from_secs(60 * 60),
            cache_capacity: 1000,
            request_timeout: Duration::from_secs(15),
        }
    }
}

fn default_source() -> String {
    "en".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_alternatives() -> u32 {
    3
}

/// Body of `POST /translate`.
#[derive(Clone, Debug, Deserialize)]
pub struct TranslateRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_alternatives")]
    pub alternatives: u32,
}

impl TranslateRequest {
    pub fn into_query(self) -> Result<TranslationQuery, TranslateError> {
        match (self.text, self.target) {
            (Some(text), Some(target)) if !text.is_empty() && !target.is_empty() => {
                Ok(TranslationQuery {
                    text,
                    source: self.source,
                    target,
                    format: self.format,
                    alternatives: self.alternatives,
                })
            }
            _ => Err(TranslateError::MissingParameters),
        }
    }
}

/// Cached, instrumented front for a [`TranslationBackend`].
pub struct TranslationService {
    backend: Arc<dyn TranslationBackend>,
    cache: TranslationCache,
    stats: Mutex<TranslationStats>,
}

impl TranslationService {
    pub fn new(config: &TranslateConfig) -> Result<Self, TranslateError> {
        let client =
            LibreTranslateClient::new(&config.url, config.api_key.clone(), config.request_timeout)?;
        info!(
            endpoint = client.endpoint(),
            api_key = client.has_api_key(),
            "translation backend configured"
        );
        Ok(Self::with_backend(Arc::new(client), config))
    }

    pub fn with_backend(backend: Arc<dyn TranslationBackend>, config: &TranslateConfig) -> Self {
        Self {
            backend,
            cache: TranslationCache::new(config.cache_ttl, config.cache_capacity),
            stats: Mutex::new(TranslationStats::default()),
        }
    }

    pub async fn translate(&self, query: TranslationQuery) -> Result<Value, TranslateError> {
        if let Some(cached) = self.cache.get(&query) {
            self.stats.lock().record_cache_hit();
            debug!(target_lang = %query.target, "translation cache hit");
            return Ok(cached);
        }

        let started = Instant::now();
        match self.backend.translate(&query).await {
            Ok(value) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.stats.lock().record_success(elapsed_ms);
                debug!(target_lang = %query.target, elapsed_ms, "translation succeeded");
                self.cache.insert(query, value.clone());
                Ok(value)
            }
            Err(err) => {
                self.stats.lock().record_failure();
                warn!(target_lang = %query.target, error = %err, "translation failed");
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> TranslationStats {
        self.stats.lock().clone()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let stats = self.stats();
        StatsSnapshot {
            success_rate: stats.success_rate(),
            stats,
            cache_size: self.cache.len(),
        }
    }

    pub fn clear_cache(&self) -> usize {
        let cleared = self.cache.clear();
        info!(cleared, "translation cache cleared");
        cleared
    }
}
