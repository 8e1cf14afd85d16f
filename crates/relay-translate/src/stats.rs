use serde::Serialize;

/// Running translation counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationStats {
    pub total_requests: u64,
    pub successful_translations: u64,
    pub failed_translations: u64,
    pub cache_hits: u64,
    /// Mean upstream latency over successful translations, in milliseconds.
    pub average_response_time: f64,
}

impl TranslationStats {
    pub fn record_success(&mut self, elapsed_ms: f64) {
        self.total_requests += 1;
        self.successful_translations += 1;
        let n = self.successful_translations as f64;
        self.average_response_time += (elapsed_ms - self.average_response_time) / n;
    }

    pub fn record_failure(&mut self) {
        self.total_requests += 1;
        self.failed_translations += 1;
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    /// Success percentage with two decimals, `"0%"` before any request.
    pub fn success_rate(&self) -> String {
        if self.total_requests == 0 {
            return "0%".to_string();
        }
        let rate = self.successful_translations as f64 / self.total_requests as f64 * 100.0;
        format!("{rate:.2}%")
    }
}

/// What `/translation-stats` reports.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    #[serde(flatten)]
    pub stats: TranslationStats,
    pub cache_size: usize,
    pub success_rate: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_mean_of_successes() {
        let mut stats = TranslationStats::default();
        stats.record_success(100.0);
        stats.record_failure();
        stats.record_success(300.0);
        assert_eq!(stats.average_response_time, 200.0);
        assert_eq!(stats.total_requests, 3);
    }

    #[test]
    fn success_rate_formatting() {
        let mut stats = TranslationStats::default();
        assert_eq!(stats.success_rate(), "0%");
        stats.record_success(1.0);
        stats.record_success(1.0);
        stats.record_failure();
        assert_eq!(stats.success_rate(), "66.67%");
    }

    #[test]
    fn snapshot_is_flat_camel_case() {
        let mut stats = TranslationStats::default();
        stats.record_cache_hit();
        let snapshot = StatsSnapshot {
            success_rate: stats.success_rate(),
            stats,
            cache_size: 4,
        };
        let value = serde_json::to_value(snapshot).unwrap();
        assert_eq!(value["cacheHits"], 1);
        assert_eq!(value["cacheSize"], 4);
        assert_eq!(value["successRate"], "0%");
        assert!(value.get("stats").is_none());
    }
}
