use serde::{Deserialize, Serialize};

/// Orchestrator tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OrchestratorConfig {
    /// Retry budget per page.
    pub max_retries_per_page: u32,
    /// Extraction tasks dispatched per batch within a domain.
    pub extraction_batch_size: usize,
    /// Base retry delay; attempt `n` waits `base * (n + 1)` seconds.
    pub retry_base_delay_secs: u64,
    /// Ceiling on the retry delay.
    pub retry_max_delay_secs: u64,
    /// Soft per-task deadline: the task fails cleanly when it elapses.
    pub soft_deadline_secs: u64,
    /// Hard per-task deadline: the task is rejected outright.
    pub hard_deadline_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries_per_page: 3,
            extraction_batch_size: 50,
            retry_base_delay_secs: 300,
            retry_max_delay_secs: 1800,
            soft_deadline_secs: 6600,  // 1h50m
            hard_deadline_secs: 7200,  // 2h
        }
    }
}

impl OrchestratorConfig {
    /// Backoff before retry attempt `retry_count + 1`.
    pub fn retry_delay_secs(&self, retry_count: u32) -> u64 {
        (self.retry_base_delay_secs * (retry_count as u64 + 1)).min(self.retry_max_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_linearly_and_caps() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.retry_delay_secs(0), 300);
        assert_eq!(config.retry_delay_secs(1), 600);
        assert_eq!(config.retry_delay_secs(5), 1800);
        assert_eq!(config.retry_delay_secs(100), 1800);
    }
}
