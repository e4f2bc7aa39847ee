use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::ConfigSource;
use crate::db::database::Database;
use crate::llm::headshot::HeadshotModel;
use crate::prompt::PromptTemplates;
use crate::storage::ImageStore;

/// Past this many tracked callers, expired entries are swept on insert.
const RATE_LIMIT_PRUNE_THRESHOLD: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub model: Arc<dyn HeadshotModel>,
    pub templates: Arc<PromptTemplates>,
    /// Tier variables are read through this on every request.
    pub config_source: Arc<dyn ConfigSource>,
    pub store: ImageStore,
    pub rate_limit: Duration,
    rate_limits: Arc<Mutex<HashMap<String, Instant>>>,
}

impl AppState {
    pub fn new(
        db: Database,
        model: Arc<dyn HeadshotModel>,
        templates: PromptTemplates,
        config_source: Arc<dyn ConfigSource>,
        store: ImageStore,
        rate_limit_seconds: u64,
    ) -> Self {
        AppState {
            db,
            model,
            templates: Arc::new(templates),
            config_source,
            store,
            rate_limit: Duration::from_secs(rate_limit_seconds),
            rate_limits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Records the attempt and reports whether the caller came back too soon.
    /// A zero window disables limiting.
    pub fn is_rate_limited(&self, caller_id: &str) -> bool {
        if self.rate_limit.is_zero() {
            return false;
        }

        let mut limits = self.rate_limits.lock();
        let now = Instant::now();

        if let Some(last) = limits.get(caller_id) {
            if now.duration_since(*last) < self.rate_limit {
                return true;
            }
        }

        if limits.len() >= RATE_LIMIT_PRUNE_THRESHOLD {
            let window = self.rate_limit;
            limits.retain(|_, last| now.duration_since(*last) < window);
        }
        limits.insert(caller_id.to_string(), now);
        false
    }

    #[cfg(test)]
    pub(crate) fn tracked_callers(&self) -> usize {
        self.rate_limits.lock().len()
    }
}
