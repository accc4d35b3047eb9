use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::TargetStats;

/// Lo que consume el formateador externo al terminar una corrida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub base_url: String,
    pub iterations: u32,
    pub workers: usize,
    pub total_jobs: usize,
    pub jobs_per_worker: usize,

    /// Intentos fallidos (cada uno terminó reencolado o abandonado).
    pub failures: u64,

    /// URLs de jobs que agotaron `retry.maxAttempts`.
    pub abandoned: Vec<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: Vec<TargetStats>,
}

impl Report {
    pub fn target(&self, url: &str) -> Option<&TargetStats> {
        self.targets.iter().find(|t| t.url == url)
    }
}
