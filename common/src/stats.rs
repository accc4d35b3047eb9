use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AggregationError;
use crate::job::Job;
use crate::results::ResultStore;

/// Estadísticas de una URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStats {
    pub url: String,
    pub samples: usize,
    pub avg_time: f64,
    /// RMS de las desviaciones respecto del promedio, escalado ×100.
    pub time_deviation: f64,
    pub avg_queries: f64,
}

/// Calcula las estadísticas por URL. Función pura: no toca el store.
pub fn aggregate(store: &ResultStore) -> Result<Vec<TargetStats>, AggregationError> {
    store
        .iter()
        .filter(|(_, jobs)| !jobs.is_empty())
        .map(|(url, jobs)| target_stats(url, jobs))
        .collect()
}

fn target_stats(url: &str, jobs: &[Job]) -> Result<TargetStats, AggregationError> {
    let times = jobs
        .iter()
        .map(|j| seconds(url, j))
        .collect::<Result<Vec<_>, _>>()?;
    let queries = jobs
        .iter()
        .map(|j| query_count(url, j))
        .collect::<Result<Vec<_>, _>>()?;

    let avg_time = mean(&times);

    Ok(TargetStats {
        url: url.to_string(),
        samples: jobs.len(),
        avg_time,
        time_deviation: scaled_deviation(&times, avg_time),
        avg_queries: mean(&queries),
    })
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `sqrt(mean((x - avg)^2)) * 100`
pub fn scaled_deviation(values: &[f64], avg: f64) -> f64 {
    let squares: Vec<f64> = values.iter().map(|x| (x - avg).powi(2)).collect();
    mean(&squares).sqrt() * 100.0
}

fn seconds(url: &str, job: &Job) -> Result<f64, AggregationError> {
    let value = require(url, "time", job.time.as_ref())?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        // "0.123s" también vale
        Value::String(s) => {
            let s = s.trim();
            s.strip_suffix('s').unwrap_or(s).trim().parse::<f64>().ok()
        }
        _ => None,
    };

    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| not_numeric(url, "time", value))
}

fn query_count(url: &str, job: &Job) -> Result<f64, AggregationError> {
    let value = require(url, "queries", job.queries.as_ref())?;
    let parsed = match value {
        Value::Number(n) => n
            .as_u64()
            .map(|q| q as f64)
            .or_else(|| n.as_f64().filter(|v| v.is_finite() && *v >= 0.0).map(f64::trunc)),
        Value::String(s) => s.trim().parse::<u64>().ok().map(|q| q as f64),
        _ => None,
    };

    parsed.ok_or_else(|| not_numeric(url, "queries", value))
}

fn require<'a>(
    url: &str,
    field: &'static str,
    value: Option<&'a Value>,
) -> Result<&'a Value, AggregationError> {
    value.ok_or_else(|| AggregationError::Missing {
        url: url.to_string(),
        field,
    })
}

fn not_numeric(url: &str, field: &'static str, value: &Value) -> AggregationError {
    AggregationError::NotNumeric {
        url: url.to_string(),
        field,
        value: value.to_string(),
    }
}
