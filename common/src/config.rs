use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_ITERATIONS: u32 = 5;
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Configuración de una corrida (sólo lectura para el dispatcher).
///
/// Las claves JSON son camelCase: `baseUrl`, `paths`, `iterations`,
/// `workers`, `timeout`, `delay`, `verbose`, `retry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    pub base_url: String,
    pub paths: Vec<String>,
    pub iterations: u32,
    pub workers: usize,

    /// Timeout por job en ms; lo aplica el worker, no el dispatcher.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,

    /// Pausa (ms) antes de entregar el siguiente job a un worker libre.
    #[serde(rename = "delay")]
    pub delay_ms: u64,

    pub verbose: bool,
    pub retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            paths: Vec::new(),
            iterations: DEFAULT_ITERATIONS,
            workers: DEFAULT_WORKERS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            delay_ms: 0,
            verbose: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("falta baseUrl".into()));
        }
        if self.iterations == 0 {
            return Err(ConfigError::Invalid(
                "iterations tiene que ser al menos 1".into(),
            ));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "retry.maxAttempts tiene que ser al menos 1".into(),
            ));
        }
        Ok(())
    }

    pub fn total_jobs(&self) -> usize {
        self.iterations as usize * self.paths.len()
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Qué hacer con un job que el worker reporta como fallido.
///
/// Por defecto se reintenta sin límite y sin backoff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Intentos totales permitidos por job; `None` = sin límite.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    None,
    Fixed {
        ms: u64,
    },
    Exponential {
        base_ms: u64,
        max_ms: u64,
    },
}

impl RetryPolicy {
    /// ¿Se puede hacer el intento número `attempt` (0 = primer envío)?
    pub fn allows(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }

    /// Espera extra antes de reenviar un job que ya falló `attempt` veces.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let ms = match self.backoff {
            Backoff::None => 0,
            Backoff::Fixed { ms } => ms,
            Backoff::Exponential { base_ms, max_ms } => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                base_ms.saturating_mul(factor).min(max_ms)
            }
        };
        Duration::from_millis(ms)
    }
}
