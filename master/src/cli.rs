use std::path::PathBuf;

use clap::Parser;
use common::{ConfigError, RunConfig};

use crate::channel::WorkerCommand;

#[derive(Parser, Debug)]
#[command(name = "sitebench")]
#[command(about = "Reparte mediciones de URLs entre workers y resume los tiempos")]
pub struct Cli {
    /// Archivo JSON con la config (baseUrl, paths, iterations, ...)
    #[arg(short, long, value_name = "ARCHIVO")]
    pub config: Option<PathBuf>,

    /// URL base del sitio a medir
    #[arg(short = 'u', long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Ruta relativa a medir; se puede repetir
    #[arg(short, long = "path", value_name = "RUTA")]
    pub paths: Vec<String>,

    /// Veces que se mide cada ruta
    #[arg(short = 'n', long)]
    pub iterations: Option<u32>,

    /// Cantidad de workers en paralelo
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Timeout por job que se le pasa al worker
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Pausa antes de entregar cada job siguiente
    #[arg(long, value_name = "MS")]
    pub delay: Option<u64>,

    /// Intentos máximos por job (por defecto, sin límite)
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    #[arg(short, long)]
    pub verbose: bool,

    /// Binario del worker (si no, SITEBENCH_WORKER o sitebench-worker)
    #[arg(long, value_name = "BIN")]
    pub worker: Option<PathBuf>,

    /// Imprime el reporte como JSON en vez de tabla
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Config final: archivo (si hay) pisado por los flags, ya validada.
    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if !self.paths.is_empty() {
            config.paths = self.paths.clone();
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_ms = timeout;
        }
        if let Some(delay) = self.delay {
            config.delay_ms = delay;
        }
        if self.max_attempts.is_some() {
            config.retry.max_attempts = self.max_attempts;
        }
        if self.verbose {
            config.verbose = true;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn worker_command(&self) -> WorkerCommand {
        match &self.worker {
            Some(path) => WorkerCommand::new(path),
            None => WorkerCommand::discover(),
        }
    }
}
