//! Protocolo entre el master y cada worker: un objeto JSON por línea.

use crate::job::Job;

pub type WorkerId = usize;

/// Variable de entorno con el timeout por job (ms) que recibe el worker.
pub const TIMEOUT_ENV: &str = "TIMEOUT";

/// Resultado de clasificar una respuesta del worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(Job),
    Failed { job: Job, error: String },
}

/// Serializa un job como una línea (incluye el `\n` final).
pub fn encode_line(job: &Job) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(job)?;
    line.push('\n');
    Ok(line)
}

/// Decodifica una línea recibida del otro lado del canal.
pub fn decode_line(line: &str) -> Result<Job, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// `error` no nulo => fallo del job; si no, éxito.
pub fn classify(job: Job) -> Outcome {
    match job.error_message() {
        Some(error) => Outcome::Failed { job, error },
        None => Outcome::Succeeded(job),
    }
}
