use std::path::PathBuf;

use thiserror::Error;

use crate::worker::WorkerId;

/// Errores de un canal individual con su subproceso worker.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("no se pudo iniciar el worker {worker} ({program}): {source}")]
    Startup {
        worker: WorkerId,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("el worker {0} ya tiene la entrada cerrada")]
    InputClosed(WorkerId),

    #[error("error escribiendo al worker {worker}: {source}")]
    Write {
        worker: WorkerId,
        #[source]
        source: std::io::Error,
    },

    #[error("no se pudo serializar el job: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errores fatales del loop de despacho.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("respuesta JSON inválida del worker {worker}: {source} (payload: {payload:?})")]
    ProtocolDecode {
        worker: WorkerId,
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no quedan workers sanos y faltan {remaining} job(s) por completar")]
    NoHealthyWorkers { remaining: usize },
}

/// Un valor guardado no se puede usar como número.
#[derive(Error, Debug, PartialEq)]
pub enum AggregationError {
    #[error("el resultado de {url} no trae `{field}`")]
    Missing { url: String, field: &'static str },

    #[error("el resultado de {url} trae `{field}` no numérico: {value}")]
    NotNumeric {
        url: String,
        field: &'static str,
        value: String,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no se pudo leer {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config JSON inválida en {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config inválida: {0}")]
    Invalid(String),
}

/// Errores que cortan una corrida completa.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}
