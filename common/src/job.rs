use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Una unidad de trabajo: medir una URL ya normalizada.
///
/// Es también la forma exacta de los mensajes que viajan por stdin/stdout
/// del worker: `{"url": ..., "error": null, "time": null, "queries": null}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub url: String,

    /// Payload de error del worker; sólo presente mientras el job
    /// espera ser reencolado.
    pub error: Option<Value>,

    /// Segundos transcurridos (fraccionarios), sólo en éxito.
    pub time: Option<Value>,

    /// Cantidad de queries reportadas, sólo en éxito.
    pub queries: Option<Value>,
}

impl Job {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            error: None,
            time: None,
            queries: None,
        }
    }

    /// Respuesta exitosa para este job (lado worker).
    pub fn succeed(&self, seconds: f64, queries: u64) -> Self {
        Self {
            url: self.url.clone(),
            error: None,
            time: Some(Value::from(seconds)),
            queries: Some(Value::from(queries)),
        }
    }

    /// Respuesta fallida para este job (lado worker).
    pub fn fail(&self, message: impl Into<String>) -> Self {
        Self {
            url: self.url.clone(),
            error: Some(Value::String(message.into())),
            time: None,
            queries: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Texto del error tal como lo mandó el worker.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| match e {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Limpia error y métricas: cada reintento es un intento nuevo.
    pub fn reset(&mut self) {
        self.error = None;
        self.time = None;
        self.queries = None;
    }
}
