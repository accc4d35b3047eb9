use serde::{Deserialize, Serialize};

use crate::job::Job;

pub type TicketId = String;

/// Un job en la cola del dispatcher, con su identidad lógica.
///
/// El `id` se conserva entre reintentos; `attempt` cuenta los intentos
/// fallidos previos (0 en el primer envío).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub attempt: u32,
    pub job: Job,
}

impl Ticket {
    pub fn new(job: Job) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            attempt: 0,
            job,
        }
    }

    pub fn url(&self) -> &str {
        &self.job.url
    }

    /// Copia fresca para reencolar tras un fallo del job.
    pub fn retry(&self) -> Self {
        let mut job = self.job.clone();
        job.reset();
        Self {
            id: self.id.clone(),
            attempt: self.attempt + 1,
            job,
        }
    }
}
