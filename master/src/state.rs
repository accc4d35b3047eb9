// master/src/state.rs

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use common::{Job, ResultStore, RetryPolicy, Ticket};

use crate::channel::WorkerChannel;

/// Estado mutable compartido de una corrida. Sólo lo toca el loop del
/// dispatcher, un evento a la vez.
#[derive(Debug)]
pub struct RunState {
    // jobs pendientes de asignar
    pub queue: VecDeque<Ticket>,
    pub store: ResultStore,
    pub total_jobs: usize,
    pub completed: usize,
    pub abandoned: Vec<Ticket>,
    pub failures: u64,
}

impl RunState {
    pub fn new(jobs: Vec<Job>) -> Self {
        let queue: VecDeque<Ticket> = jobs.into_iter().map(Ticket::new).collect();
        Self {
            total_jobs: queue.len(),
            queue,
            store: ResultStore::new(),
            completed: 0,
            abandoned: Vec::new(),
            failures: 0,
        }
    }

    pub fn next_ticket(&mut self) -> Option<Ticket> {
        self.queue.pop_front()
    }

    /// Devuelve un ticket a la cola tal cual (no cuenta como intento).
    pub fn requeue(&mut self, ticket: Ticket) {
        self.queue.push_back(ticket);
    }

    /// Guarda un resultado exitoso bajo la URL del ticket.
    pub fn record_success(&mut self, ticket: &Ticket, job: Job) {
        self.store.record(ticket.url(), job);
        self.completed += 1;
    }

    /// Reencola una copia limpia del job al final de la cola, o lo abandona
    /// si la política ya no permite otro intento. Devuelve si se reencoló.
    pub fn record_failure(&mut self, ticket: Ticket, policy: &RetryPolicy) -> bool {
        self.failures += 1;

        let retry = ticket.retry();
        if policy.allows(retry.attempt) {
            self.queue.push_back(retry);
            true
        } else {
            self.abandoned.push(ticket);
            false
        }
    }

    /// Jobs que todavía no terminaron (en cola o en vuelo).
    pub fn remaining(&self) -> usize {
        self.total_jobs - self.completed - self.abandoned.len()
    }

    pub fn is_finished(&self) -> bool {
        self.remaining() == 0
    }

    /// cola + en vuelo + terminados == total
    pub fn check_balance(&self, in_flight: usize) {
        debug_assert_eq!(
            self.queue.len() + in_flight + self.completed + self.abandoned.len(),
            self.total_jobs,
            "se perdió o duplicó un job"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Acaba de devolver un resultado.
    Idle,
    /// Tiene un job asignado esperando la pausa entre envíos.
    Scheduled,
    AwaitingResult,
    /// Le cerramos la entrada: no hay más trabajo para él.
    Closed,
    /// El worker terminó (o nunca pudo recibir).
    Exited,
}

impl SlotState {
    /// Un worker en este estado todavía va a devolver un resultado.
    pub fn is_busy(self) -> bool {
        matches!(self, SlotState::Scheduled | SlotState::AwaitingResult)
    }
}

#[derive(Debug, Clone)]
pub struct InFlight {
    pub ticket: Ticket,
    pub started_at: Instant,
}

impl InFlight {
    pub fn new(ticket: Ticket) -> Self {
        Self {
            ticket,
            started_at: Instant::now(),
        }
    }
}

/// Métricas por worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerMeta {
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub total_job_time: Duration,
}

impl WorkerMeta {
    pub fn avg_job_ms(&self) -> Option<f64> {
        let answered = self.jobs_succeeded + self.jobs_failed;
        if answered == 0 {
            None
        } else {
            Some(self.total_job_time.as_secs_f64() * 1000.0 / answered as f64)
        }
    }
}

/// Un WorkerChannel más lo que el dispatcher sabe de él.
pub struct Slot {
    pub channel: WorkerChannel,
    pub state: SlotState,
    pub in_flight: Option<InFlight>,
    pub meta: WorkerMeta,
}

impl Slot {
    pub fn new(channel: WorkerChannel) -> Self {
        Self {
            channel,
            state: SlotState::Idle,
            in_flight: None,
            meta: WorkerMeta::default(),
        }
    }
}
