use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use common::worker as protocol;
use common::{DispatchError, Job, Outcome, ResultStore, RetryPolicy, RunConfig, WorkerId};

use crate::channel::{Event, WorkerChannel};
use crate::failover;
use crate::render::relative_path;
use crate::state::{InFlight, RunState, Slot, SlotState};

#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    /// Sólo para los logs: las URLs se muestran relativas a esta base.
    pub base_url: String,
    /// Pausa antes de entregar el siguiente job a un worker que se liberó.
    pub delay: Duration,
    pub retry: RetryPolicy,
}

impl From<&RunConfig> for DispatchSettings {
    fn from(config: &RunConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            delay: config.delay(),
            retry: config.retry.clone(),
        }
    }
}

/// Lo que queda al terminar el despacho, antes de agregar.
#[derive(Debug)]
pub struct RunOutcome {
    pub store: ResultStore,
    pub total_jobs: usize,
    pub completed: usize,
    pub failures: u64,
    pub abandoned: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Dueño de la cola compartida y de los WorkerChannels.
///
/// Cada worker pide trabajo implícitamente al devolver un resultado: ese
/// mismo worker recibe el siguiente job de la cola (tras `delay`), o se le
/// cierra la entrada si la cola está vacía. Los resultados de todos los
/// workers llegan por un único mpsc y se procesan de a uno, así que la cola
/// y los contadores no necesitan locks.
pub struct Dispatcher {
    settings: DispatchSettings,
    state: RunState,
    slots: BTreeMap<WorkerId, Slot>,
    events_tx: UnboundedSender<Event>,
    events_rx: UnboundedReceiver<Event>,
}

impl Dispatcher {
    pub fn new(jobs: Vec<Job>, settings: DispatchSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            state: RunState::new(jobs),
            slots: BTreeMap::new(),
            events_tx,
            events_rx,
        }
    }

    /// Sender para construir WorkerChannels que reporten a este dispatcher.
    pub fn events(&self) -> UnboundedSender<Event> {
        self.events_tx.clone()
    }

    pub fn attach(&mut self, channel: WorkerChannel) {
        let id = channel.id();
        if self.slots.insert(id, Slot::new(channel)).is_some() {
            warn!("worker {} registrado dos veces; se reemplaza", id);
        }
    }

    pub fn workers(&self) -> usize {
        self.slots.len()
    }

    pub fn total_jobs(&self) -> usize {
        self.state.total_jobs
    }

    /// Corre hasta que todos los jobs terminen.
    ///
    /// Errores fatales: respuesta que no es JSON válido, o quedarse sin
    /// workers con trabajo pendiente. En ambos casos no hay resultados.
    pub async fn run(mut self) -> Result<RunOutcome, DispatchError> {
        let started_at = Utc::now();

        if !self.state.is_finished() {
            // 1) un job por worker, sin pausa
            let ids: Vec<WorkerId> = self.slots.keys().copied().collect();
            for id in ids {
                self.dispatch_next(id, Duration::ZERO).await;
            }
            failover::ensure_capacity(&self.slots, &self.state)?;

            // 2) loop de eventos hasta completar
            while !self.state.is_finished() {
                let Some(event) = self.events_rx.recv().await else {
                    return Err(DispatchError::NoHealthyWorkers {
                        remaining: self.state.remaining(),
                    });
                };

                match event {
                    Event::Line { worker, line } => self.handle_line(worker, line).await?,
                    Event::Closed { worker } => self.handle_closed(worker),
                    Event::Due { worker } => self.submit(worker).await,
                }

                self.state.check_balance(self.in_flight());
                failover::ensure_capacity(&self.slots, &self.state)?;
            }
        }

        self.shutdown().await;

        Ok(RunOutcome {
            total_jobs: self.state.total_jobs,
            completed: self.state.completed,
            failures: self.state.failures,
            abandoned: self
                .state
                .abandoned
                .iter()
                .map(|t| t.url().to_string())
                .collect(),
            store: self.state.store,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn in_flight(&self) -> usize {
        self.slots.values().filter(|s| s.in_flight.is_some()).count()
    }

    /// Asigna el siguiente job de la cola a `worker`, o le cierra la entrada
    /// si no queda nada.
    async fn dispatch_next(&mut self, worker: WorkerId, pause: Duration) {
        let Some(ticket) = self.state.next_ticket() else {
            self.close(worker).await;
            return;
        };

        let Some(slot) = self.slots.get_mut(&worker) else {
            self.state.requeue(ticket);
            return;
        };

        let wait = pause + self.settings.retry.backoff(ticket.attempt);
        slot.in_flight = Some(InFlight::new(ticket));
        slot.state = SlotState::Scheduled;

        if wait.is_zero() {
            self.submit(worker).await;
        } else {
            let events = self.events_tx.clone();
            tokio::spawn(async move {
                sleep(wait).await;
                let _ = events.send(Event::Due { worker });
            });
        }
    }

    /// Escribe en el worker el job que tiene agendado.
    async fn submit(&mut self, worker: WorkerId) {
        let Some(slot) = self.slots.get_mut(&worker) else {
            return;
        };
        // p. ej. el worker terminó mientras corría la pausa
        if slot.state != SlotState::Scheduled {
            return;
        }
        let Some(inflight) = slot.in_flight.as_mut() else {
            return;
        };

        inflight.started_at = std::time::Instant::now();
        let url = inflight.ticket.url().to_string();
        let attempt = inflight.ticket.attempt;

        match slot.channel.submit(&inflight.ticket.job).await {
            Ok(()) => {
                slot.state = SlotState::AwaitingResult;
                slot.meta.jobs_started += 1;
                debug!("worker {} <- {} (attempt={})", worker, url, attempt);
            }
            Err(e) => {
                warn!("no se pudo entregar {} al worker {}: {}", url, worker, e);
                failover::retire(worker, slot, &mut self.state);
            }
        }
    }

    async fn handle_line(&mut self, worker: WorkerId, line: String) -> Result<(), DispatchError> {
        let job = match protocol::decode_line(&line) {
            Ok(job) => job,
            Err(source) => {
                return Err(DispatchError::ProtocolDecode {
                    worker,
                    payload: line,
                    source,
                })
            }
        };

        let Some(slot) = self.slots.get_mut(&worker) else {
            warn!("respuesta de un worker desconocido ({}), se ignora", worker);
            return Ok(());
        };
        if slot.state != SlotState::AwaitingResult {
            warn!(
                "respuesta inesperada del worker {} en estado {:?}, se ignora",
                worker, slot.state
            );
            return Ok(());
        }
        let Some(assigned) = slot.in_flight.as_ref().map(|f| f.ticket.url()) else {
            return Ok(());
        };
        // sin id de correlación: una respuesta por otra URL no es la de este job
        if job.url != assigned {
            warn!(
                "el worker {} respondió por {} pero tiene asignado {}; se ignora",
                worker, job.url, assigned
            );
            return Ok(());
        }

        let Some(inflight) = slot.in_flight.take() else {
            return Ok(());
        };
        slot.state = SlotState::Idle;

        let elapsed = inflight.started_at.elapsed();
        slot.meta.total_job_time += elapsed;
        let ticket = inflight.ticket;

        match protocol::classify(job) {
            Outcome::Failed { error, .. } => {
                slot.meta.jobs_failed += 1;
                warn!(
                    "error midiendo \"{}\" (intento {}): {}",
                    ticket.url(),
                    ticket.attempt + 1,
                    error
                );
                let url = ticket.url().to_string();
                if !self.state.record_failure(ticket, &self.settings.retry) {
                    warn!("abandonando \"{}\": se agotaron los intentos", url);
                }
            }
            Outcome::Succeeded(job) => {
                slot.meta.jobs_succeeded += 1;
                debug!(
                    "ok {} time={} queries={} ({:?} ida y vuelta, worker {})",
                    relative_path(&self.settings.base_url, ticket.url()),
                    display_metric(&job.time),
                    display_metric(&job.queries),
                    elapsed,
                    worker
                );
                self.state.record_success(&ticket, job);
            }
        }

        self.dispatch_next(worker, self.settings.delay).await;
        Ok(())
    }

    fn handle_closed(&mut self, worker: WorkerId) {
        let Some(slot) = self.slots.get_mut(&worker) else {
            return;
        };

        match slot.state {
            SlotState::Closed => {
                slot.state = SlotState::Exited;
                debug!("worker {} terminó", worker);
            }
            SlotState::Exited => {}
            _ => {
                warn!("el worker {} terminó inesperadamente", worker);
                failover::retire(worker, slot, &mut self.state);
            }
        }
    }

    async fn close(&mut self, worker: WorkerId) {
        if let Some(slot) = self.slots.get_mut(&worker) {
            slot.channel.close().await;
            if slot.state != SlotState::Exited {
                slot.state = SlotState::Closed;
            }
            debug!("worker {}: sin más jobs, entrada cerrada", worker);
        }
    }

    async fn shutdown(&mut self) {
        for (id, slot) in self.slots.iter_mut() {
            slot.channel.close().await;

            let meta = &slot.meta;
            info!(
                "worker {} (pid={:?}): enviados={}, ok={}, fallidos={}, prom={}",
                id,
                slot.channel.pid(),
                meta.jobs_started,
                meta.jobs_succeeded,
                meta.jobs_failed,
                meta.avg_job_ms()
                    .map(|ms| format!("{:.1}ms", ms))
                    .unwrap_or_else(|| "(sin datos)".to_string())
            );
        }
    }
}

fn display_metric(value: &Option<serde_json::Value>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "null".to_string())
}
