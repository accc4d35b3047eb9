use chrono::Utc;
use tracing::{error, info, warn};

use common::{aggregate, plan_jobs, Report, RunConfig, RunError};

use crate::channel::{WorkerChannel, WorkerCommand};
use crate::dispatcher::{DispatchSettings, Dispatcher};

/// Corrida completa: planificar, lanzar workers, despachar y agregar.
///
/// Sin jobs o sin workers devuelve enseguida un reporte vacío y no lanza
/// ningún proceso.
pub async fn run(config: &RunConfig, command: &WorkerCommand) -> Result<Report, RunError> {
    let plan = plan_jobs(
        &config.base_url,
        &config.paths,
        config.iterations,
        config.workers,
        &mut rand::rng(),
    );

    info!(
        "Corriendo {} job(s) con {} worker(s).",
        plan.total_jobs, config.workers
    );

    let started_at = Utc::now();
    let mut report = Report {
        base_url: config.base_url.clone(),
        iterations: config.iterations,
        workers: config.workers,
        total_jobs: plan.total_jobs,
        jobs_per_worker: plan.jobs_per_worker,
        failures: 0,
        abandoned: Vec::new(),
        started_at,
        finished_at: started_at,
        targets: Vec::new(),
    };

    if plan.total_jobs == 0 || config.workers == 0 {
        warn!("nada que despachar (jobs={}, workers={})", plan.total_jobs, config.workers);
        return Ok(report);
    }

    let total_jobs = plan.total_jobs;
    let mut dispatcher = Dispatcher::new(plan.jobs, DispatchSettings::from(config));

    // nunca más workers que jobs
    for id in 0..config.workers.min(total_jobs) {
        match WorkerChannel::spawn(id, command, config.timeout_ms, dispatcher.events()) {
            Ok(channel) => dispatcher.attach(channel),
            Err(e) => error!("{}", e),
        }
    }

    if dispatcher.workers() < config.workers.min(total_jobs) {
        warn!(
            "sólo {} worker(s) arrancaron; el resto del trabajo se reparte entre ellos",
            dispatcher.workers()
        );
    }

    let outcome = dispatcher.run().await?;
    let targets = aggregate(&outcome.store)?;

    info!(
        "Procesamiento completo para \"{}\": {} ok, {} intento(s) fallido(s), {} abandonado(s).",
        config.base_url,
        outcome.completed,
        outcome.failures,
        outcome.abandoned.len()
    );

    report.failures = outcome.failures;
    report.abandoned = outcome.abandoned;
    report.started_at = outcome.started_at;
    report.finished_at = outcome.finished_at;
    report.targets = targets;
    Ok(report)
}
