use rand::Rng;
use tracing::debug;

use crate::job::Job;

/// Plan de una corrida: la lista de jobs ya barajada y sus totales.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub jobs: Vec<Job>,
    pub total_jobs: usize,
    pub jobs_per_worker: usize,
}

/// Une la URL base con una ruta relativa sin dejar `//` en la unión.
pub fn normalize_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// `ceil(total / workers)`, 0 si no hay workers.
pub fn jobs_per_worker(total_jobs: usize, workers: usize) -> usize {
    if workers == 0 {
        0
    } else {
        total_jobs.div_ceil(workers)
    }
}

/// Arma `iterations × paths.len()` jobs y los baraja.
pub fn plan_jobs<R>(
    base_url: &str,
    paths: &[String],
    iterations: u32,
    workers: usize,
    rng: &mut R,
) -> JobPlan
where
    R: Rng + ?Sized,
{
    // cada ruta se repite `iterations` veces antes de aplanar
    let mut jobs: Vec<Job> = paths
        .iter()
        .flat_map(|p| {
            let url = normalize_url(base_url, p);
            (0..iterations).map(move |_| Job::new(url.clone()))
        })
        .collect();

    shuffle(&mut jobs, rng);

    let total_jobs = jobs.len();
    debug!(
        "plan: {} rutas x {} iteraciones = {} jobs",
        paths.len(),
        iterations,
        total_jobs
    );

    JobPlan {
        jobs,
        total_jobs,
        jobs_per_worker: jobs_per_worker(total_jobs, workers),
    }
}

/// Fisher-Yates desde el final: intercambia el último elemento no ubicado
/// con uno elegido uniformemente del prefijo restante.
pub fn shuffle<T, R>(items: &mut [T], rng: &mut R)
where
    R: Rng + ?Sized,
{
    let mut counter = items.len();
    while counter > 0 {
        let index = rng.random_range(0..counter);
        counter -= 1;
        items.swap(counter, index);
    }
}
