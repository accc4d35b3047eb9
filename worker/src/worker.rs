use std::env;
use std::time::{Duration, Instant};

use anyhow::Result;
use common::worker as protocol;
use common::{Job, TIMEOUT_ENV};
use regex::Regex;
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const QUERY_COUNT_HEADER: &str = "x-query-count";

/// Timeout por job a partir del valor de `TIMEOUT` (ms).
pub fn parse_timeout(raw: Option<&str>) -> Duration {
    let ms = raw
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_MS);
    Duration::from_millis(ms)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub seconds: f64,
    pub queries: u64,
}

/// Mide una URL: tiempo de respuesta y queries reportadas por la página.
pub struct Probe {
    client: Client,
    time_re: Regex,
    queries_re: Regex,
}

impl Probe {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            time_re: Regex::new(r"(?i)\btime:\s*([0-9]+(?:\.[0-9]+)?)")?,
            queries_re: Regex::new(r"(?i)total queries:\s*([0-9]+)")?,
        })
    }

    /// Respuesta para el master: éxito con métricas o error como texto.
    pub async fn handle(&self, job: &Job) -> Job {
        match self.measure(&job.url).await {
            Ok(m) => {
                debug!("{} -> {:.4}s, {} queries", job.url, m.seconds, m.queries);
                job.succeed(m.seconds, m.queries)
            }
            Err(e) => {
                warn!("error midiendo {}: {:#}", job.url, e);
                job.fail(format!("{:#}", e))
            }
        }
    }

    pub async fn measure(&self, url: &str) -> Result<Measurement> {
        let started = Instant::now();
        let resp = self.client.get(url).send().await?.error_for_status()?;

        let header_queries = resp
            .headers()
            .get(QUERY_COUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let body = resp.text().await?;
        Ok(self.extract(&body, header_queries, started.elapsed()))
    }

    /// Prefiere lo que reporta el servidor; si no, lo medido acá.
    /// - tiempo: `Time: <n>s` en el body, o el tiempo transcurrido
    /// - queries: header `X-Query-Count`, `Total Queries: <n>` en el body, o 0
    pub fn extract(&self, body: &str, header_queries: Option<u64>, elapsed: Duration) -> Measurement {
        let seconds = self
            .time_re
            .captures(body)
            .and_then(|c| c[1].parse::<f64>().ok())
            .unwrap_or_else(|| elapsed.as_secs_f64());

        let queries = header_queries
            .or_else(|| {
                self.queries_re
                    .captures(body)
                    .and_then(|c| c[1].parse::<u64>().ok())
            })
            .unwrap_or(0);

        Measurement { seconds, queries }
    }
}

/// Loop principal del worker: un job por línea en stdin, una respuesta por
/// línea en stdout. Termina cuando el master cierra stdin.
pub async fn run() -> Result<()> {
    let timeout = parse_timeout(env::var(TIMEOUT_ENV).ok().as_deref());
    let probe = Probe::new(timeout)?;

    info!("worker listo (timeout={:?})", timeout);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let job = match protocol::decode_line(&line) {
            Ok(job) => job,
            Err(e) => {
                warn!("request inválido, se ignora: {} ({:?})", e, line);
                continue;
            }
        };

        let response = probe.handle(&job).await;
        stdout
            .write_all(protocol::encode_line(&response)?.as_bytes())
            .await?;
        stdout.flush().await?;
    }

    info!("stdin cerrado, worker terminando");
    Ok(())
}
