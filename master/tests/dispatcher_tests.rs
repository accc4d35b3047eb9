use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{aggregate, plan_jobs, Backoff, DispatchError, Job, RetryPolicy, WorkerId};
use master::{DispatchSettings, Dispatcher, RunOutcome, WorkerChannel};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::time::{sleep, timeout};

/// Qué contesta un worker falso: `None` simula que el proceso muere sin
/// responder.
type Reply = Arc<dyn Fn(&Job) -> Option<String> + Send + Sync>;

#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
    served: AtomicUsize,
}

fn ok(time: f64, queries: u64) -> Reply {
    Arc::new(move |job: &Job| Some(serde_json::to_string(&job.succeed(time, queries)).unwrap()))
}

fn dies() -> Reply {
    Arc::new(|_: &Job| None)
}

fn jobs(urls: &[&str]) -> Vec<Job> {
    urls.iter().map(|u| Job::new(*u)).collect()
}

fn settings() -> DispatchSettings {
    DispatchSettings::default()
}

/// Conecta un worker en memoria al dispatcher.
fn connect(dispatcher: &mut Dispatcher, id: WorkerId, pace: Duration, reply: Reply, gauge: Arc<Gauge>) {
    let (master_end, worker_end) = tokio::io::duplex(64 * 1024);
    let (output, input) = tokio::io::split(master_end);
    let events = dispatcher.events();
    dispatcher.attach(WorkerChannel::from_io(id, output, input, events));
    tokio::spawn(fake_worker(worker_end, pace, reply, gauge));
}

async fn fake_worker(stream: DuplexStream, pace: Duration, reply: Reply, gauge: Arc<Gauge>) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let job: Job = serde_json::from_str(&line).expect("request JSON");
        assert!(job.error.is_none() && job.time.is_none() && job.queries.is_none());

        let now = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(now, Ordering::SeqCst);
        gauge.served.fetch_add(1, Ordering::SeqCst);

        if !pace.is_zero() {
            sleep(pace).await;
        }

        let Some(response) = reply(&job) else {
            break;
        };
        gauge.active.fetch_sub(1, Ordering::SeqCst);
        if writer.write_all(format!("{response}\n").as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn run(dispatcher: Dispatcher) -> Result<RunOutcome, DispatchError> {
    timeout(Duration::from_secs(10), dispatcher.run())
        .await
        .expect("el dispatcher no terminó a tiempo")
}

#[tokio::test]
async fn test_end_to_end_two_paths_two_iterations() {
    let paths = vec!["/a".to_string(), "/b".to_string()];
    let plan = plan_jobs("http://x.test", &paths, 2, 1, &mut StdRng::seed_from_u64(11));
    assert_eq!(plan.total_jobs, 4);

    let mut dispatcher = Dispatcher::new(plan.jobs, settings());
    let reply: Reply = Arc::new(|job: &Job| {
        let time = if job.url.ends_with("/a") { 1.0 } else { 3.0 };
        Some(serde_json::to_string(&job.succeed(time, 2)).unwrap())
    });
    connect(&mut dispatcher, 0, Duration::ZERO, reply, Arc::default());

    let outcome = run(dispatcher).await.unwrap();
    assert_eq!(outcome.total_jobs, 4);
    assert_eq!(outcome.completed, 4);
    assert_eq!(outcome.failures, 0);
    assert!(outcome.abandoned.is_empty());

    let stats = aggregate(&outcome.store).unwrap();
    assert_eq!(stats.len(), 2);
    let a = stats.iter().find(|s| s.url == "http://x.test/a").unwrap();
    let b = stats.iter().find(|s| s.url == "http://x.test/b").unwrap();
    assert_eq!((a.samples, a.avg_time, a.time_deviation), (2, 1.0, 0.0));
    assert_eq!((b.samples, b.avg_time, b.avg_queries), (2, 3.0, 2.0));
}

#[tokio::test]
async fn test_failed_job_is_retried_and_recorded_once() {
    let attempts: Arc<Mutex<HashMap<String, u32>>> = Arc::default();
    let seen = attempts.clone();
    let reply: Reply = Arc::new(move |job: &Job| {
        let mut seen = seen.lock().unwrap();
        let n = seen.entry(job.url.clone()).or_insert(0);
        *n += 1;
        let response = if job.url.ends_with("/flaky") && *n <= 2 {
            job.fail(format!("fallo {}", n))
        } else {
            job.succeed(0.5, 3)
        };
        Some(serde_json::to_string(&response).unwrap())
    });

    let mut dispatcher = Dispatcher::new(
        jobs(&["http://x.test/flaky", "http://x.test/ok"]),
        settings(),
    );
    connect(&mut dispatcher, 0, Duration::ZERO, reply, Arc::default());

    let outcome = run(dispatcher).await.unwrap();
    assert_eq!(outcome.completed, 2);
    assert_eq!(outcome.failures, 2);
    assert_eq!(attempts.lock().unwrap()["http://x.test/flaky"], 3);

    let flaky = outcome.store.get("http://x.test/flaky").unwrap();
    assert_eq!(flaky.len(), 1);
    assert!(flaky[0].error.is_none());
    assert_eq!(flaky[0].time, Some(serde_json::json!(0.5)));
}

#[tokio::test]
async fn test_malformed_response_aborts_the_run() {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let reply: Reply = Arc::new(move |job: &Job| {
        if c.fetch_add(1, Ordering::SeqCst) < 2 {
            Some(serde_json::to_string(&job.succeed(0.1, 1)).unwrap())
        } else {
            Some("{oops".to_string())
        }
    });

    let mut dispatcher = Dispatcher::new(
        jobs(&["http://x.test/1", "http://x.test/2", "http://x.test/3", "http://x.test/4"]),
        settings(),
    );
    connect(&mut dispatcher, 0, Duration::ZERO, reply, Arc::default());

    match run(dispatcher).await {
        Err(DispatchError::ProtocolDecode { worker, payload, .. }) => {
            assert_eq!(worker, 0);
            assert_eq!(payload, "{oops");
        }
        other => panic!("esperaba ProtocolDecode, llegó {:?}", other.map(|o| o.completed)),
    }
}

#[tokio::test]
async fn test_concurrency_is_bounded_by_worker_count() {
    let urls: Vec<String> = (0..12).map(|i| format!("http://x.test/{i}")).collect();
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();

    let gauge = Arc::new(Gauge::default());
    let mut dispatcher = Dispatcher::new(jobs(&url_refs), settings());
    for id in 0..3 {
        connect(&mut dispatcher, id, Duration::from_millis(20), ok(0.2, 1), gauge.clone());
    }

    let outcome = run(dispatcher).await.unwrap();
    assert_eq!(outcome.completed, 12);
    assert_eq!(outcome.store.samples(), 12);
    assert_eq!(gauge.served.load(Ordering::SeqCst), 12);
    assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    assert!(gauge.peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_capped_policy_abandons_a_permanently_broken_target() {
    let reply: Reply = Arc::new(|job: &Job| {
        let response = if job.url.ends_with("/broken") {
            job.fail("502 Bad Gateway")
        } else {
            job.succeed(0.3, 2)
        };
        Some(serde_json::to_string(&response).unwrap())
    });

    let mut dispatcher = Dispatcher::new(
        jobs(&["http://x.test/broken", "http://x.test/ok"]),
        DispatchSettings {
            delay: Duration::ZERO,
            retry: RetryPolicy {
                max_attempts: Some(3),
                backoff: Backoff::Fixed { ms: 5 },
            },
            ..DispatchSettings::default()
        },
    );
    connect(&mut dispatcher, 0, Duration::ZERO, reply, Arc::default());

    let outcome = run(dispatcher).await.unwrap();
    assert_eq!(outcome.completed, 1);
    assert_eq!(outcome.failures, 3);
    assert_eq!(outcome.abandoned, vec!["http://x.test/broken".to_string()]);
    assert!(outcome.store.get("http://x.test/broken").is_none());
    assert_eq!(outcome.store.get("http://x.test/ok").unwrap().len(), 1);
}

#[tokio::test]
async fn test_worker_exit_mid_job_requeues_its_ticket() {
    let gauge = Arc::new(Gauge::default());
    let mut dispatcher = Dispatcher::new(
        jobs(&["http://x.test/1", "http://x.test/2", "http://x.test/3", "http://x.test/4"]),
        settings(),
    );
    connect(&mut dispatcher, 0, Duration::ZERO, dies(), Arc::default());
    connect(&mut dispatcher, 1, Duration::from_millis(50), ok(0.1, 1), gauge.clone());

    let outcome = run(dispatcher).await.unwrap();
    assert_eq!(outcome.completed, 4);
    assert_eq!(outcome.failures, 0);
    assert_eq!(gauge.served.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_all_workers_dead_fails_fast() {
    let mut dispatcher = Dispatcher::new(jobs(&["http://x.test/1", "http://x.test/2"]), settings());
    connect(&mut dispatcher, 0, Duration::ZERO, dies(), Arc::default());
    connect(&mut dispatcher, 1, Duration::ZERO, dies(), Arc::default());

    match run(dispatcher).await {
        Err(DispatchError::NoHealthyWorkers { remaining }) => assert_eq!(remaining, 2),
        other => panic!("esperaba NoHealthyWorkers, llegó {:?}", other.map(|o| o.completed)),
    }
}

#[tokio::test]
async fn test_no_attached_workers_fails_fast() {
    let dispatcher = Dispatcher::new(jobs(&["http://x.test/1"]), settings());
    assert!(matches!(
        run(dispatcher).await,
        Err(DispatchError::NoHealthyWorkers { remaining: 1 })
    ));
}

#[tokio::test]
async fn test_empty_job_list_finishes_immediately() {
    let dispatcher = Dispatcher::new(Vec::new(), settings());
    let outcome = run(dispatcher).await.unwrap();
    assert_eq!(outcome.total_jobs, 0);
    assert_eq!(outcome.completed, 0);
    assert!(outcome.store.is_empty());
}

#[tokio::test]
async fn test_delay_throttles_dispatch_to_a_freed_worker() {
    let mut dispatcher = Dispatcher::new(
        jobs(&["http://x.test/1", "http://x.test/2", "http://x.test/3"]),
        DispatchSettings {
            delay: Duration::from_millis(40),
            ..DispatchSettings::default()
        },
    );
    connect(&mut dispatcher, 0, Duration::ZERO, ok(0.1, 1), Arc::default());

    let started = Instant::now();
    let outcome = run(dispatcher).await.unwrap();

    // el primer job sale sin pausa; los otros dos esperan `delay` cada uno
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert_eq!(outcome.completed, 3);
}

#[tokio::test]
async fn test_late_duplicate_reply_is_not_counted_for_the_next_job() {
    // `/a` se contesta dos veces; la copia llega con `/b` ya en vuelo
    let reply: Reply = Arc::new(|job: &Job| {
        if job.url.ends_with("/a") {
            let line = serde_json::to_string(&job.succeed(1.0, 1)).unwrap();
            Some(format!("{line}\n{line}"))
        } else {
            Some(serde_json::to_string(&job.succeed(9.0, 1)).unwrap())
        }
    });

    let mut dispatcher = Dispatcher::new(jobs(&["http://x.test/a", "http://x.test/b"]), settings());
    connect(&mut dispatcher, 0, Duration::ZERO, reply, Arc::default());

    let outcome = run(dispatcher).await.unwrap();
    assert_eq!(outcome.completed, 2);

    let a = outcome.store.get("http://x.test/a").unwrap();
    let b = outcome.store.get("http://x.test/b").unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0].time, Some(serde_json::json!(1.0)));
    assert_eq!(b[0].time, Some(serde_json::json!(9.0)));
}

#[tokio::test]
async fn test_reply_with_nothing_in_flight_is_ignored() {
    // cada respuesta sale repetida: la copia llega durante la pausa
    // (o con la entrada ya cerrada, después del último job)
    let reply: Reply = Arc::new(|job: &Job| {
        let line = serde_json::to_string(&job.succeed(0.2, 1)).unwrap();
        Some(format!("{line}\n{line}"))
    });

    let mut dispatcher = Dispatcher::new(
        jobs(&["http://x.test/1", "http://x.test/2", "http://x.test/3"]),
        DispatchSettings {
            delay: Duration::from_millis(30),
            ..DispatchSettings::default()
        },
    );
    connect(&mut dispatcher, 0, Duration::ZERO, reply, Arc::default());

    let outcome = run(dispatcher).await.unwrap();
    assert_eq!(outcome.completed, outcome.total_jobs);
    assert_eq!(outcome.store.samples(), 3);
    for url in ["http://x.test/1", "http://x.test/2", "http://x.test/3"] {
        assert_eq!(outcome.store.get(url).unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_backoff_delays_resubmission_of_failed_jobs() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let reply: Reply = Arc::new(move |job: &Job| {
        let response = if seen.fetch_add(1, Ordering::SeqCst) < 2 {
            job.fail("503 Service Unavailable")
        } else {
            job.succeed(0.1, 1)
        };
        Some(serde_json::to_string(&response).unwrap())
    });

    let mut dispatcher = Dispatcher::new(
        jobs(&["http://x.test/flaky"]),
        DispatchSettings {
            retry: RetryPolicy {
                max_attempts: None,
                backoff: Backoff::Fixed { ms: 40 },
            },
            ..DispatchSettings::default()
        },
    );
    connect(&mut dispatcher, 0, Duration::ZERO, reply, Arc::default());

    let started = Instant::now();
    let outcome = run(dispatcher).await.unwrap();

    // dos reenvíos, cada uno con 40ms de backoff
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert_eq!(outcome.failures, 2);
    assert_eq!(outcome.completed, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
