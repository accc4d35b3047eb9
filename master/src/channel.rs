use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use common::worker as protocol;
use common::{ChannelError, Job, WorkerId, TIMEOUT_ENV};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

const WORKER_BIN: &str = "sitebench-worker";

/// Eventos que llegan al loop del dispatcher.
#[derive(Debug)]
pub enum Event {
    /// Una línea completa de la salida de un worker.
    Line { worker: WorkerId, line: String },
    /// La salida del worker llegó a EOF (el proceso terminó o cerró stdout).
    Closed { worker: WorkerId },
    /// Venció la pausa antes de entregar el job agendado a ese worker.
    Due { worker: WorkerId },
}

/// Programa a lanzar como worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Busca el binario del worker:
    /// - `SITEBENCH_WORKER` si está definida
    /// - `sitebench-worker` al lado del ejecutable actual
    /// - si no, `sitebench-worker` a secas (se resuelve por PATH)
    pub fn discover() -> Self {
        if let Ok(path) = env::var("SITEBENCH_WORKER") {
            return Self::new(path);
        }

        let sibling = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BIN)))
            .filter(|p| p.exists());

        match sibling {
            Some(path) => {
                debug!("worker encontrado en {}", path.display());
                Self::new(path)
            }
            None => Self::new(WORKER_BIN),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

type Input = Box<dyn AsyncWrite + Send + Unpin>;

/// Dueño de un subproceso worker y de sus streams.
///
/// `submit` escribe un job por línea en la entrada; cada línea de la salida
/// se publica como [`Event::Line`] en el canal de eventos del dispatcher.
/// Cerrar la entrada es la señal para que el worker termine: nunca se mata
/// el proceso.
pub struct WorkerChannel {
    id: WorkerId,
    input: Option<Input>,
    child: Option<Child>,
}

impl WorkerChannel {
    /// Lanza el worker con `TIMEOUT` inyectado en su entorno.
    pub fn spawn(
        id: WorkerId,
        command: &WorkerCommand,
        timeout_ms: u64,
        events: UnboundedSender<Event>,
    ) -> Result<Self, ChannelError> {
        let startup = |source: io::Error| ChannelError::Startup {
            worker: id,
            program: command.program.display().to_string(),
            source,
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .env(TIMEOUT_ENV, timeout_ms.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(startup)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| startup(io::Error::new(io::ErrorKind::BrokenPipe, "sin stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| startup(io::Error::new(io::ErrorKind::BrokenPipe, "sin stdout")))?;

        debug!(
            "worker {} lanzado (pid={:?}, timeout={}ms)",
            id,
            child.id(),
            timeout_ms
        );

        let mut channel = Self::from_io(id, stdout, stdin, events);
        channel.child = Some(child);
        Ok(channel)
    }

    /// Canal sobre streams arbitrarios (p. ej. un worker en memoria).
    pub fn from_io<R, W>(id: WorkerId, output: R, input: W, events: UnboundedSender<Event>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        tokio::spawn(read_output(id, output, events));

        Self {
            id,
            input: Some(Box::new(input)),
            child: None,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn is_open(&self) -> bool {
        self.input.is_some()
    }

    /// Envía un job. No llamar de nuevo hasta recibir su respuesta.
    pub async fn submit(&mut self, job: &Job) -> Result<(), ChannelError> {
        let line = protocol::encode_line(job)?;
        let worker = self.id;
        let input = self
            .input
            .as_mut()
            .ok_or(ChannelError::InputClosed(worker))?;

        input
            .write_all(line.as_bytes())
            .await
            .map_err(|source| ChannelError::Write { worker, source })?;
        input
            .flush()
            .await
            .map_err(|source| ChannelError::Write { worker, source })
    }

    /// Cierra la entrada del worker; idempotente.
    pub async fn close(&mut self) {
        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.shutdown().await {
                debug!("cerrando entrada del worker {}: {}", self.id, e);
            }
        }
    }
}

async fn read_output<R>(worker: WorkerId, output: R, events: UnboundedSender<Event>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // bytes inválidos igual llegan: el dispatcher decide si es JSON
                let line = String::from_utf8_lossy(&buf).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if events.send(Event::Line { worker, line }).is_err() {
                    // el dispatcher ya terminó
                    return;
                }
            }
            Err(e) => {
                warn!("error leyendo la salida del worker {}: {}", worker, e);
                break;
            }
        }
    }

    let _ = events.send(Event::Closed { worker });
}
