pub mod channel;
pub mod cli;
pub mod dispatcher;
pub mod failover;
pub mod render;
pub mod runner;
pub mod state;

pub use channel::{Event, WorkerChannel, WorkerCommand};
pub use dispatcher::{DispatchSettings, Dispatcher, RunOutcome};
