//! The isolated execution unit: one OS thread owning one forecaster.
//!
//! The thread builds its forecaster itself and talks to the pool only through
//! channels; requests arrive on a `std::sync::mpsc` queue and replies leave on
//! a tokio unbounded channel. When the thread ends for any reason (shutdown,
//! panic) its reply sender drops, which is how the pool detects an exit.

use std::sync::{Arc, mpsc};
use std::thread;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use foresight_ai::{ForecastError, ForecastOutput, ForecastRequest, Forecaster};

/// Builds the forecaster a unit runs; called on the unit's own thread.
pub trait ForecasterFactory: Send + Sync + 'static {
    fn build(&self) -> Result<Box<dyn Forecaster>, String>;
}

impl<F> ForecasterFactory for F
where
    F: Fn() -> Result<Box<dyn Forecaster>, String> + Send + Sync + 'static,
{
    fn build(&self) -> Result<Box<dyn Forecaster>, String> {
        self()
    }
}

/// Factory handing each unit its own clone of a prototype forecaster.
#[derive(Debug, Clone)]
pub struct ForecasterPrototype<F>(pub F);

impl<F> ForecasterFactory for ForecasterPrototype<F>
where
    F: Forecaster + Clone,
{
    fn build(&self) -> Result<Box<dyn Forecaster>, String> {
        Ok(Box::new(self.0.clone()))
    }
}

#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Ping { seq: u64 },
    Forecast {
        request_id: u64,
        request: Box<ForecastRequest>,
    },
    Shutdown,
}

#[derive(Debug)]
pub(crate) enum WorkerReply {
    Online,
    /// The forecaster could not be built; the thread exits after sending this.
    Failed(String),
    Pong { seq: u64 },
    Completed {
        request_id: u64,
        outcome: Result<ForecastOutput, ForecastError>,
    },
}

/// Pool-side handle of a running unit.
#[derive(Debug)]
pub(crate) struct WorkerUnit {
    pub(crate) generation: u64,
    tx: mpsc::Sender<WorkerMessage>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerUnit {
    pub(crate) fn spawn(
        generation: u64,
        factory: Arc<dyn ForecasterFactory>,
        replies: UnboundedSender<WorkerReply>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<WorkerMessage>();
        let join = thread::Builder::new()
            .name(format!("forecast-worker-{generation}"))
            .spawn(move || unit_loop(generation, factory, rx, replies))?;
        Ok(Self {
            generation,
            tx,
            join: Some(join),
        })
    }

    /// Queue a message; fails once the thread has gone away.
    pub(crate) fn send(&self, msg: WorkerMessage) -> Result<(), WorkerMessage> {
        self.tx.send(msg).map_err(|e| e.0)
    }

    /// Ask the thread to stop and hand back its join handle.
    pub(crate) fn stop(mut self) -> Option<thread::JoinHandle<()>> {
        let _ = self.tx.send(WorkerMessage::Shutdown);
        self.join.take()
    }
}

fn unit_loop(
    generation: u64,
    factory: Arc<dyn ForecasterFactory>,
    rx: mpsc::Receiver<WorkerMessage>,
    replies: UnboundedSender<WorkerReply>,
) {
    let forecaster = match factory.build() {
        Ok(f) => f,
        Err(reason) => {
            let _ = replies.send(WorkerReply::Failed(reason));
            return;
        }
    };
    drop(factory);

    if replies.send(WorkerReply::Online).is_err() {
        return;
    }
    info!(generation, "forecast worker started");

    while let Ok(msg) = rx.recv() {
        let reply = match msg {
            WorkerMessage::Ping { seq } => WorkerReply::Pong { seq },
            WorkerMessage::Forecast {
                request_id,
                request,
            } => {
                debug!(generation, request_id, ptype = %request.ptype, "forecasting");
                WorkerReply::Completed {
                    request_id,
                    outcome: forecaster.forecast(&request),
                }
            }
            WorkerMessage::Shutdown => break,
        };
        if replies.send(reply).is_err() {
            // pool side is gone
            break;
        }
    }

    info!(generation, "forecast worker stopped");
}
