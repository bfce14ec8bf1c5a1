//! Async event loop around the engine.
//!
//! One task owns the [`Engine`]. Everything else talks to it through an
//! [`EngineHandle`]: store events go in over an mpsc channel in arrival
//! order, and the loop sleeps until the engine's next deadline when idle.

use std::future::Future;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{Engine, EngineEvent, EngineSnapshot};
use crate::clock;
use crate::error::{Error, Result};
use crate::store::StoreEvent;

/// Messages accepted by the engine loop.
#[derive(Debug)]
enum Command {
    Event(StoreEvent),
    Snapshot(oneshot::Sender<EngineSnapshot>),
}

/// Handle to a running engine task.
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    shutdown: broadcast::Sender<()>,
    events: broadcast::Sender<EngineEvent>,
    task: JoinHandle<Engine>,
}

impl EngineHandle {
    /// Spawn the engine loop on the current runtime.
    pub fn spawn(engine: Engine) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let events = engine.event_tx.clone();
        let task = tokio::spawn(run(engine, rx, shutdown_rx));
        Self {
            tx,
            shutdown,
            events,
            task,
        }
    }

    /// Queue a store event. Events are handled strictly in send order.
    pub async fn send(&self, event: StoreEvent) -> Result<()> {
        self.tx
            .send(Command::Event(event))
            .await
            .map_err(|_| Error::EngineStopped)
    }

    /// Current engine state, after every event sent before this call.
    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply))
            .await
            .map_err(|_| Error::EngineStopped)?;
        rx.await.map_err(|_| Error::EngineStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Stop the loop and hand the engine back.
    pub async fn shutdown(self) -> Result<Engine> {
        let _ = self.shutdown.send(());
        self.task
            .await
            .map_err(|e| Error::Internal(format!("engine task failed: {e}")))
    }
}

/// Drive `engine` until shutdown or until every sender is gone.
async fn run(
    mut engine: Engine,
    mut rx: mpsc::Receiver<Command>,
    mut shutdown: broadcast::Receiver<()>,
) -> Engine {
    tracing::debug!("Engine loop started");

    loop {
        let wake = wakeup(&engine);

        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                tracing::debug!("Engine loop shutting down");
                break;
            }

            cmd = rx.recv() => match cmd {
                Some(Command::Event(event)) => {
                    if engine.handle_event(event) {
                        tracing::debug!(current = ?engine.current_uplink(), "Winner changed");
                    }
                }
                Some(Command::Snapshot(reply)) => {
                    let _ = reply.send(engine.snapshot());
                }
                None => {
                    tracing::debug!("All engine handles dropped");
                    break;
                }
            },

            () = wake => {
                engine.on_timer();
            }
        }
    }

    engine
}

/// Sleep until the engine's next deadline, or forever when it has none.
fn wakeup(engine: &Engine) -> impl Future<Output = ()> {
    let delay = engine
        .next_wakeup()
        .map(|at| clock::until(engine.clock().as_ref(), at));
    async move {
        match delay {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    }
}
