//! Runs a [`Session`] as a single task. Timers, submitted commands and
//! deferred work all arrive through one mailbox, so no two operations on the
//! session ever overlap.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::client::{ClimateClientBuilder, Session};
use crate::config::Config;
use crate::scheduler::{Deferred, Scheduler};
use crate::transport::{TokioTransport, Transport};
use crate::types::Field;
use crate::{Error, Result};

enum Message {
    Command {
        field: Field,
        value: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Deferred(Deferred),
    CycleNow,
    Shutdown(oneshot::Sender<()>),
}

/// Sleeps on a spawned task, then posts the work back into the mailbox.
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<Message>,
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Deferred) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // the actor is gone after shutdown; nothing left to do
            let _ = tx.send(Message::Deferred(task));
        });
    }
}

/// Handle to a running session task.
#[derive(Clone)]
pub struct ClimateClient {
    tx: mpsc::UnboundedSender<Message>,
}

impl ClimateClient {
    pub fn builder(config: Config) -> ClimateClientBuilder {
        ClimateClientBuilder::new(config)
    }

    /// Queue a command; `Field::Type` takes the composite values
    /// `off`, `cool`, `fan_only` and `heat`.
    pub async fn submit(&self, field: Field, value: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Command {
                field,
                value: value.into(),
                reply,
            })
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Start a discovery cycle without waiting for the cycle timer.
    pub fn run_cycle_now(&self) -> Result<()> {
        self.tx
            .send(Message::CycleNow)
            .map_err(|_| Error::NotConnected)
    }

    /// Disconnect and stop the session task.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Message::Shutdown(done))
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::NotConnected)
    }
}

impl ClimateClientBuilder {
    /// Bind the callback listener and start the session task.
    pub async fn spawn(self) -> Result<ClimateClient> {
        let transport = TokioTransport::bind(&self.config, self.timing.connect_timeout).await?;
        self.spawn_with(transport)
    }

    /// Start the session task over any transport.
    pub fn spawn_with<T: Transport + 'static>(self, transport: T) -> Result<ClimateClient> {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler { tx: tx.clone() };
        let session = self.build_session(transport, scheduler)?;
        tokio::spawn(run_session(session, rx));
        Ok(ClimateClient { tx })
    }
}

async fn run_session<T: Transport + 'static>(
    mut session: Session<T, TokioScheduler>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    let timing = session.timing().clone();
    let start = Instant::now() + timing.start_delay;
    let mut cycle = interval_at(start, timing.cycle_interval);
    cycle.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick = interval_at(start, timing.tick_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(remote = %session.config().remote(), "session task started");

    loop {
        tokio::select! {
            _ = cycle.tick() => run_cycle(&mut session).await,
            _ = tick.tick() => {
                session.debounce_tick();
            }
            msg = rx.recv() => match msg {
                Some(Message::Command { field, value, reply }) => {
                    let _ = reply.send(session.submit_command(field, &value));
                }
                Some(Message::Deferred(task)) => {
                    if let Err(e) = session.run_deferred(task).await {
                        warn!("deferred task failed: {e}");
                    }
                }
                Some(Message::CycleNow) => run_cycle(&mut session).await,
                Some(Message::Shutdown(done)) => {
                    session.disconnect().await;
                    let _ = done.send(());
                    break;
                }
                None => {
                    session.disconnect().await;
                    break;
                }
            },
        }
    }

    info!("session task stopped");
}

async fn run_cycle<T: Transport>(session: &mut Session<T, TokioScheduler>) {
    match session.run_cycle().await {
        Ok(()) => {}
        Err(Error::Busy) => debug!("previous session still open"),
        Err(e) => debug!("cycle ended early: {e}"),
    }
}
