use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use crate::{
    core::queue::{DrainReport, EnqueueOutcome, QueueError, RequestQueue},
    op::{PendingRequest, RequestArgs},
    types::ResourceId,
};

use super::events::QueueEvent;

/// Failures surfaced through the handle.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The engine rejected the command.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The engine task is gone.
    #[error("request queue runtime has stopped")]
    ChannelClosed,
}

/// Runtime tuning.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Commands buffered before callers wait.
    pub command_queue_bound: usize,
    /// Events a slow subscriber may fall behind before it lags.
    pub event_capacity: usize,
    /// Drain the durable queue every time connectivity comes back.
    pub drain_on_reconnect: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_queue_bound: 256,
            event_capacity: 1024,
            drain_on_reconnect: true,
        }
    }
}

type Lists = Vec<(ResourceId, Vec<PendingRequest>)>;

/// Clonable address of the one engine task. Every clone talks to the same engine.
pub struct RequestQueueHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<QueueEvent>,
}

impl Clone for RequestQueueHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

enum Command {
    Enqueue {
        operation_id: String,
        args: RequestArgs,
        resp: oneshot::Sender<Result<EnqueueOutcome, QueueError>>,
    },
    Dequeue {
        resp: oneshot::Sender<Result<Option<PendingRequest>, QueueError>>,
    },
    Drain {
        resp: oneshot::Sender<DrainReport>,
    },
    DrainRetryById {
        resource_id: ResourceId,
        resp: oneshot::Sender<DrainReport>,
    },
    Clear {
        resp: oneshot::Sender<Result<(), QueueError>>,
    },
    ClearDeadLetter {
        resp: oneshot::Sender<()>,
    },
    ClearRetry {
        resp: oneshot::Sender<()>,
    },
    RetryById {
        resource_id: ResourceId,
        resp: oneshot::Sender<Option<Vec<PendingRequest>>>,
    },
    DeadLetterById {
        resource_id: ResourceId,
        resp: oneshot::Sender<Option<Vec<PendingRequest>>>,
    },
    ClearRetryById {
        resource_id: ResourceId,
        resp: oneshot::Sender<Option<Vec<PendingRequest>>>,
    },
    ClearDeadLetterById {
        resource_id: ResourceId,
        resp: oneshot::Sender<Option<Vec<PendingRequest>>>,
    },
    RetryQueue {
        resp: oneshot::Sender<Lists>,
    },
    DeadLetterQueue {
        resp: oneshot::Sender<Lists>,
    },
    Queued {
        resp: oneshot::Sender<Result<Vec<PendingRequest>, QueueError>>,
    },
    Flush {
        resp: oneshot::Sender<Result<(), QueueError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Moves `queue` onto its own task and returns the handle that drives it.
pub fn spawn_request_queue(queue: RequestQueue, config: RuntimeConfig) -> RequestQueueHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<QueueEvent>(config.event_capacity.max(1));
    let mut online_rx = queue.connectivity().subscribe();

    let events_tx_loop = events_tx.clone();

    tokio::spawn(async move {
        let mut queue = queue;
        let mut watching = true;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    let done = handle_command(cmd, &mut queue).await;
                    publish(&mut queue, &events_tx_loop);
                    if done {
                        break;
                    }
                }
                changed = online_rx.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let online = *online_rx.borrow_and_update();
                    debug!(online, "connectivity changed");
                    if online && config.drain_on_reconnect {
                        info!("connectivity regained; draining queue");
                        queue.drain().await;
                        publish(&mut queue, &events_tx_loop);
                    }
                }
            }
        }
    });

    RequestQueueHandle { cmd_tx, events_tx }
}

impl RequestQueueHandle {
    /// Receiver for every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events_tx.subscribe()
    }

    /// Runs, diverts, or defers one operation.
    pub async fn enqueue(
        &self,
        operation_id: impl Into<String>,
        args: RequestArgs,
    ) -> Result<EnqueueOutcome, RuntimeError> {
        let operation_id = operation_id.into();
        Ok(self
            .call(|resp| Command::Enqueue {
                operation_id,
                args,
                resp,
            })
            .await??)
    }

    /// Pops the head of the durable queue. `None` when offline or empty.
    pub async fn dequeue(&self) -> Result<Option<PendingRequest>, RuntimeError> {
        Ok(self.call(|resp| Command::Dequeue { resp }).await??)
    }

    /// Replays the durable queue.
    pub async fn drain(&self) -> Result<DrainReport, RuntimeError> {
        self.call(|resp| Command::Drain { resp }).await
    }

    /// Gives the retry list of one resource another all-or-nothing attempt.
    pub async fn drain_retry_queue_by_id(
        &self,
        resource_id: ResourceId,
    ) -> Result<DrainReport, RuntimeError> {
        self.call(|resp| Command::DrainRetryById { resource_id, resp })
            .await
    }

    /// Empties the durable queue.
    pub async fn clear(&self) -> Result<(), RuntimeError> {
        Ok(self.call(|resp| Command::Clear { resp }).await??)
    }

    /// Drops every dead-lettered request.
    pub async fn clear_dead_letter_queue(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::ClearDeadLetter { resp }).await
    }

    /// Drops every request awaiting retry.
    pub async fn clear_retry_queue(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::ClearRetry { resp }).await
    }

    /// Retry list of one resource.
    pub async fn retry_queue_by_id(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<Vec<PendingRequest>>, RuntimeError> {
        self.call(|resp| Command::RetryById { resource_id, resp })
            .await
    }

    /// Dead-letter list of one resource.
    pub async fn dead_letter_queue_by_id(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<Vec<PendingRequest>>, RuntimeError> {
        self.call(|resp| Command::DeadLetterById { resource_id, resp })
            .await
    }

    /// Drops the retry list of one resource, returning it.
    pub async fn clear_retry_queue_by_id(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<Vec<PendingRequest>>, RuntimeError> {
        self.call(|resp| Command::ClearRetryById { resource_id, resp })
            .await
    }

    /// Drops the dead-letter list of one resource, returning it.
    pub async fn clear_dead_letter_queue_by_id(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<Vec<PendingRequest>>, RuntimeError> {
        self.call(|resp| Command::ClearDeadLetterById { resource_id, resp })
            .await
    }

    /// Every retry list, sorted by resource id.
    pub async fn retry_queue(&self) -> Result<Lists, RuntimeError> {
        self.call(|resp| Command::RetryQueue { resp }).await
    }

    /// Every dead-letter list, sorted by resource id.
    pub async fn dead_letter_queue(&self) -> Result<Lists, RuntimeError> {
        self.call(|resp| Command::DeadLetterQueue { resp }).await
    }

    /// Durable queue contents in FIFO order.
    pub async fn queued(&self) -> Result<Vec<PendingRequest>, RuntimeError> {
        Ok(self.call(|resp| Command::Queued { resp }).await??)
    }

    /// Pushes buffered store writes to durable storage.
    pub async fn flush(&self) -> Result<(), RuntimeError> {
        Ok(self.call(|resp| Command::Flush { resp }).await??)
    }

    /// Flushes the store and stops the engine task. Later calls on any clone fail
    /// with `ChannelClosed`.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Shutdown { resp }).await
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

async fn handle_command(cmd: Command, queue: &mut RequestQueue) -> bool {
    match cmd {
        Command::Enqueue {
            operation_id,
            args,
            resp,
        } => {
            let _ = resp.send(queue.enqueue(&operation_id, args).await);
        }
        Command::Dequeue { resp } => {
            let _ = resp.send(queue.dequeue().await);
        }
        Command::Drain { resp } => {
            let _ = resp.send(queue.drain().await);
        }
        Command::DrainRetryById { resource_id, resp } => {
            let _ = resp.send(queue.drain_retry_queue_by_id(&resource_id).await);
        }
        Command::Clear { resp } => {
            let _ = resp.send(queue.clear().await);
        }
        Command::ClearDeadLetter { resp } => {
            queue.clear_dead_letter_queue();
            let _ = resp.send(());
        }
        Command::ClearRetry { resp } => {
            queue.clear_retry_queue();
            let _ = resp.send(());
        }
        Command::RetryById { resource_id, resp } => {
            let _ = resp.send(queue.retry_queue_by_id(&resource_id));
        }
        Command::DeadLetterById { resource_id, resp } => {
            let _ = resp.send(queue.dead_letter_queue_by_id(&resource_id));
        }
        Command::ClearRetryById { resource_id, resp } => {
            let _ = resp.send(queue.clear_retry_queue_by_id(&resource_id));
        }
        Command::ClearDeadLetterById { resource_id, resp } => {
            let _ = resp.send(queue.clear_dead_letter_queue_by_id(&resource_id));
        }
        Command::RetryQueue { resp } => {
            let _ = resp.send(queue.retry_queue());
        }
        Command::DeadLetterQueue { resp } => {
            let _ = resp.send(queue.dead_letter_queue());
        }
        Command::Queued { resp } => {
            let _ = resp.send(queue.queued().await);
        }
        Command::Flush { resp } => {
            let _ = resp.send(queue.flush().await);
        }
        Command::Shutdown { resp } => {
            let _ = queue.flush().await;
            let _ = resp.send(());
            return true;
        }
    }

    false
}

fn publish(queue: &mut RequestQueue, events_tx: &broadcast::Sender<QueueEvent>) {
    for event in queue.take_events() {
        let _ = events_tx.send(event);
    }
}
