//! Background sync worker.
//!
//! [`SyncQueue`] is the subscriber registered on the dispatcher: it only
//! enqueues events, so mutations return without waiting on providers. Each
//! job waits for the previous job of the same appointment before taking its
//! lock, which keeps jobs for one appointment in arrival order while the
//! receive loop and other appointments keep moving.

use std::collections::HashMap;
use std::sync::Arc;

use booksync_core::{Appointment, AppointmentId};
use booksync_providers::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::dispatcher::{AppointmentEvent, Subscriber};
use crate::error::{EngineError, EngineResult};
use crate::orchestrator::SyncOrchestrator;

#[derive(Debug)]
enum WorkerMessage {
    Job(AppointmentEvent),
    Flush(oneshot::Sender<()>),
    Stop,
}

/// Enqueues appointment events for the worker.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    tx: mpsc::Sender<WorkerMessage>,
}

impl SyncQueue {
    /// Queues an event. Waits only when the queue is full.
    pub async fn enqueue(&self, event: AppointmentEvent) -> EngineResult<()> {
        debug!(
            appointment_id = %event.appointment.id,
            kind = ?event.kind,
            "Queueing sync job"
        );
        self.tx
            .send(WorkerMessage::Job(event))
            .await
            .map_err(|_| EngineError::WorkerStopped)
    }
}

impl Subscriber for SyncQueue {
    fn name(&self) -> &str {
        "sync-queue"
    }

    fn on_appointment_changed<'a>(
        &'a self,
        appointment: &'a Appointment,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(self.enqueue(AppointmentEvent::changed(appointment.clone())))
    }

    fn on_appointment_deleted<'a>(
        &'a self,
        appointment: &'a Appointment,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(self.enqueue(AppointmentEvent::deleted(appointment.clone())))
    }
}

/// Controls a running worker.
#[derive(Debug)]
pub struct SyncWorkerHandle {
    tx: mpsc::Sender<WorkerMessage>,
    task: JoinHandle<()>,
}

impl SyncWorkerHandle {
    /// Waits until every job queued before this call has finished.
    pub async fn flush(&self) -> EngineResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerMessage::Flush(reply_tx))
            .await
            .map_err(|_| EngineError::WorkerStopped)?;
        reply_rx.await.map_err(|_| EngineError::WorkerStopped)
    }

    /// Finishes queued jobs and stops the worker.
    pub async fn stop(self) -> EngineResult<()> {
        self.tx
            .send(WorkerMessage::Stop)
            .await
            .map_err(|_| EngineError::WorkerStopped)?;
        self.task.await.map_err(|e| {
            error!(error = %e, "Sync worker task failed");
            EngineError::WorkerStopped
        })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Spawns the worker on the current runtime.
pub fn spawn_worker(
    orchestrator: Arc<SyncOrchestrator>,
    capacity: usize,
) -> (SyncQueue, SyncWorkerHandle) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run(orchestrator, rx));
    (
        SyncQueue { tx: tx.clone() },
        SyncWorkerHandle { tx, task },
    )
}

/// Completion signal of the latest job queued for an appointment.
struct Tail {
    seq: u64,
    done: oneshot::Receiver<()>,
}

async fn run(orchestrator: Arc<SyncOrchestrator>, mut rx: mpsc::Receiver<WorkerMessage>) {
    info!("Sync worker started");
    let mut jobs = JoinSet::new();
    let mut tails: HashMap<AppointmentId, Tail> = HashMap::new();
    let mut seq = 0u64;

    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::Job(event) => {
                seq += 1;
                let id = event.appointment.id;
                let (done_tx, done) = oneshot::channel();
                let previous = tails.insert(id, Tail { seq, done });
                let orchestrator = orchestrator.clone();
                let job_seq = seq;
                jobs.spawn(async move {
                    if let Some(previous) = previous {
                        // A panicked predecessor drops its sender; go on anyway.
                        let _ = previous.done.await;
                    }
                    let _guard = orchestrator.lock(id).await;
                    orchestrator.process(&event).await;
                    let _ = done_tx.send(());
                    (id, job_seq)
                });
            }
            WorkerMessage::Flush(reply) => {
                while let Some(result) = jobs.join_next().await {
                    reap(&mut tails, result);
                }
                let _ = reply.send(());
            }
            WorkerMessage::Stop => break,
        }

        while let Some(result) = jobs.try_join_next() {
            reap(&mut tails, result);
        }
    }

    while let Some(result) = jobs.join_next().await {
        reap(&mut tails, result);
    }
    info!("Sync worker stopped");
}

/// Logs aborted jobs and forgets the tail of an appointment whose last
/// queued job has finished.
fn reap(
    tails: &mut HashMap<AppointmentId, Tail>,
    result: Result<(AppointmentId, u64), JoinError>,
) {
    match result {
        Ok((id, seq)) => {
            if tails.get(&id).is_some_and(|tail| tail.seq == seq) {
                tails.remove(&id);
            }
        }
        Err(e) => error!(error = %e, "Sync job aborted"),
    }
}
