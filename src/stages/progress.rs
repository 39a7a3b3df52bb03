use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notification about orchestration progress
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    StepCompleted {
        position: u32,
        name: String,
        score: f64,
        weight: u32,
        compliant: bool,
        citation_count: usize,
        tokens: u64,
    },
    StepFailed {
        position: u32,
        name: String,
        error: String,
    },
    Progress {
        completed: usize,
        total: usize,
        failed: usize,
        phase: String,
    },
}

/// Fire-and-forget emitter: never waits on the receiving side
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    sender: mpsc::Sender<ProgressEvent>,
}

impl ProgressEmitter {
    pub fn new(sender: mpsc::Sender<ProgressEvent>) -> Self {
        Self { sender }
    }

    /// Emitter plus the receiving end of a bounded channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(sender), receiver)
    }

    /// Drops the event if the channel is full or closed
    pub fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.sender.try_send(event) {
            debug!("Progress event dropped: {}", e);
        }
    }
}

/// Consumer of progress events (webhooks, realtime push, ...)
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn deliver(&self, event: ProgressEvent) -> anyhow::Result<()>;
}

/// Sink that only logs
pub struct TracingProgressSink;

#[async_trait]
impl ProgressSink for TracingProgressSink {
    async fn deliver(&self, event: ProgressEvent) -> anyhow::Result<()> {
        match &event {
            ProgressEvent::StepCompleted {
                position,
                name,
                score,
                weight,
                citation_count,
                ..
            } => info!(
                position,
                "Step {} done: {}/{} ({} citations)", name, score, weight, citation_count
            ),
            ProgressEvent::StepFailed { position, name, error } => {
                warn!(position, "Step {} failed: {}", name, error)
            }
            ProgressEvent::Progress {
                completed,
                total,
                failed,
                phase,
            } => info!("Progress [{}]: {}/{} ({} failed)", phase, completed, total, failed),
        }
        Ok(())
    }
}

/// Drain events into a sink on a separate task
///
/// Delivery errors are logged and never retried.
pub fn spawn_progress_forwarder<S>(
    mut receiver: mpsc::Receiver<ProgressEvent>,
    sink: S,
) -> JoinHandle<()>
where
    S: ProgressSink + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if let Err(e) = sink.deliver(event).await {
                warn!("Progress delivery failed: {}", e);
            }
        }
    })
}
