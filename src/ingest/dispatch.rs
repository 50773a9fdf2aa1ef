//! Bounded remote submission pool.
//!
//! Records go onto a bounded queue drained by a fixed number of workers.
//! Submitting never waits: a full queue drops the record and reports it,
//! so a slow or hung remote store cannot stall message consumption or
//! pile up unbounded in-flight requests.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::remote::{RemoteRecord, RemoteSink};
use super::IngestError;

pub struct RemoteDispatcher {
    tx: mpsc::Sender<RemoteRecord>,
    workers: Vec<JoinHandle<()>>,
}

impl RemoteDispatcher {
    /// Start `workers` submission tasks on the current runtime.
    pub fn spawn(sink: Arc<dyn RemoteSink>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(record) = next else { break };
                        submit(worker, sink.as_ref(), &record).await;
                    }
                    tracing::debug!(worker, "remote worker stopped");
                })
            })
            .collect();

        Self { tx, workers }
    }

    /// Queue a record without waiting.
    pub fn submit(&self, record: RemoteRecord) -> Result<(), IngestError> {
        self.tx.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => IngestError::QueueFull,
            TrySendError::Closed(_) => IngestError::QueueClosed,
        })
    }

    /// Close the queue and let workers drain it, giving up after `grace`.
    pub async fn shutdown(self, grace: Duration) {
        drop(self.tx);
        let deadline = tokio::time::Instant::now() + grace;
        for worker in self.workers {
            if tokio::time::timeout_at(deadline, worker).await.is_err() {
                tracing::warn!("remote submissions still pending at shutdown, abandoning");
                break;
            }
        }
    }
}

async fn submit(worker: usize, sink: &dyn RemoteSink, record: &RemoteRecord) {
    match sink.insert(record).await {
        Ok(()) => tracing::info!(
            worker,
            sink = sink.name(),
            device = %record.device_id,
            value = record.value,
            unit = %record.unit,
            "uploaded reading"
        ),
        Err(e) => tracing::error!(
            worker,
            sink = sink.name(),
            device = %record.device_id,
            error = %e,
            "remote insert failed"
        ),
    }
}
