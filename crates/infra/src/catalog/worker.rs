//! Background import worker.
//!
//! One thread, one import at a time, in submission order. Imports never share
//! a lock with each other or with order processing; each row commits on its
//! own.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use stockline_core::ImportId;

use crate::store::Store;

use super::blob::BlobStore;
use super::job::ImportService;

/// Sending half of the import queue.
#[derive(Debug, Clone)]
pub struct ImportQueue {
    tx: Sender<ImportId>,
}

impl ImportQueue {
    /// Returns false when the worker has gone away.
    pub fn enqueue(&self, import_id: ImportId) -> bool {
        match self.tx.send(import_id) {
            Ok(()) => true,
            Err(_) => {
                warn!(import_id = %import_id, "import worker is gone; import stays pending");
                false
            }
        }
    }
}

/// Receiving half, consumed by [`ImportWorker::spawn`].
#[derive(Debug)]
pub struct ImportInbox {
    rx: Receiver<ImportId>,
}

pub fn import_queue() -> (ImportQueue, ImportInbox) {
    let (tx, rx) = mpsc::channel();
    (ImportQueue { tx }, ImportInbox { rx })
}

/// Handle to control and join the worker thread.
#[derive(Debug)]
pub struct ImportWorkerHandle {
    shutdown: Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl ImportWorkerHandle {
    /// Finish the import in progress, then stop. Queued imports stay pending.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[derive(Debug)]
pub struct ImportWorker;

impl ImportWorker {
    pub fn spawn<S, F>(
        name: &str,
        service: Arc<ImportService<S, F>>,
        inbox: ImportInbox,
    ) -> io::Result<ImportWorkerHandle>
    where
        S: Store + 'static,
        F: BlobStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let worker = name.to_string();

        let join = thread::Builder::new()
            .name(worker.clone())
            .spawn(move || worker_loop(&worker, &service, inbox, shutdown_rx))?;

        Ok(ImportWorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<S, F>(
    name: &str,
    service: &ImportService<S, F>,
    inbox: ImportInbox,
    shutdown_rx: Receiver<()>,
) where
    S: Store,
    F: BlobStore,
{
    let tick = Duration::from_millis(100);
    info!(worker = name, "import worker started");

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match inbox.rx.recv_timeout(tick) {
            Ok(import_id) => {
                if let Err(err) = service.run(import_id) {
                    error!(worker = name, import_id = %import_id, error = %err, "import run failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = name, "import worker stopped");
}
