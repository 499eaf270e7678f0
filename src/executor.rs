//! Single-thread serial executor.
//!
//! Each logical camera owns two of these: one for blocking physical
//! open/close work, one for callback delivery and streaming rebuilds.
//! Jobs run one at a time in submission order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

/// A unit of work for an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a worker thread that runs jobs serially.
///
/// Cloning the handle shares the same worker.
#[derive(Clone)]
pub struct SerialExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    name: String,
    /// `None` once shut down
    sender: Mutex<Option<Sender<Job>>>,
    thread_id: ThreadId,
}

impl std::fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("name", &self.inner.name)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl SerialExecutor {
    /// Spawn a new worker thread with the given name.
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(rx))?;

        Ok(Self {
            inner: Arc::new(ExecutorInner {
                name,
                sender: Mutex::new(Some(tx)),
                thread_id: handle.thread().id(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue a job. Returns false if the executor has been shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = match self.inner.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match sender.as_ref() {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => {
                log::debug!("{}: dropping job submitted after shutdown", self.inner.name);
                false
            }
        }
    }

    /// Stop accepting jobs. Already queued jobs still run.
    ///
    /// Never blocks, so it is safe to call from a job on this executor.
    pub fn shutdown(&self) {
        let mut sender = match self.inner.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if sender.take().is_some() {
            log::debug!("{}: shutting down", self.inner.name);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        match self.inner.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// True when called from this executor's worker thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }
}

fn run_worker(rx: Receiver<Job>) {
    // Exits once every sender is gone and the queue is drained
    while let Ok(job) = rx.recv() {
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!(
                "{}: job panicked: {}",
                thread::current().name().unwrap_or("executor"),
                msg
            );
        }
    }
}
