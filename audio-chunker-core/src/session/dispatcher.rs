use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Sender};

use crate::models::error::ChunkerError;
use crate::pipeline::pipeline::Pipeline;

/// Work the bus sync handler defers off the data path.
pub(crate) enum DispatchTask {
    /// Tear the pipeline down after a terminal event.
    Teardown,
    /// End the dispatcher thread.
    Shutdown,
}

/// Single event loop performing pipeline teardown away from data threads.
///
/// The bus sync handler runs inline with media delivery: it may flag state
/// and notify observers, but stopping the pipeline joins worker threads and
/// must never run on a thread the join would wait on. Terminal events queue
/// a teardown here instead.
pub(crate) struct Dispatcher {
    tx: Sender<DispatchTask>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn spawn(pipeline: Arc<Pipeline>) -> Result<Self, ChunkerError> {
        let (tx, rx) = unbounded();
        let worker = thread::Builder::new()
            .name("chunker-dispatch".into())
            .spawn(move || {
                for task in rx {
                    match task {
                        DispatchTask::Teardown => {
                            if let Err(e) = pipeline.stop() {
                                log::error!("pipeline teardown failed: {e}");
                            }
                        }
                        DispatchTask::Shutdown => break,
                    }
                }
            })
            .map_err(|e| ChunkerError::Unknown(format!("failed to spawn dispatcher: {e}")))?;

        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    pub(crate) fn sender(&self) -> Sender<DispatchTask> {
        self.tx.clone()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(DispatchTask::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
