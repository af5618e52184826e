use std::thread;

use crate::connection::{self, ClientConnection};
use crate::queue::BoundedQueue;
use crate::{KvsEngine, KvsError, Result};
use tracing::{debug, error, instrument};

/// A pool of connection workers fed by a shared connection queue.
///
/// Every worker loops over: take the next [`ClientConnection`] from the queue, service it
/// until it ends, repeat. A worker owns exactly one connection at a time and sits idle while
/// the queue is empty. Workers live for as long as the queue does.
///
/// If a worker panics while servicing a connection, its thread is replaced by a new one, so
/// the pool keeps its size. Failures to create a replacement thread are only logged, so the
/// number of workers can shrink after the pool is created.
pub struct ConnectionWorkerPool {
    workers: usize,
}

impl ConnectionWorkerPool {
    /// starts `workers` threads servicing connections from `queue` against `engine`
    ///
    /// # Errors
    /// returns an error if one of the worker threads could not be created
    pub fn start<E: KvsEngine>(
        workers: usize,
        queue: BoundedQueue<ClientConnection>,
        engine: E,
    ) -> Result<Self> {
        for id in 0..workers {
            let worker = Worker {
                id,
                queue: queue.clone(),
                engine: engine.clone(),
            };
            spawn_worker(worker)?;
        }
        debug!("started {} connection workers", workers);
        Ok(ConnectionWorkerPool { workers })
    }

    /// the number of workers the pool was started with
    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// The state a worker thread carries around. Additionally, this type is responsible for
/// restarting the thread if it panicked
#[derive(Clone)]
struct Worker<E: KvsEngine> {
    id: usize,
    queue: BoundedQueue<ClientConnection>,
    engine: E,
}

impl<E: KvsEngine> Drop for Worker<E> {
    fn drop(&mut self) {
        if thread::panicking() {
            debug!(worker = self.id, "worker panicked, starting a new thread");
            if let Err(e) = spawn_worker(self.clone()) {
                error!("Failed to spawn a thread: {}", e);
            }
        }
    }
}

fn spawn_worker<E: KvsEngine>(worker: Worker<E>) -> Result<()> {
    thread::Builder::new()
        .name(format!("conn-worker-{}", worker.id))
        .spawn(move || run_worker(worker))
        .map_err(KvsError::Spawn)?;
    Ok(())
}

/// waits for a connection to arrive on the worker's queue, and then services it
#[instrument(skip(worker), fields(worker = worker.id))]
fn run_worker<E: KvsEngine>(worker: Worker<E>) {
    while let Some(conn) = worker.queue.pop() {
        debug!("took a connection off the queue");
        connection::serve(&worker.engine, conn);
    }
    debug!("worker exited because the connection queue was closed");
}
