use std::sync::Mutex;

use crate::job::{self, Backups, JobDirectory};
use crate::{KvsEngine, KvsError, Result};
use tracing::{debug, error, info};

/// A pool of job workers running on a thread pool built by the [`Rayon`] library.
///
/// [`run`] starts one job worker per thread. Each worker claims the next job file of the
/// jobs directory, executes it to completion, and claims the next one until the directory
/// is exhausted. Job files are processed in parallel, claiming them is serialized by the
/// [`JobDirectory`].
///
/// [`Rayon`]: https://docs.rs/rayon/latest/rayon/index.html
/// [`run`]: #method.run
/// [`JobDirectory`]: ../struct.JobDirectory.html
pub struct JobWorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl JobWorkerPool {
    /// builds a pool of `threads` job workers
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("job-worker-{}", i))
            .build()?;
        debug!("created job pool with {} threads", threads);
        Ok(JobWorkerPool { pool, threads })
    }

    /// runs job workers until every job file in `jobs` has been executed.
    ///
    /// A job that fails is logged and does not stop its worker, except when a backup thread
    /// could not be created: that worker stops and the error is returned once the remaining
    /// workers are done.
    pub fn run<E: KvsEngine>(
        &self,
        jobs: &JobDirectory,
        engine: &E,
        backups: &Backups,
    ) -> Result<()> {
        let fatal: Mutex<Option<KvsError>> = Mutex::new(None);
        self.pool.scope(|scope| {
            for _ in 0..self.threads {
                scope.spawn(|_| {
                    if let Err(e) = work(jobs, engine, backups) {
                        error!("job worker stopped: {}", e);
                        if let Ok(mut slot) = fatal.lock() {
                            slot.get_or_insert(e);
                        }
                    }
                });
            }
        });
        info!("jobs directory {:?} exhausted", jobs.path());
        match fatal.into_inner()? {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn work<E: KvsEngine>(jobs: &JobDirectory, engine: &E, backups: &Backups) -> Result<()> {
    while let Some(task) = jobs.claim_next()? {
        debug!(job = %task.name, "claimed job");
        match job::run_job(engine, backups, &task) {
            Ok(()) => {}
            // running out of threads is fatal to the worker
            Err(e @ KvsError::Spawn(_)) => return Err(e),
            Err(e) => error!(job = %task.name, "job failed: {}", e),
        }
    }
    Ok(())
}
