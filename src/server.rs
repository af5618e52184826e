use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, instrument, warn};

use crate::channel;
use crate::connection::ClientConnection;
use crate::job::{Backups, JobDirectory};
use crate::protocol::{ChannelPaths, REGISTRATION_FRAME_SIZE};
use crate::queue::BoundedQueue;
use crate::teardown::{self, TeardownController};
use crate::thread_pool::{ConnectionWorkerPool, JobWorkerPool};
use crate::{KvsEngine, KvsError, Result};

/// default number of connection workers
pub const DEFAULT_CONNECTION_WORKERS: usize = 8;

/// default capacity of the connection queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

// how long the acceptor waits on a full queue before checking for a shutdown again
const PUSH_RETRY: Duration = Duration::from_millis(100);

// how long a shutdown waits for an acceptor stuck opening a client's channels
const ACCEPTOR_GRACE: Duration = Duration::from_secs(2);

const WAIT_POLL: Duration = Duration::from_millis(100);

/// Settings of a [`KvsServer`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// directory holding the `.job` files to execute
    pub jobs_dir: PathBuf,
    /// number of job workers
    pub max_threads: usize,
    /// maximum number of backups in flight
    pub max_backups: usize,
    /// path of the registration channel clients connect through
    pub registration_path: PathBuf,
    /// number of connection workers
    pub connection_workers: usize,
    /// capacity of the queue of accepted, not yet serviced connections
    pub queue_capacity: usize,
}

impl ServerConfig {
    /// creates a config with the default number of connection workers and queue capacity
    pub fn new(
        jobs_dir: impl Into<PathBuf>,
        max_threads: usize,
        max_backups: usize,
        registration_path: impl Into<PathBuf>,
    ) -> Self {
        ServerConfig {
            jobs_dir: jobs_dir.into(),
            max_threads,
            max_backups,
            registration_path: registration_path.into(),
            connection_workers: DEFAULT_CONNECTION_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// checks that every count is positive
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("max_threads", self.max_threads),
            ("max_backups", self.max_backups),
            ("connection workers", self.connection_workers),
            ("queue capacity", self.queue_capacity),
        ];
        for (name, count) in counts.iter() {
            if *count == 0 {
                return Err(KvsError::Parsing(format!(
                    "{} must be a positive number",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// A key value store server over named pipes.
///
/// Clients register through a single, well known registration channel. The acceptor opens the
/// channels named in each registration and queues the connection for one of a fixed number of
/// connection workers. Independently of the clients, a pool of job workers executes the job
/// files of the jobs directory against the same store.
///
/// # Example
/// ```rust,no_run
/// use pipekvs::{KvStore, KvsServer, ServerConfig};
/// # fn main() -> pipekvs::Result<()> {
/// let config = ServerConfig::new("./jobs", 4, 2, "/tmp/kvs-server");
/// let server = KvsServer::new(KvStore::new(), config);
/// server.run()?;
/// # Ok(())
/// # }
/// ```
pub struct KvsServer<E: KvsEngine> {
    engine: E,
    config: ServerConfig,
}

impl<E: KvsEngine> KvsServer<E> {
    /// Create a new `KvsServer` using the given [`KvsEngine`] and settings.
    pub fn new(engine: E, config: ServerConfig) -> Self {
        KvsServer { engine, config }
    }

    /// the engine this server works on
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// creates the registration channel and starts accepting clients. Connection workers and
    /// the acceptor run on their own threads; the returned [`Listener`] controls them.
    ///
    /// # Errors
    /// fails if the registration channel already exists or a thread could not be created
    pub fn listen(&self) -> Result<Listener<E>> {
        self.config.validate()?;
        let path = self.config.registration_path.clone();
        channel::create_fifo(&path)?;

        match self.start_accepting(&path) {
            Ok(listener) => Ok(listener),
            Err(e) => {
                channel::remove_fifo(&path);
                Err(e)
            }
        }
    }

    fn start_accepting(&self, path: &Path) -> Result<Listener<E>> {
        // read and write, so that reads block instead of returning end-of-stream while no
        // client has the channel open
        let registrations = OpenOptions::new().read(true).write(true).open(path)?;

        let queue = BoundedQueue::new(self.config.queue_capacity)?;
        let workers = ConnectionWorkerPool::start(
            self.config.connection_workers,
            queue.clone(),
            self.engine.clone(),
        )?;
        let shutdown = ShutdownHandle {
            requested: Arc::new(AtomicBool::new(false)),
            registration_path: path.to_path_buf(),
        };

        let (stopped_tx, stopped) = bounded::<()>(1);
        let acceptor = Acceptor {
            registrations,
            queue: queue.clone(),
            shutdown: shutdown.clone(),
            _stopped: stopped_tx,
        };
        let handle = thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || acceptor.run())
            .map_err(KvsError::Spawn)?;

        info!(
            "listening on {:?} with {} connection workers",
            path,
            workers.workers()
        );
        Ok(Listener {
            acceptor: Some(handle),
            stopped,
            teardown: TeardownController::new(self.engine.clone(), queue),
            shutdown,
        })
    }

    /// executes every job file of the jobs directory and waits for all backups to finish
    pub fn run_jobs(&self) -> Result<()> {
        let jobs = JobDirectory::open(&self.config.jobs_dir)?;
        let backups = Backups::new(self.config.max_backups);
        let pool = JobWorkerPool::new(self.config.max_threads)?;
        let result = pool.run(&jobs, &self.engine, &backups);
        // backups of finished jobs are waited for even if a worker failed
        backups.wait_idle()?;
        result
    }

    /// starts accepting clients, runs all jobs, then keeps serving clients until the server is
    /// shut down by `SIGINT` or `SIGTERM`. `SIGUSR1` tears down all subscriptions and queued
    /// connections. The registration channel is removed before returning.
    pub fn run(self) -> Result<()> {
        // the jobs directory must be readable before any channel is created
        JobDirectory::open(&self.config.jobs_dir)?;
        let mut listener = self.listen()?;
        if let Err(e) =
            teardown::spawn_signal_listener(listener.teardown_controller(), listener.shutdown_handle())
        {
            listener.shutdown()?;
            return Err(e);
        }
        if let Err(e) = self.run_jobs() {
            error!("job processing failed: {}", e);
            listener.shutdown()?;
            return Err(e);
        }
        info!("all jobs done, serving clients");
        listener.wait();
        Ok(())
    }
}

/// Handle to a listening server.
pub struct Listener<E: KvsEngine> {
    acceptor: Option<JoinHandle<()>>,
    // disconnects once the acceptor thread has exited
    stopped: Receiver<()>,
    teardown: TeardownController<E>,
    shutdown: ShutdownHandle,
}

impl<E: KvsEngine> Listener<E> {
    /// clears all subscriptions and closes every queued connection, see [`TeardownController`]
    pub fn teardown(&self) -> Result<usize> {
        self.teardown.teardown()
    }

    /// the teardown controller of this server
    pub fn teardown_controller(&self) -> TeardownController<E> {
        self.teardown.clone()
    }

    /// a handle that can shut the server down from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// stops accepting clients, waits for the acceptor to exit and removes the registration
    /// channel
    pub fn shutdown(&mut self) -> Result<()> {
        self.shutdown.shutdown()?;
        self.wait();
        Ok(())
    }

    /// waits until the acceptor exits, then removes the registration channel.
    ///
    /// Once a shutdown was requested, an acceptor that is still blocked opening the channels
    /// of a client after a short grace period is left behind.
    pub fn wait(&mut self) {
        let mut deadline = None;
        while let Some(handle) = self.acceptor.take() {
            match self.stopped.recv_timeout(WAIT_POLL) {
                Err(RecvTimeoutError::Timeout) if self.shutdown.is_requested() => {
                    let deadline =
                        *deadline.get_or_insert_with(|| Instant::now() + ACCEPTOR_GRACE);
                    if Instant::now() >= deadline {
                        warn!("the acceptor is blocked on a client, not waiting for it");
                    } else {
                        self.acceptor = Some(handle);
                    }
                }
                Err(RecvTimeoutError::Timeout) => self.acceptor = Some(handle),
                _ => {
                    if handle.join().is_err() {
                        error!("the acceptor thread panicked");
                    }
                }
            }
        }
        channel::remove_fifo(&self.shutdown.registration_path);
    }
}

/// Asks the acceptor of a server to stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    registration_path: PathBuf,
}

impl ShutdownHandle {
    /// flags the shutdown and wakes the acceptor with an empty frame
    pub fn shutdown(&self) -> Result<()> {
        if self.requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // non-blocking, the open would otherwise hang if the acceptor already closed its end
        let opened = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.registration_path);
        match opened {
            Ok(mut registrations) => registrations.write_all(&[0u8; REGISTRATION_FRAME_SIZE])?,
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => debug!("acceptor already stopped"),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// returns `true` once a shutdown was requested
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

struct Acceptor {
    registrations: std::fs::File,
    queue: BoundedQueue<ClientConnection>,
    shutdown: ShutdownHandle,
    // dropped along with the acceptor, which tells the listener it has exited
    _stopped: Sender<()>,
}

impl Acceptor {
    /// reads registration frames until a shutdown is requested, queueing a connection for
    /// every well formed one
    #[instrument(skip(self))]
    fn run(mut self) {
        let mut frame = [0u8; REGISTRATION_FRAME_SIZE];
        while !self.shutdown.is_requested() {
            let len = match self.registrations.read(&mut frame) {
                Ok(len) => len,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("could not read the registration channel: {}", e);
                    return;
                }
            };
            if self.shutdown.is_requested() {
                break;
            }

            let paths = match ChannelPaths::decode(&frame[..len]) {
                Some(paths) => paths,
                None => {
                    debug!(len, "discarding malformed registration frame");
                    continue;
                }
            };
            debug!(?paths, "registration received");

            let conn = match ClientConnection::open(paths) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("could not open client channels: {}", e);
                    continue;
                }
            };
            if !self.enqueue(conn) {
                return;
            }
        }
        info!("acceptor stopped");
    }

    /// queues `conn`, waiting while the queue is full. Returns `false` if the acceptor has to
    /// stop, in which case `conn` was closed.
    fn enqueue(&self, mut conn: ClientConnection) -> bool {
        loop {
            match self.queue.push_timeout(conn, PUSH_RETRY) {
                Ok(None) => return true,
                Ok(Some(pending)) if self.shutdown.is_requested() => {
                    info!("shutdown requested, dropping a connection waiting for the queue");
                    pending.close();
                    return false;
                }
                Ok(Some(pending)) => conn = pending,
                Err(e) => {
                    error!("could not queue connection: {}", e);
                    return false;
                }
            }
        }
    }
}
