//! Teardown of client state, and the signal listener that triggers it.
use std::thread;

use signal_hook::consts::signal::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;
use tracing::{error, info, warn};

use crate::connection::ClientConnection;
use crate::queue::BoundedQueue;
use crate::server::ShutdownHandle;
use crate::{KvsEngine, KvsError, Result};

/// Bulk teardown of subscriptions and queued connections.
///
/// [`teardown`] empties every subscriber set in the store and then closes every connection still
/// waiting in the connection queue. Connections already taken by a worker are left alone; they
/// end when their client closes its channels.
///
/// [`teardown`]: #method.teardown
#[derive(Clone)]
pub struct TeardownController<E: KvsEngine> {
    engine: E,
    queue: BoundedQueue<ClientConnection>,
}

impl<E: KvsEngine> TeardownController<E> {
    /// creates a controller acting on `engine` and `queue`
    pub fn new(engine: E, queue: BoundedQueue<ClientConnection>) -> Self {
        TeardownController { engine, queue }
    }

    /// clears all subscriptions, then closes all queued connections. Returns the number of
    /// connections that were closed.
    pub fn teardown(&self) -> Result<usize> {
        self.engine.clear_subscriptions()?;
        let queued = self.queue.drain();
        let closed = queued.len();
        for conn in queued {
            conn.close();
        }
        info!(closed, "cleared all subscriptions and queued connections");
        Ok(closed)
    }
}

/// Listens for process signals on a dedicated thread.
///
/// - `SIGUSR1` runs the teardown of `controller`.
/// - `SIGINT` and `SIGTERM` shut the server down through `shutdown`.
///
/// The handlers run on an ordinary thread, not inside the signal handler, so they are free to
/// take the store's locks.
pub fn spawn_signal_listener<E: KvsEngine>(
    controller: TeardownController<E>,
    shutdown: ShutdownHandle,
) -> Result<()> {
    let mut signals = Signals::new(&[SIGUSR1, SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                match signal {
                    SIGUSR1 => {
                        if let Err(e) = controller.teardown() {
                            error!("teardown failed: {}", e);
                        }
                    }
                    SIGINT | SIGTERM => {
                        info!(signal, "shutdown signal received");
                        if let Err(e) = shutdown.shutdown() {
                            error!("could not wake the acceptor: {}", e);
                        }
                        break;
                    }
                    other => warn!(signal = other, "ignoring unexpected signal"),
                }
            }
        })
        .map_err(KvsError::Spawn)?;
    Ok(())
}
