use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::{debug, error};

use crate::{KvsError, Result};

/// Limits the number of backups running at the same time.
///
/// Every backup holds a [`BackupPermit`] for as long as it runs. [`spawn`] blocks while
/// `max_backups` backups are already in flight and continues as soon as any one of them has
/// finished. Cloning gives another handle to the same limiter.
///
/// [`spawn`]: #method.spawn
#[derive(Clone, Debug)]
pub struct Backups {
    state: Arc<(Mutex<usize>, Condvar)>,
    max_backups: usize,
}

/// A slot in the backup limiter. The slot is given back when the permit is dropped.
#[derive(Debug)]
pub struct BackupPermit {
    state: Arc<(Mutex<usize>, Condvar)>,
}

impl Backups {
    /// creates a limiter allowing `max_backups` backups in flight
    pub fn new(max_backups: usize) -> Self {
        Backups {
            state: Arc::new((Mutex::new(0), Condvar::new())),
            max_backups,
        }
    }

    /// the maximum number of backups in flight
    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// the number of backups currently in flight
    pub fn in_flight(&self) -> Result<usize> {
        Ok(*self.state.0.lock()?)
    }

    /// waits for a free slot and takes it
    pub fn acquire(&self) -> Result<BackupPermit> {
        let (lock, cvar) = &*self.state;
        let mut active = lock.lock()?;
        while *active >= self.max_backups {
            debug!(active = *active, "waiting for a backup to finish");
            active = cvar.wait(active)?;
        }
        *active += 1;
        Ok(BackupPermit {
            state: Arc::clone(&self.state),
        })
    }

    /// waits for a free slot, then runs `task` on a detached thread named `name`.
    /// The slot is held until `task` returns. Errors returned by `task` are logged.
    ///
    /// # Errors
    /// returns an error if the backup thread could not be created
    pub fn spawn<F>(&self, name: String, task: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.acquire()?.run(name, task)
    }

    /// blocks until no backup is in flight
    pub fn wait_idle(&self) -> Result<()> {
        let (lock, cvar) = &*self.state;
        let mut active = lock.lock()?;
        while *active > 0 {
            active = cvar.wait(active)?;
        }
        Ok(())
    }
}

impl BackupPermit {
    /// runs `task` on a detached thread named `name`, holding this slot until `task` returns.
    /// Errors returned by `task` are logged.
    ///
    /// # Errors
    /// returns an error if the backup thread could not be created. The slot is given back.
    pub fn run<F>(self, name: String, task: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _permit = self;
                match task() {
                    Ok(()) => debug!(backup = %name, "backup finished"),
                    Err(e) => error!(backup = %name, "Failed to do backup: {}", e),
                }
            })
            .map_err(KvsError::Spawn)?;
        Ok(())
    }
}

impl Drop for BackupPermit {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.state;
        // a poisoned counter is still a counter
        let mut active = lock.lock().unwrap_or_else(|e| e.into_inner());
        *active -= 1;
        cvar.notify_all();
    }
}
