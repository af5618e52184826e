//! Named-pipe (FIFO) transport.
//!
//! Every channel used by the server and its clients is a FIFO living in the filesystem and
//! identified by its path. This module creates, opens and removes them, and provides the
//! [`NotificationHandle`] that the store keeps in its subscriber sets.
use std::ffi::CString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::{KvsError, Result};

/// creates a new FIFO at `path` with mode 0666.
///
/// # Errors
/// fails if the path already exists or the FIFO could not be created
pub fn create_fifo(path: &Path) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| KvsError::Parsing(format!("channel path {:?} contains a NUL byte", path)))?;
    // SAFETY: c_path is a valid, NUL terminated C string that outlives the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
    if rc == -1 {
        return Err(io::Error::last_os_error().into());
    }
    debug!("created channel {:?}", path);
    Ok(())
}

/// opens the FIFO at `path` for reading. Blocks until a writer opens the other end.
pub fn open_reader(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().read(true).open(path)?)
}

/// opens the FIFO at `path` for writing. Blocks until a reader opens the other end.
pub fn open_writer(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().write(true).open(path)?)
}

/// removes the FIFO at `path` from the filesystem. A channel that is already gone is not an
/// error, the client side removes its own channels too.
pub fn remove_fifo(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("removed channel {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove channel {:?}: {}", path, e),
    }
}

/// resolves a channel name given on the command line into a path.
/// A bare name is placed in the system temp directory, anything containing a path separator
/// is used as given.
pub fn resolve_channel_path(name: &str) -> PathBuf {
    if name.contains('/') {
        PathBuf::from(name)
    } else {
        std::env::temp_dir().join(name)
    }
}

/// A write-only notification channel of one client connection.
///
/// Handles are cheap to clone; every clone refers to the same underlying channel. The
/// connection that opened the channel owns it, the store only keeps clones in the subscriber
/// sets of its entries. Two handles are equal only if they refer to the same channel.
#[derive(Clone)]
pub struct NotificationHandle {
    inner: Arc<NotificationSink>,
}

struct NotificationSink {
    label: String,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl NotificationHandle {
    /// wraps `writer` into a new notification handle. `label` is only used for logging.
    pub fn new<W: Write + Send + 'static>(label: impl Into<String>, writer: W) -> Self {
        NotificationHandle {
            inner: Arc::new(NotificationSink {
                label: label.into(),
                writer: Mutex::new(Box::new(writer)),
            }),
        }
    }

    /// writes a complete notification `message` into the channel
    pub fn send(&self, message: &str) -> io::Result<()> {
        let mut writer = self
            .inner
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "notification writer poisoned"))?;
        writer.write_all(message.as_bytes())?;
        writer.flush()
    }

    /// the label this handle was created with
    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

impl PartialEq for NotificationHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for NotificationHandle {}

impl fmt::Debug for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NotificationHandle").field(&self.inner.label).finish()
    }
}
