use std::io;
use thiserror::Error;

/// type alias for all operations on a [`KvStore`] and its servers that could fail with a
/// [`KvsError`]
///
/// [`KvStore`]: ./struct.KvStore.html
pub type Result<T> = std::result::Result<T, KvsError>;

/// The Error variants used throughout the kvs server, client and job runner.
#[derive(Error, Debug)]
pub enum KvsError {
    /// variant for errors caused by file or named-pipe IO
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// variant for errors when a key was not found in the KV Store
    #[error("Key not found")]
    KeyNotFound,

    /// the key exists but the given notification channel is not subscribed to it
    #[error("Subscription not found")]
    SubscriptionNotFound,

    /// the key can not be stored, its first character does not map onto a table bucket
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// a fixed-width protocol frame could not be built or decoded
    #[error("malformed frame: {0}")]
    Frame(String),

    /// errors while parsing command line arguments, job files or client commands
    #[error("{0}")]
    Parsing(String),

    /// a thread panicked while holding one of the store locks
    #[error("a lock was poisoned by a panicked thread")]
    LockPoisoned,

    /// a worker or backup thread could not be created
    #[error("could not spawn thread: {0}")]
    Spawn(io::Error),

    /// the job worker pool could not be built
    #[error("could not build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// a general error, containing a description of the error
    #[error("{0}")]
    StringErr(String),
}

impl<T> From<std::sync::PoisonError<T>> for KvsError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        KvsError::LockPoisoned
    }
}
