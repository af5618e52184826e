//! The two worker pools of the server.
//!
//! - [`ConnectionWorkerPool`] is a fixed set of long-lived threads that take client
//!   connections off a shared [`BoundedQueue`] and service each one until it ends.
//! - [`JobWorkerPool`] runs a fixed number of job workers on a [`rayon`] thread pool. The
//!   workers claim job files from a [`JobDirectory`] until none are left.
//!
//! [`BoundedQueue`]: ../struct.BoundedQueue.html
//! [`JobDirectory`]: ../struct.JobDirectory.html
//! [`rayon`]: https://docs.rs/rayon/latest/rayon/index.html

mod rayon_pool;
mod shared_queue;

pub use self::rayon_pool::JobWorkerPool;
pub use self::shared_queue::ConnectionWorkerPool;
