#![deny(missing_docs)]
//! A multithreaded, in-memory key-value store (kvs) served over named pipes, that maps
//! [`String`] keys to [`String`] values and notifies subscribed clients of changes to their keys.
//!
//! This crate provides the [`KvStore`] implementation itself, as well as a [`kvs-client`]
//! and [`kvs-server`] executable that can be used to interact with the engine.
//! Clients and the server talk over named pipes (FIFOs) using a custom, fixed-width protocol.
//!
//! ## Supported Storage Operations
//! The kvs engine supports the following operations:
//!
//! - `SET` a key/value pair in the store, notifying the key's subscribers
//! - `GET` a value associated with a key from the store
//! - `REMOVE` a key/value pair from the store, notifying the key's subscribers
//! - `DUMP` a listing of every key/value pair
//! - `SUBSCRIBE` / `UNSUBSCRIBE` a client's notification channel to a key
//!
//! See the [`KvsEngine`] trait for more information on these operations.
//!
//! ## KvStore
//! [`KvStore`] is the implementor of the [`KvsEngine`] trait and the brains of this entire
//! operation. Keys are kept in 26 buckets selected by the key's first character, all of them
//! behind one reader/writer lock. Every entry carries the set of notification channels
//! subscribed to its key.
//!
//! ## Server
//! The [`KvsServer`] has two independent halves:
//!
//! - client connections: an acceptor reads registrations from the server's well known
//!   registration channel and hands every new connection to a fixed pool of connection
//!   workers through a bounded queue. A worker services its connection's subscribe,
//!   unsubscribe and disconnect requests until the connection ends.
//! - jobs: a pool of job workers executes the `.job` files of the jobs directory. Each job
//!   writes its results into a `.out` file, and every `BACKUP` command writes a snapshot of the
//!   store into a numbered `.bck` file. The number of backups in flight is bounded.
//!
//! Sending `SIGUSR1` to the server clears every subscription and closes every connection still
//! waiting in the queue.
//!
//! ## Custom Protocol
//! See the [`protocol`] module for the layout of the registration, request, response and
//! notification frames.
//!
//! [`String`]: https://doc.rust-lang.org/std/string/struct.String.html
//! [`KvsServer`]: ./struct.KvsServer.html
//! [`KvsEngine`]: ./trait.KvsEngine.html
//! [`KvStore`]: ./struct.KvStore.html
//! [`protocol`]: ./protocol/index.html
//! [`kvs-server`]: ./kvs-server.rs
//! [`kvs-client`]: ./kvs-client.rs

pub use client::{KvsClient, Notifications};
pub use connection::ClientConnection;
pub use engine::{bucket_index, KvStore, KvsEngine, TABLE_SIZE};
pub use error::{KvsError, Result};
pub use job::{BackupPermit, Backups, JobDirectory, JobTask};
pub use queue::BoundedQueue;
pub use server::{
    KvsServer, Listener, ServerConfig, ShutdownHandle, DEFAULT_CONNECTION_WORKERS,
    DEFAULT_QUEUE_CAPACITY,
};
pub use teardown::TeardownController;

pub mod channel;
mod client;
mod connection;
mod engine;
mod error;
pub mod job;
pub mod protocol;
mod queue;
mod server;
pub mod teardown;
pub mod thread_pool;
