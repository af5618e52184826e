//! This module provides the key/value storage engine used by the server.
//! The only engine implemented is [`KvStore`], an in-memory table that fans changes out to
//! the notification channels subscribed to a key.
use std::io::Write;

use crate::channel::NotificationHandle;
use crate::Result;

/// A trait for the functionality of a key/value storage engine with key subscriptions.
///
/// Engines are shared between the connection workers and the job workers, so every clone of an
/// engine must refer to the same underlying store.
pub trait KvsEngine: Clone + Send + Sync + 'static {
    /// sets a `key` and `value`
    ///
    /// If the given `key` already exists the previous `value` will be overwritten and every
    /// subscriber of the key is notified.
    ///
    /// # Errors
    ///
    /// Returns `KvsError::InvalidKey` if the key can not be stored.
    fn set(&self, key: String, value: String) -> Result<()>;

    /// Gets the value associated with the given `key`
    ///
    /// Returns `None` if the given `key` does not exist.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Removes the given `key` (and associated value) from the store, notifying its
    /// subscribers that the key was deleted.
    ///
    /// # Errors
    ///
    /// Returns `KvsError::KeyNotFound` if the given `key` is not found.
    fn remove(&self, key: &str) -> Result<()>;

    /// writes a listing of every key/value pair into `sink`, one `(key, value)` per line
    fn dump<W: Write>(&self, sink: &mut W) -> Result<()>;

    /// subscribes `handle` to changes of `key`. Subscribing twice is the same as subscribing
    /// once.
    ///
    /// # Errors
    ///
    /// Returns `KvsError::KeyNotFound` if the given `key` is not found.
    fn subscribe(&self, key: &str, handle: &NotificationHandle) -> Result<()>;

    /// removes the subscription of `handle` to `key`
    ///
    /// # Errors
    ///
    /// Returns `KvsError::KeyNotFound` if the key does not exist and
    /// `KvsError::SubscriptionNotFound` if `handle` was not subscribed to it.
    fn unsubscribe(&self, key: &str, handle: &NotificationHandle) -> Result<()>;

    /// removes `handle` from every subscriber set in the store, returning how many
    /// subscriptions were dropped
    fn disconnect_all(&self, handle: &NotificationHandle) -> Result<usize>;

    /// empties every subscriber set in the store
    fn clear_subscriptions(&self) -> Result<()>;
}

mod kvs;

pub use self::kvs::{bucket_index, KvStore, TABLE_SIZE};
