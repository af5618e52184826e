use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, RwLock};

use super::KvsEngine;
use crate::channel::NotificationHandle;
use crate::error::{KvsError, Result};
use crate::protocol::notification;
use tracing::{debug, warn};

/// number of buckets in the table, one per lowercase letter
pub const TABLE_SIZE: usize = 26;

/// The primary struct for working with a [`KvStore`].
///
/// Keys are spread over [`TABLE_SIZE`] buckets by their first character. The whole table sits
/// behind a single reader/writer lock: reads and listings take it shared, every mutation
/// (including changes to subscriber sets) takes it exclusively. Subscribers are notified while
/// the exclusive lock is still held, so a subscriber sees the changes of a key in the order
/// they were applied.
///
/// Cloning a `KvStore` is cheap, all clones share the same table.
#[derive(Clone, Debug, Default)]
pub struct KvStore {
    table: Arc<RwLock<Table>>,
}

#[derive(Debug)]
struct Table {
    buckets: Vec<BTreeMap<String, Entry>>,
}

impl Default for Table {
    fn default() -> Self {
        Table {
            buckets: (0..TABLE_SIZE).map(|_| BTreeMap::new()).collect(),
        }
    }
}

impl Table {
    fn entry(&self, key: &str) -> Option<&Entry> {
        self.buckets[bucket_index(key)?].get(key)
    }

    fn entry_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.buckets[bucket_index(key)?].get_mut(key)
    }

    fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.buckets.iter_mut().flat_map(|bucket| bucket.values_mut())
    }
}

// a stored value along with the channels subscribed to its key
#[derive(Debug)]
struct Entry {
    value: String,
    subscribers: Vec<NotificationHandle>,
}

/// maps a key onto its bucket using the key's first character.
/// Letters (of either case) map onto 0-25, digits onto 0-9. Any other key can not be stored
/// and yields `None`.
pub fn bucket_index(key: &str) -> Option<usize> {
    let first = key.bytes().next()?.to_ascii_lowercase();
    match first {
        b'a'..=b'z' => Some((first - b'a') as usize),
        b'0'..=b'9' => Some((first - b'0') as usize),
        _ => None,
    }
}

impl KvStore {
    /// creates a new, empty `KvStore`
    pub fn new() -> Self {
        KvStore::default()
    }
}

impl KvsEngine for KvStore {
    fn set(&self, key: String, value: String) -> Result<()> {
        let index = bucket_index(&key).ok_or_else(|| KvsError::InvalidKey(key.clone()))?;
        let mut table = self.table.write()?;
        let bucket = &mut table.buckets[index];

        if let Some(entry) = bucket.get_mut(&key) {
            entry.value = value;
            fan_out(&entry.subscribers, &notification(&key, Some(&entry.value)));
        } else {
            debug!(%key, "new key");
            bucket.insert(
                key,
                Entry {
                    value,
                    subscribers: Vec::new(),
                },
            );
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let table = self.table.read()?;
        Ok(table.entry(key).map(|entry| entry.value.clone()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let index = bucket_index(key).ok_or(KvsError::KeyNotFound)?;
        let mut table = self.table.write()?;
        // removing the entry drops its subscriber set along with it
        let entry = table.buckets[index]
            .remove(key)
            .ok_or(KvsError::KeyNotFound)?;
        fan_out(&entry.subscribers, &notification(key, None));
        Ok(())
    }

    fn dump<W: Write>(&self, sink: &mut W) -> Result<()> {
        let table = self.table.read()?;
        for (key, entry) in table.buckets.iter().flat_map(|bucket| bucket.iter()) {
            writeln!(sink, "({}, {})", key, entry.value)?;
        }
        sink.flush()?;
        Ok(())
    }

    fn subscribe(&self, key: &str, handle: &NotificationHandle) -> Result<()> {
        let mut table = self.table.write()?;
        let entry = table.entry_mut(key).ok_or(KvsError::KeyNotFound)?;
        if !entry.subscribers.contains(handle) {
            entry.subscribers.push(handle.clone());
            debug!(%key, channel = handle.label(), "subscribed");
        }
        Ok(())
    }

    fn unsubscribe(&self, key: &str, handle: &NotificationHandle) -> Result<()> {
        let mut table = self.table.write()?;
        let entry = table.entry_mut(key).ok_or(KvsError::KeyNotFound)?;
        let pos = entry
            .subscribers
            .iter()
            .position(|subscriber| subscriber == handle)
            .ok_or(KvsError::SubscriptionNotFound)?;
        entry.subscribers.remove(pos);
        debug!(%key, channel = handle.label(), "unsubscribed");
        Ok(())
    }

    fn disconnect_all(&self, handle: &NotificationHandle) -> Result<usize> {
        let mut table = self.table.write()?;
        let mut removed = 0;
        for entry in table.entries_mut() {
            let before = entry.subscribers.len();
            entry.subscribers.retain(|subscriber| subscriber != handle);
            removed += before - entry.subscribers.len();
        }
        debug!(channel = handle.label(), removed, "dropped all subscriptions of channel");
        Ok(removed)
    }

    fn clear_subscriptions(&self) -> Result<()> {
        let mut table = self.table.write()?;
        for entry in table.entries_mut() {
            entry.subscribers.clear();
        }
        Ok(())
    }
}

/// delivers `message` to every subscriber. A failed delivery is logged and does not stop the
/// delivery to the remaining subscribers.
fn fan_out(subscribers: &[NotificationHandle], message: &str) {
    for subscriber in subscribers {
        if let Err(e) = subscriber.send(message) {
            warn!(channel = subscriber.label(), "failed to deliver {}: {}", message, e);
        }
    }
}
