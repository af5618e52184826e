use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crossbeam_utils::thread;
use pipekvs::channel::NotificationHandle;
use pipekvs::{bucket_index, KvStore, KvsEngine, KvsError, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

// collects everything written into a notification handle
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// a notification channel whose reader has gone away
struct Broken;

impl Write for Broken {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn subscriber(label: &str) -> (NotificationHandle, Capture) {
    let capture = Capture::default();
    (NotificationHandle::new(label, capture.clone()), capture)
}

#[test]
fn get_stored_value() -> Result<()> {
    let store = KvStore::new();
    store.set("key1".to_owned(), "value1".to_owned())?;
    store.set("key2".to_owned(), "value2".to_owned())?;

    assert_eq!(store.get("key1")?, Some("value1".to_owned()));
    assert_eq!(store.get("key2")?, Some("value2".to_owned()));
    assert_eq!(store.get("key3")?, None);
    Ok(())
}

#[test]
fn overwrite_value() -> Result<()> {
    let store = KvStore::new();
    store.set("key1".to_owned(), "value1".to_owned())?;
    store.set("key1".to_owned(), "value2".to_owned())?;
    assert_eq!(store.get("key1")?, Some("value2".to_owned()));
    Ok(())
}

#[test]
fn clones_share_the_table() -> Result<()> {
    let store = KvStore::new();
    let other = store.clone();
    store.set("shared".to_owned(), "1".to_owned())?;
    assert_eq!(other.get("shared")?, Some("1".to_owned()));
    Ok(())
}

#[test]
fn remove_key() -> Result<()> {
    let store = KvStore::new();
    store.set("key1".to_owned(), "value1".to_owned())?;
    store.remove("key1")?;
    assert_eq!(store.get("key1")?, None);
    Ok(())
}

#[test]
fn remove_non_existent_key() {
    let store = KvStore::new();
    assert!(matches!(store.remove("key1"), Err(KvsError::KeyNotFound)));
    assert!(matches!(store.remove("#nope"), Err(KvsError::KeyNotFound)));
}

#[test]
fn keys_must_map_onto_a_bucket() {
    assert_eq!(bucket_index("apple"), Some(0));
    assert_eq!(bucket_index("Apple"), Some(0));
    assert_eq!(bucket_index("zebra"), Some(25));
    assert_eq!(bucket_index("7up"), Some(7));
    assert_eq!(bucket_index("_key"), None);
    assert_eq!(bucket_index(""), None);

    let store = KvStore::new();
    assert!(matches!(
        store.set("_key".to_owned(), "v".to_owned()),
        Err(KvsError::InvalidKey(_))
    ));
}

#[test]
fn dump_lists_pairs_in_bucket_order() -> Result<()> {
    let store = KvStore::new();
    for key in &["bb", "ba", "a", "c"] {
        store.set(key.to_string(), format!("v{}", key))?;
    }
    let mut out = Vec::new();
    store.dump(&mut out)?;
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "(a, va)\n(ba, vba)\n(bb, vbb)\n(c, vc)\n"
    );
    Ok(())
}

#[test]
fn subscribers_see_writes_in_order() -> Result<()> {
    let store = KvStore::new();
    store.set("x".to_owned(), "0".to_owned())?;
    let (handle, capture) = subscriber("one");
    store.subscribe("x", &handle)?;

    store.set("x".to_owned(), "1".to_owned())?;
    store.set("x".to_owned(), "2".to_owned())?;
    store.set("y".to_owned(), "ignored".to_owned())?;

    assert_eq!(capture.contents(), "(x,1)(x,2)");
    Ok(())
}

#[test]
fn delete_notifies_and_drops_subscriptions() -> Result<()> {
    let store = KvStore::new();
    store.set("x".to_owned(), "1".to_owned())?;
    let (handle, capture) = subscriber("one");
    store.subscribe("x", &handle)?;

    store.remove("x")?;
    assert_eq!(capture.contents(), "(x,DELETED)");

    // a new key with the same name starts without subscribers
    store.set("x".to_owned(), "2".to_owned())?;
    store.set("x".to_owned(), "3".to_owned())?;
    assert_eq!(capture.contents(), "(x,DELETED)");
    Ok(())
}

#[test]
fn subscribe_is_idempotent() -> Result<()> {
    let store = KvStore::new();
    store.set("x".to_owned(), "1".to_owned())?;
    let (handle, capture) = subscriber("one");
    store.subscribe("x", &handle)?;
    store.subscribe("x", &handle.clone())?;

    store.set("x".to_owned(), "2".to_owned())?;
    assert_eq!(capture.contents(), "(x,2)");

    store.unsubscribe("x", &handle)?;
    assert!(matches!(
        store.unsubscribe("x", &handle),
        Err(KvsError::SubscriptionNotFound)
    ));
    Ok(())
}

#[test]
fn subscribe_to_missing_key_fails() {
    let store = KvStore::new();
    let (handle, _) = subscriber("one");
    assert!(matches!(
        store.subscribe("missing", &handle),
        Err(KvsError::KeyNotFound)
    ));
    assert!(matches!(
        store.unsubscribe("missing", &handle),
        Err(KvsError::KeyNotFound)
    ));
}

#[test]
fn unsubscribe_leaves_other_keys() -> Result<()> {
    let store = KvStore::new();
    store.set("k1".to_owned(), "a".to_owned())?;
    store.set("k2".to_owned(), "b".to_owned())?;
    let (handle, capture) = subscriber("one");
    store.subscribe("k1", &handle)?;
    store.subscribe("k2", &handle)?;

    store.unsubscribe("k1", &handle)?;
    store.set("k1".to_owned(), "c".to_owned())?;
    store.set("k2".to_owned(), "d".to_owned())?;
    assert_eq!(capture.contents(), "(k2,d)");
    Ok(())
}

#[test]
fn handles_are_compared_by_identity() -> Result<()> {
    let store = KvStore::new();
    store.set("x".to_owned(), "1".to_owned())?;
    let (first, first_capture) = subscriber("same");
    let (second, second_capture) = subscriber("same");
    store.subscribe("x", &first)?;
    store.subscribe("x", &second)?;
    assert_ne!(first, second);

    store.unsubscribe("x", &first)?;
    store.set("x".to_owned(), "2".to_owned())?;
    assert_eq!(first_capture.contents(), "");
    assert_eq!(second_capture.contents(), "(x,2)");
    Ok(())
}

#[test]
fn disconnect_all_removes_every_subscription() -> Result<()> {
    let store = KvStore::new();
    for key in &["a", "b", "c"] {
        store.set(key.to_string(), "0".to_owned())?;
    }
    let (leaving, leaving_capture) = subscriber("leaving");
    let (staying, staying_capture) = subscriber("staying");
    store.subscribe("a", &leaving)?;
    store.subscribe("b", &leaving)?;
    store.subscribe("b", &staying)?;

    assert_eq!(store.disconnect_all(&leaving)?, 2);
    assert_eq!(store.disconnect_all(&leaving)?, 0);

    store.set("a".to_owned(), "1".to_owned())?;
    store.set("b".to_owned(), "1".to_owned())?;
    assert_eq!(leaving_capture.contents(), "");
    assert_eq!(staying_capture.contents(), "(b,1)");
    Ok(())
}

#[test]
fn clear_subscriptions_keeps_values() -> Result<()> {
    let store = KvStore::new();
    store.set("a".to_owned(), "0".to_owned())?;
    let (handle, capture) = subscriber("one");
    store.subscribe("a", &handle)?;

    store.clear_subscriptions()?;
    store.set("a".to_owned(), "1".to_owned())?;
    assert_eq!(capture.contents(), "");
    assert_eq!(store.get("a")?, Some("1".to_owned()));
    Ok(())
}

#[test]
fn failed_delivery_does_not_stop_fan_out() -> Result<()> {
    let store = KvStore::new();
    store.set("x".to_owned(), "0".to_owned())?;
    let broken = NotificationHandle::new("broken", Broken);
    let (handle, capture) = subscriber("working");
    store.subscribe("x", &broken)?;
    store.subscribe("x", &handle)?;

    store.set("x".to_owned(), "1".to_owned())?;
    assert_eq!(capture.contents(), "(x,1)");
    assert_eq!(store.get("x")?, Some("1".to_owned()));
    Ok(())
}

// concurrent writers on overlapping keys, every notification is a complete message and the
// last one observed for each key matches the stored value
#[test]
fn concurrent_writes_and_notifications() -> Result<()> {
    let store = KvStore::new();
    let keys: Vec<String> = (0..8).map(|i| format!("key{}", i)).collect();
    for key in &keys {
        store.set(key.clone(), "init".to_owned())?;
    }
    let (handle, capture) = subscriber("watcher");
    for key in &keys {
        store.subscribe(key, &handle)?;
    }

    thread::scope(|s| {
        for t in 0..4u64 {
            let store = store.clone();
            let keys = &keys;
            s.spawn(move |_| {
                let mut rng = SmallRng::seed_from_u64(t);
                for i in 0..200 {
                    let key = &keys[rng.gen_range(0..keys.len())];
                    store.set(key.clone(), format!("t{}-{}", t, i)).unwrap();
                    if i % 10 == 0 {
                        store.get(key).unwrap();
                    }
                }
            });
        }
    })
    .unwrap();

    let contents = capture.contents();
    let messages: Vec<&str> = contents
        .split_terminator(')')
        .map(|m| m.trim_start_matches('('))
        .collect();
    assert_eq!(messages.len(), 800);
    for key in &keys {
        let last = messages
            .iter()
            .filter_map(|m| m.split_once(','))
            .filter(|(k, _)| *k == key.as_str())
            .last();
        if let Some((_, value)) = last {
            assert_eq!(store.get(key)?, Some(value.to_string()));
        }
    }
    Ok(())
}
