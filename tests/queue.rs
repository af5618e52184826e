use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_utils::thread as scoped;
use pipekvs::{BoundedQueue, Result};

#[test]
fn zero_capacity_is_rejected() {
    assert!(BoundedQueue::<u32>::new(0).is_err());
}

#[test]
fn items_come_out_in_order() -> Result<()> {
    let queue = BoundedQueue::new(4)?;
    assert_eq!(queue.capacity(), 4);
    assert!(queue.is_empty());
    for i in 0..4 {
        queue.push(i)?;
    }
    assert_eq!(queue.len(), 4);
    assert_eq!(queue.pop(), Some(0));
    assert_eq!(queue.pop(), Some(1));
    assert_eq!(queue.drain(), vec![2, 3]);
    assert!(queue.is_empty());
    Ok(())
}

#[test]
fn push_blocks_while_full() -> Result<()> {
    let queue = BoundedQueue::new(1)?;
    queue.push(1)?;
    let pushed = AtomicBool::new(false);

    scoped::scope(|s| {
        s.spawn(|_| {
            queue.push(2).unwrap();
            pushed.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!pushed.load(Ordering::SeqCst));
        assert_eq!(queue.pop(), Some(1));
    })
    .unwrap();

    assert!(pushed.load(Ordering::SeqCst));
    assert_eq!(queue.drain(), vec![2]);
    Ok(())
}

#[test]
fn pop_waits_for_an_item() -> Result<()> {
    let queue = BoundedQueue::new(2)?;
    let producer = queue.clone();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        producer.push("conn").unwrap();
    });
    assert_eq!(queue.pop(), Some("conn"));
    handle.join().unwrap();
    Ok(())
}

#[test]
fn every_item_is_taken_once() -> Result<()> {
    let queue = BoundedQueue::new(3)?;
    let mut taken: Vec<u32> = scoped::scope(|s| {
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|_| {
                    let mut mine = Vec::new();
                    while let Some(item) = queue.pop() {
                        if item == u32::MAX {
                            break;
                        }
                        mine.push(item);
                    }
                    mine
                })
            })
            .collect();

        for i in 0..100 {
            queue.push(i).unwrap();
        }
        for _ in 0..4 {
            queue.push(u32::MAX).unwrap();
        }
        consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect()
    })
    .unwrap();

    taken.sort_unstable();
    assert_eq!(taken, (0..100).collect::<Vec<_>>());
    Ok(())
}
