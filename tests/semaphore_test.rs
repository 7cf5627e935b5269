//! FIFO acquisition order, timeout handling, and graceful disposal of the
//! counting semaphore.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use runner_rs::semaphore::{AcquireOptions, Semaphore};

#[tokio::test]
async fn acquire_is_immediate_while_permits_remain() {
    let sem = Semaphore::new("test.sem", 2);
    let a = sem.acquire(AcquireOptions::default()).await.unwrap();
    let b = sem.acquire(AcquireOptions::default()).await.unwrap();
    assert_eq!(sem.metrics().available_permits, 0);
    drop(a);
    drop(b);
    assert_eq!(sem.metrics().available_permits, 2);
}

#[tokio::test]
async fn waiters_are_woken_in_strict_fifo_order() {
    let sem = Arc::new(Semaphore::new("test.sem", 1));
    let held = sem.acquire(AcquireOptions::default()).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for n in 0..3 {
        let sem = sem.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            let permit = sem.acquire(AcquireOptions::default()).await.unwrap();
            order.lock().unwrap().push(n);
            drop(permit);
        }));
        // Give each waiter time to enqueue before the next one tries.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    drop(held);
    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn acquire_times_out_when_no_permit_is_released_in_time() {
    let sem = Semaphore::new("test.sem", 1);
    let _held = sem.acquire(AcquireOptions::default()).await.unwrap();

    let err = sem
        .acquire(AcquireOptions {
            timeout: Some(Duration::from_millis(20)),
            cancellation: None,
        })
        .await
        .unwrap_err();
    assert!(err.is("timeoutError"));
}

#[tokio::test]
async fn dispose_rejects_every_queued_waiter() {
    let sem = Arc::new(Semaphore::new("test.sem", 1));
    let held = sem.acquire(AcquireOptions::default()).await.unwrap();

    let waiter_sem = sem.clone();
    let waiter = tokio::spawn(async move { waiter_sem.acquire(AcquireOptions::default()).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    sem.dispose();
    let err = waiter.await.unwrap().unwrap_err();
    assert!(err.is("disposedError"));

    drop(held);
    let err = sem.acquire(AcquireOptions::default()).await.unwrap_err();
    assert!(err.is("disposedError"), "acquiring after dispose rejects immediately");
}
