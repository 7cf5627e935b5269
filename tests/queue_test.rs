//! Single-lane FIFO execution order and nested self-enqueue deadlock
//! detection for `Queue`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use runner_rs::queue::Queue;

#[tokio::test]
async fn tasks_run_strictly_in_submission_order() {
    let queue = Arc::new(Queue::new("test.queue"));
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for n in 0..5u32 {
        let queue = queue.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            queue
                .run(move |_token| async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    order.lock().unwrap().push(n);
                    Ok::<_, runner_rs::error::FrameworkError>(n)
                })
                .await
        }));
    }

    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn self_enqueue_from_within_a_running_task_is_a_synchronous_deadlock() {
    let queue = Arc::new(Queue::new("test.queue"));
    let inner = queue.clone();

    let result = queue
        .run(move |_token| {
            let inner = inner.clone();
            async move { inner.run(|_token| async { Ok::<_, runner_rs::error::FrameworkError>(()) }).await }
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.is("deadlockError"));
}

#[tokio::test]
async fn dispose_rejects_further_submissions() {
    let queue = Queue::new("test.queue");
    queue.dispose(false).await;
    let err = queue
        .run(|_token| async { Ok::<_, runner_rs::error::FrameworkError>(()) })
        .await
        .unwrap_err();
    assert!(err.is("disposedError"));
}

#[tokio::test]
async fn a_failing_task_does_not_stop_the_lane() {
    let queue = Arc::new(Queue::new("test.queue"));
    let failure = queue
        .run(|_token| async { Err::<(), _>(runner_rs::error::FrameworkError::Disposed(runner_rs::id::id("boom"))) })
        .await;
    assert!(failure.is_err());

    let counter = Arc::new(AtomicU32::new(0));
    let counter_for_task = counter.clone();
    queue
        .run(move |_token| {
            let counter = counter_for_task.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, runner_rs::error::FrameworkError>(())
            }
        })
        .await
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
