//! Test doubles for applications built on this runtime (SPEC_FULL §7,
//! mirroring the teacher's `framework::mock` expectation-queue harness).
//!
//! A resource's dependents only ever see it through whatever Rust trait its
//! own `V` implements, so there is no single "mock resource" type to hand
//! out — instead [`MockCallable`] is the generic FIFO expectation queue the
//! teacher's `MockClient<T>` built for actor CRUD calls, with the CRUD
//! shape stripped out: push expected responses in the order you expect
//! calls, then `.with(...)` a real resource implementation backed by it.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::FrameworkError;

/// A FIFO queue of canned responses for one mocked operation. Application
/// tests construct one per method they want to stub on a fake resource/task
/// dependency, push expectations with [`MockCallable::expect_ok`]/
/// [`MockCallable::expect_err`], then drive their code under test; each call
/// to [`MockCallable::call`] pops the next expectation in order, exactly as
/// the teacher's background-task-driven `MockClient` dispatches requests
/// against a `VecDeque<Expectation<T>>`.
pub struct MockCallable<O> {
    queue: Arc<Mutex<VecDeque<Result<O, FrameworkError>>>>,
}

impl<O> Default for MockCallable<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> Clone for MockCallable<O> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<O> MockCallable<O> {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queues a successful response for the next call.
    pub fn expect_ok(&self, value: O) -> &Self {
        self.queue.lock().push_back(Ok(value));
        self
    }

    /// Queues a failing response for the next call.
    pub fn expect_err(&self, error: FrameworkError) -> &Self {
        self.queue.lock().push_back(Err(error));
        self
    }

    /// Pops and returns the next queued response. Panics if the queue is
    /// empty — an unexpected call is a test bug, not a runtime error.
    pub fn call(&self) -> Result<O, FrameworkError> {
        self.queue
            .lock()
            .pop_front()
            .expect("MockCallable called more times than expectations were queued")
    }

    /// Fails the test if any queued expectation was never consumed.
    pub fn verify(&self) {
        let remaining = self.queue.lock().len();
        assert_eq!(remaining, 0, "{remaining} expectation(s) on MockCallable were never consumed");
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Records every call made against a fake resource/task, for tests that
/// want to assert on *what* was called rather than canning a response
/// (complements [`MockCallable`], which only controls *what comes back*).
pub struct CallLog<C> {
    calls: Arc<Mutex<Vec<C>>>,
}

impl<C> Default for CallLog<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for CallLog<C> {
    fn clone(&self) -> Self {
        Self {
            calls: self.calls.clone(),
        }
    }
}

impl<C: Clone> CallLog<C> {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record(&self, call: C) {
        self.calls.lock().push(call);
    }

    pub fn snapshot(&self) -> Vec<C> {
        self.calls.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameworkError;
    use crate::id::id;

    #[test]
    fn call_pops_expectations_in_fifo_order() {
        let mock: MockCallable<i32> = MockCallable::new();
        mock.expect_ok(1);
        mock.expect_ok(2);
        assert_eq!(mock.call().unwrap(), 1);
        assert_eq!(mock.call().unwrap(), 2);
        mock.verify();
    }

    #[test]
    #[should_panic(expected = "never consumed")]
    fn verify_panics_on_unmet_expectations() {
        let mock: MockCallable<i32> = MockCallable::new();
        mock.expect_ok(1);
        mock.verify();
    }

    #[test]
    fn call_log_records_in_order() {
        let log: CallLog<String> = CallLog::new();
        log.record("a".to_string());
        log.record("b".to_string());
        assert_eq!(log.snapshot(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn expect_err_surfaces_the_queued_error() {
        let mock: MockCallable<()> = MockCallable::new();
        mock.expect_err(FrameworkError::Disposed(id("thing")));
        assert!(mock.call().is_err());
    }
}
