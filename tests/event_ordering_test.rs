//! Event bus ordering, propagation control, self-suppression, and re-entrant
//! cycle detection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use runner_rs::error::FrameworkError;
use runner_rs::event::{EventManager, EventRecord, Listener};
use runner_rs::id::{id, Id};

struct RecordingListener {
    id: Id,
    order: i64,
    log: Arc<Mutex<Vec<String>>>,
    stop: bool,
    owner_source: Option<Id>,
}

#[async_trait]
impl Listener<Value> for RecordingListener {
    fn id(&self) -> &Id {
        &self.id
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn owner_source(&self) -> Option<&Id> {
        self.owner_source.as_ref()
    }

    async fn handle(&self, event: &Arc<EventRecord<Value>>) -> Result<(), FrameworkError> {
        self.log.lock().unwrap().push(self.id.to_string());
        if self.stop {
            event.stop_propagation();
        }
        Ok(())
    }
}

fn listener(name: &str, order: i64, log: &Arc<Mutex<Vec<String>>>) -> Arc<RecordingListener> {
    Arc::new(RecordingListener {
        id: id(name),
        order,
        log: log.clone(),
        stop: false,
        owner_source: None,
    })
}

#[tokio::test]
async fn listeners_dispatch_in_order_then_registration_order_ties() {
    let manager: EventManager<Value> = EventManager::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    manager.add_listener(Some("thing.happened"), listener("second", 5, &log)).unwrap();
    manager.add_listener(Some("thing.happened"), listener("first", 1, &log)).unwrap();
    manager.add_listener(Some("thing.happened"), listener("also-first", 1, &log)).unwrap();

    manager
        .emit(&id("thing.happened"), Value::Null, id("test"), false, 0)
        .await
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["first", "also-first", "second"]);
}

#[tokio::test]
async fn stop_propagation_halts_remaining_listeners() {
    let manager: EventManager<Value> = EventManager::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    manager
        .add_listener(
            Some("thing.happened"),
            Arc::new(RecordingListener {
                id: id("stopper"),
                order: 0,
                log: log.clone(),
                stop: true,
                owner_source: None,
            }),
        )
        .unwrap();
    manager.add_listener(Some("thing.happened"), listener("never-runs", 1, &log)).unwrap();

    manager
        .emit(&id("thing.happened"), Value::Null, id("test"), false, 0)
        .await
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["stopper"]);
}

#[tokio::test]
async fn a_listener_never_hears_its_own_emission() {
    let manager: EventManager<Value> = EventManager::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    manager
        .add_listener(
            None,
            Arc::new(RecordingListener {
                id: id("self-watcher"),
                order: 0,
                log: log.clone(),
                stop: false,
                owner_source: Some(id("app.thing")),
            }),
        )
        .unwrap();

    manager
        .emit(&id("thing.happened"), Value::Null, id("app.thing"), false, 0)
        .await
        .unwrap();
    assert!(log.lock().unwrap().is_empty(), "listener owned by the emitting source suppresses itself");

    manager
        .emit(&id("thing.happened"), Value::Null, id("app.other"), false, 0)
        .await
        .unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["self-watcher"]);
}

#[tokio::test]
async fn excluded_from_global_hooks_skips_wildcard_listeners() {
    let manager: EventManager<Value> = EventManager::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    manager.add_listener(None, listener("wildcard", 0, &log)).unwrap();

    manager
        .emit(&id("thing.happened"), Value::Null, id("test"), true, 0)
        .await
        .unwrap();
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn re_entrant_emission_of_the_same_event_is_a_cycle_error() {
    let manager: Arc<EventManager<Value>> = Arc::new(EventManager::new());
    let inner = manager.clone();

    struct ReEmitter {
        id: Id,
        manager: Arc<EventManager<Value>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Listener<Value> for ReEmitter {
        fn id(&self) -> &Id {
            &self.id
        }
        async fn handle(&self, _event: &Arc<EventRecord<Value>>) -> Result<(), FrameworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.manager.emit(&id("thing.happened"), Value::Null, id("test"), false, 0).await
        }
    }

    manager
        .add_listener(
            Some("thing.happened"),
            Arc::new(ReEmitter {
                id: id("re-emitter"),
                manager: inner,
                calls: AtomicUsize::new(0),
            }),
        )
        .unwrap();

    let err = manager
        .emit(&id("thing.happened"), Value::Null, id("test"), false, 0)
        .await
        .unwrap_err();
    assert!(err.is("eventCycleError"));
}
