//! Async Resource Tests
//!
//! Resources spawn their requests with `spawn_local`, so every test runs
//! inside a `LocalSet`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::sync::oneshot;
use tokio::task::LocalSet;

use ripple_core::{Resource, ResourceState, Runtime};

type Reply = oneshot::Sender<Result<i32, String>>;

/// Yield to the local task set until `ready` holds.
async fn wait_for(ready: impl Fn() -> bool) {
    for _ in 0..100 {
        if ready() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition was not reached");
}

/// A resource whose requests are answered by hand, in any order.
fn manual_resource(
    runtime: &Runtime,
    source: &ripple_core::Signal<i32>,
) -> (Resource<i32, String>, Rc<RefCell<Vec<(i32, Reply)>>>) {
    let requests: Rc<RefCell<Vec<(i32, Reply)>>> = Rc::new(RefCell::new(Vec::new()));
    let resource = {
        let requests = requests.clone();
        runtime.resource(source.clone(), move |n: i32| {
            let (tx, rx) = oneshot::channel();
            requests.borrow_mut().push((n, tx));
            async move { rx.await.unwrap_or_else(|_| Err("request dropped".to_string())) }
        })
    };
    (resource, requests)
}

fn reply(requests: &RefCell<Vec<(i32, Reply)>>, input: i32, result: Result<i32, String>) {
    let index = requests
        .borrow()
        .iter()
        .position(|(n, _)| *n == input)
        .expect("no request for input");
    let (_, tx) = requests.borrow_mut().remove(index);
    tx.send(result).expect("request was abandoned");
}

/// Test that a resource starts pending and becomes ready.
#[tokio::test]
async fn pending_then_ready() {
    LocalSet::new()
        .run_until(async {
            let runtime = Runtime::new();
            let source = runtime.signal(2);
            let resource = runtime.resource(source.clone(), |n: i32| async move {
                tokio::task::yield_now().await;
                Ok::<_, String>(n * 10)
            });

            assert_eq!(resource.state(), ResourceState::Pending);
            assert!(resource.loading());

            wait_for(|| !resource.loading()).await;
            assert_eq!(resource.get(), Some(20));
        })
        .await;
}

/// Test that a producer failure becomes the failed state.
#[tokio::test]
async fn failure_is_a_state() {
    LocalSet::new()
        .run_until(async {
            let runtime = Runtime::new();
            let source = runtime.signal(1);
            let (resource, requests) = manual_resource(&runtime, &source);

            reply(&requests, 1, Err("not found".to_string()));
            wait_for(|| !resource.loading()).await;

            assert!(resource.state().is_failed());
            assert_eq!(resource.error().as_deref().map(String::as_str), Some("not found"));
            assert_eq!(resource.get(), None);
        })
        .await;
}

/// Test that a source change issues a new request.
#[tokio::test]
async fn source_change_refetches() {
    LocalSet::new()
        .run_until(async {
            let runtime = Runtime::new();
            let source = runtime.signal(1);
            let (resource, requests) = manual_resource(&runtime, &source);

            reply(&requests, 1, Ok(100));
            wait_for(|| resource.get() == Some(100)).await;

            source.set(2).unwrap();
            assert!(resource.loading());
            // The old value stays visible while the next request is in flight
            assert_eq!(resource.get(), Some(100));

            reply(&requests, 2, Ok(200));
            wait_for(|| !resource.loading()).await;
            assert_eq!(resource.get(), Some(200));
        })
        .await;
}

/// Test that `refetch` re-runs the producer with the current input.
#[tokio::test]
async fn refetch_uses_the_current_input() {
    LocalSet::new()
        .run_until(async {
            let runtime = Runtime::new();
            let source = runtime.signal(7);
            let (resource, requests) = manual_resource(&runtime, &source);

            reply(&requests, 7, Ok(1));
            wait_for(|| !resource.loading()).await;

            resource.refetch().unwrap();
            assert!(resource.loading());
            assert_eq!(requests.borrow().len(), 1);
            assert_eq!(requests.borrow()[0].0, 7);

            reply(&requests, 7, Ok(2));
            wait_for(|| !resource.loading()).await;
            assert_eq!(resource.get(), Some(2));
        })
        .await;
}

/// Test that out-of-order settlement commits both results, and only the
/// latest request clears the loading flag.
#[tokio::test]
async fn last_settled_request_wins() {
    LocalSet::new()
        .run_until(async {
            let runtime = Runtime::new();
            let source = runtime.signal(1);
            let (resource, requests) = manual_resource(&runtime, &source);

            source.set(2).unwrap();
            assert_eq!(requests.borrow().len(), 2);

            reply(&requests, 1, Ok(10));
            wait_for(|| resource.get() == Some(10)).await;
            assert!(resource.loading());

            reply(&requests, 2, Ok(20));
            wait_for(|| !resource.loading()).await;
            assert_eq!(resource.get(), Some(20));

            // A stale answer arriving last still lands
            source.set(3).unwrap();
            source.set(4).unwrap();
            reply(&requests, 4, Ok(40));
            wait_for(|| !resource.loading()).await;
            reply(&requests, 3, Ok(30));
            wait_for(|| resource.get() == Some(30)).await;
            assert!(!resource.loading());
        })
        .await;
}

/// Test that writes batched together issue a single request, and the
/// settlement runs readers in a batch of its own.
#[tokio::test]
async fn settlement_runs_in_a_fresh_batch() {
    LocalSet::new()
        .run_until(async {
            let runtime = Runtime::new();
            let source = runtime.signal(0);
            let (resource, requests) = manual_resource(&runtime, &source);

            let observed = Rc::new(Cell::new(0));
            let _reader = {
                let resource = resource.clone();
                let observed = observed.clone();
                runtime.effect(move || {
                    resource.with_state(|_| ());
                    resource.loading();
                    observed.set(observed.get() + 1);
                })
            };

            runtime
                .batch(|| {
                    source.set(1).unwrap();
                    source.set(2).unwrap();
                })
                .unwrap();
            let inputs: Vec<i32> = requests.borrow().iter().map(|(n, _)| *n).collect();
            assert_eq!(inputs, vec![0, 2]);

            reply(&requests, 0, Ok(0));
            wait_for(|| resource.get() == Some(0)).await;
            assert!(resource.loading());

            reply(&requests, 2, Ok(2));
            wait_for(|| !resource.loading()).await;

            assert!(!runtime.is_batching());
            // Creation, then one run per settlement: the first lands a value
            // while still loading, the second clears the flag with its value
            assert_eq!(observed.get(), 3);
            assert_eq!(resource.get(), Some(2));
        })
        .await;
}

/// Test that a settlement after the resource is dropped is harmless.
#[tokio::test]
async fn dropped_resource_ignores_late_results() {
    LocalSet::new()
        .run_until(async {
            let runtime = Runtime::new();
            let source = runtime.signal(5);
            let (resource, requests) = manual_resource(&runtime, &source);

            drop(resource);
            assert_eq!(source.subscriber_count(), 0);

            reply(&requests, 5, Ok(50));
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;

            source.set(6).unwrap();
            assert!(requests.borrow().is_empty());
        })
        .await;
}
