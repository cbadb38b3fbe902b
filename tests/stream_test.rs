//! Result stream tests through statement resources.
//!
//! Tasks run on the tokio blocking pool; the scripted fake store records
//! what the worker did so the consumer side can be checked against it.

mod common;

use common::{wait_for, Event, FakeStore, Script};
use crudstream::exec::{Dispatcher, TokioDispatcher};
use crudstream::resource::{QueryResourceProvider, UpdateResourceProvider};
use crudstream::{ReadableResource, StatementTemplate, Termination, UpdatableResource};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

fn dispatcher() -> Arc<dyn Dispatcher> {
    Arc::new(TokioDispatcher::current())
}

fn numbers() -> StatementTemplate {
    StatementTemplate::plain("SELECT n FROM numbers").unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_equal_templates_make_equal_independent_resources() {
    let store = FakeStore::new(Script::numbered(2));
    let provider = QueryResourceProvider::new(store.clone(), dispatcher(), 4);

    let first = provider.get(StatementTemplate::positional("SELECT n FROM numbers WHERE n > ?", [0_i64]).unwrap());
    let second = provider.get(StatementTemplate::positional("SELECT n FROM numbers WHERE n > ?", [0_i64]).unwrap());
    assert_eq!(first, second);

    let store = FakeStore::new(Script {
        parameter_count: 1,
        ..Script::numbered(2)
    });
    let provider = QueryResourceProvider::new(store.clone(), dispatcher(), 4);
    let resource = provider.get(StatementTemplate::positional("SELECT n FROM numbers WHERE n > ?", [0_i64]).unwrap());

    let a = resource.get().collect_all().await.unwrap();
    let b = resource.get().collect_all().await.unwrap();

    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 2);
    assert_eq!(store.acquisitions(), 2);
    let log = store.log();
    let prepared = log
        .events()
        .iter()
        .filter(|e| matches!(e, Event::Prepared(_)))
        .count();
    assert_eq!(prepared, 2);
    assert!(log.fully_released());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resources_on_different_providers_differ() {
    let a = QueryResourceProvider::new(FakeStore::new(Script::default()), dispatcher(), 4);
    let b = QueryResourceProvider::new(FakeStore::new(Script::default()), dispatcher(), 4);

    assert_ne!(a.get(numbers()), b.get(numbers()));
    assert_eq!(a.get(numbers()), a.get(numbers()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_is_lazy_until_dispatched() {
    let store = FakeStore::new(Script::numbered(1));
    let provider = QueryResourceProvider::new(store.clone(), dispatcher(), 4);

    let resource = provider.get(numbers());
    assert_eq!(store.acquisitions(), 0);

    let rows = resource.get().collect_all().await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_completes_after_worker_released_everything() {
    let store = FakeStore::new(Script::numbered(5));
    let provider = QueryResourceProvider::new(store.clone(), dispatcher(), 2);

    let mut stream = provider.get(numbers()).get();
    let mut seen = Vec::new();
    while let Some(row) = stream.next().await {
        seen.push(row.unwrap().get_as::<i64>("n").unwrap());
    }

    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    assert_eq!(stream.termination(), Some(Termination::Completed));
    // Completion is only sent once the connection is back.
    assert!(store.log().fully_released());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_before_first_row_yields_nothing() {
    let store = FakeStore::new(Script {
        advance_delay: Some(Duration::from_millis(20)),
        ..Script::numbered(50)
    });
    let provider = QueryResourceProvider::new(store.clone(), dispatcher(), 1);

    let mut stream = provider.get(numbers()).get();
    stream.cancel();

    assert!(stream.next().await.is_none());
    assert_eq!(stream.termination(), Some(Termination::Cancelled));
    let log = store.log();
    assert!(wait_for(Duration::from_secs(5), || log.fully_released()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_after_n_rows_yields_exactly_n() {
    let store = FakeStore::new(Script {
        advance_delay: Some(Duration::from_millis(5)),
        ..Script::numbered(100)
    });
    let provider = QueryResourceProvider::new(store.clone(), dispatcher(), 1);

    let mut stream = provider.get(numbers()).get();
    let mut received = 0;
    while let Some(row) = stream.next().await {
        row.unwrap();
        received += 1;
        if received == 3 {
            stream.cancel();
        }
    }

    assert_eq!(received, 3);
    assert_eq!(stream.termination(), Some(Termination::Cancelled));
    let log = store.log();
    assert!(wait_for(Duration::from_secs(5), || log.fully_released()).await);
    assert_eq!(log.count(&Event::Advanced(100)), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_handle_stops_stream_from_another_task() {
    let store = FakeStore::new(Script {
        advance_delay: Some(Duration::from_millis(10)),
        ..Script::numbered(1000)
    });
    let provider = QueryResourceProvider::new(store.clone(), dispatcher(), 1);

    let mut stream = provider.get(numbers()).get();
    let handle = stream.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let mut received = 0;
    while let Some(row) = stream.next().await {
        row.unwrap();
        received += 1;
    }

    assert!(received < 1000);
    assert_eq!(stream.termination(), Some(Termination::Cancelled));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_stream_releases_worker_resources() {
    let store = FakeStore::new(Script {
        advance_delay: Some(Duration::from_millis(5)),
        ..Script::numbered(1000)
    });
    let provider = QueryResourceProvider::new(store.clone(), dispatcher(), 1);

    let mut stream = provider.get(numbers()).get();
    stream.next().await.unwrap().unwrap();
    drop(stream);

    let log = store.log();
    assert!(wait_for(Duration::from_secs(5), || log.fully_released()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cursor_error_surfaces_after_delivered_rows() {
    let store = FakeStore::new(Script {
        fail_at_row: Some(3),
        ..Script::numbered(5)
    });
    let provider = QueryResourceProvider::new(store.clone(), dispatcher(), 4);

    let mut stream = provider.get(numbers()).get();
    let mut rows = 0;
    let mut errors = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(_) => rows += 1,
            Err(e) => errors.push(e),
        }
    }

    assert_eq!(rows, 2);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].action(), Some("advance"));
    assert_eq!(stream.termination(), Some(Termination::Failed));
    assert!(store.log().fully_released());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_update_yields_rows_affected_then_completes() {
    let store = FakeStore::new(Script {
        parameter_count: 2,
        rows_affected: 1,
        ..Script::default()
    });
    let updates = UpdateResourceProvider::new(store.clone(), dispatcher());
    let resource = updates.get("UPDATE t SET v=? WHERE id=?");

    let mut stream = resource.execute([9_i64, 42]);
    assert_eq!(stream.next().await.unwrap().unwrap(), 1);
    assert!(stream.next().await.is_none());
    assert_eq!(stream.termination(), Some(Termination::Completed));
    assert!(store.log().fully_released());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_update_with_invalid_parameters_fails_on_stream() {
    let store = FakeStore::new(Script::default());
    let updates = UpdateResourceProvider::new(store.clone(), dispatcher());

    let stream = updates
        .get("UPDATE t SET v = 1")
        .update(vec![crudstream::Parameter::at(0, 1_i64)]);
    let err = stream.collect_all().await.unwrap_err();

    assert!(err.is_binding());
    assert_eq!(store.acquisitions(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bounded_dispatcher_runs_every_stream() {
    let store = FakeStore::new(Script::numbered(3));
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(TokioDispatcher::bounded(tokio::runtime::Handle::current(), 1));
    let provider = QueryResourceProvider::new(store.clone(), dispatcher, 1);

    let streams: Vec<_> = (0..4).map(|_| provider.get(numbers()).get()).collect();
    for stream in streams {
        assert_eq!(stream.collect_all().await.unwrap().len(), 3);
    }
    assert_eq!(store.acquisitions(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bounded_dispatcher_serves_nested_stream() {
    let store = FakeStore::new(Script::numbered(10));
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(TokioDispatcher::bounded(tokio::runtime::Handle::current(), 1));
    let provider = QueryResourceProvider::new(store.clone(), dispatcher, 1);

    let mut outer = provider.get(numbers()).get();
    outer.next().await.unwrap().unwrap();

    // The outer worker is parked on a full buffer, not holding the only slot.
    let nested = tokio::time::timeout(Duration::from_secs(5), provider.get(numbers()).get().collect_all())
        .await
        .expect("nested stream never started")
        .unwrap();
    assert_eq!(nested.len(), 10);

    assert_eq!(outer.collect_all().await.unwrap().len(), 9);
    assert_eq!(store.acquisitions(), 2);
}
