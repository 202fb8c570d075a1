//! Concurrency tests: overlapping verbs against one adapter.

use futures::future::{join_all, FutureExt, LocalBoxFuture};
use proptest::prelude::*;
use realtime_adapter::{
    Adapter, AdapterConfig, AdapterError, BackendOp, Identifier, MemoryBackend, MemoryStore,
    Payload, Query, Record, WatchKey,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn record(value: serde_json::Value) -> Record {
    Record::from_value(value).unwrap()
}

fn seeded_adapter() -> (Adapter, Arc<MemoryBackend>, Arc<MemoryStore>) {
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(MemoryStore::new());
    for model in ["comment", "post"] {
        backend.seed(
            model,
            (1..=4).map(|i| record(json!({"id": i, "post": i % 2}))),
        );
    }
    let adapter = Adapter::new(
        AdapterConfig::default().watch_model("comment"),
        backend.clone(),
        store.clone(),
    );
    (adapter, backend, store)
}

#[tokio::test]
async fn test_concurrent_find_all_watches_once() {
    let (adapter, backend, _) = seeded_adapter();

    let results = join_all((0..16).map(|_| adapter.find_all("comment"))).await;
    adapter.settle_watches().await;

    assert_eq!(results.len(), 16);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(backend.calls(BackendOp::Watch), 1);
    assert_eq!(backend.live_watchers(), 1);
    assert!(adapter.is_watching("comment", None));
}

#[tokio::test]
async fn test_concurrent_mixed_keys() {
    let (adapter, backend, _) = seeded_adapter();
    let even = Query::new(json!({"post": 0}));
    let odd = Query::new(json!({"post": 1}));

    let reads = (0..8).map(|i| {
        let query = if i % 2 == 0 { even.clone() } else { odd.clone() };
        adapter.query("comment", query)
    });
    let results = join_all(reads).await;
    adapter.settle_watches().await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(backend.calls(BackendOp::Watch), 2);
    assert!(adapter.is_watching("comment", Some(&even)));
    assert!(adapter.is_watching("comment", Some(&odd)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_thread_find_all() {
    let (adapter, backend, _) = seeded_adapter();
    let adapter = Arc::new(adapter);

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move {
                if i % 3 == 0 {
                    adapter.find_record("comment", 1).await
                } else {
                    adapter.find_all("comment").await
                }
            })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    adapter.settle_watches().await;

    assert_eq!(backend.calls(BackendOp::Watch), 1);
    assert_eq!(backend.live_watchers(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_thread_shutdown_leaves_nothing_live() {
    let (adapter, backend, _) = seeded_adapter();
    let adapter = Arc::new(adapter);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move {
                let query = Query::new(json!({"post": i % 2}));
                adapter.query("comment", query).await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    adapter.shutdown().await;
    assert_eq!(backend.live_watchers(), 0);
    assert!(!adapter.is_watching("comment", Some(&Query::new(json!({"post": 0})))));
}

// --- Randomized verb sequences ---

#[derive(Clone, Debug)]
enum Verb {
    FindAll(&'static str),
    FindRecord(&'static str, i64),
    FindMany(&'static str, Vec<i64>),
    Query(&'static str, i64),
    QueryRecord(&'static str, i64),
    Create(&'static str, i64),
    Delete(&'static str, i64),
}

impl Verb {
    fn is_write(&self) -> bool {
        matches!(self, Verb::Create(..) | Verb::Delete(..))
    }
}

fn model() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("comment"), Just("post")]
}

fn verb() -> impl Strategy<Value = Verb> {
    prop_oneof![
        model().prop_map(Verb::FindAll),
        (model(), 1..8i64).prop_map(|(m, id)| Verb::FindRecord(m, id)),
        (model(), prop::collection::vec(1..8i64, 1..4)).prop_map(|(m, ids)| Verb::FindMany(m, ids)),
        (model(), 0..2i64).prop_map(|(m, p)| Verb::Query(m, p)),
        (model(), 0..2i64).prop_map(|(m, p)| Verb::QueryRecord(m, p)),
        (model(), 0..2i64).prop_map(|(m, p)| Verb::Create(m, p)),
        (model(), 1..8i64).prop_map(|(m, id)| Verb::Delete(m, id)),
    ]
}

fn by_post(post: i64) -> Query {
    Query::new(json!({"post": post}))
}

/// What the backend holds for a read right now. None means NotFound.
fn snapshot(backend: &MemoryBackend, verb: &Verb) -> Option<Payload> {
    let find = |records: &[Record], id: i64| {
        records
            .iter()
            .find(|r| r.id() == Some(Identifier::Int(id)))
            .cloned()
    };
    match verb {
        Verb::FindAll(m) => Some(Payload::Records(backend.records(m))),
        Verb::FindRecord(m, id) => find(&backend.records(m), *id).map(Payload::Record),
        Verb::FindMany(m, ids) => {
            let records = backend.records(m);
            Some(Payload::Records(
                ids.iter().filter_map(|id| find(&records, *id)).collect(),
            ))
        }
        Verb::Query(m, p) => Some(Payload::Records(
            backend
                .records(m)
                .into_iter()
                .filter(|r| by_post(*p).matches(r))
                .collect(),
        )),
        Verb::QueryRecord(m, p) => Some(
            backend
                .records(m)
                .into_iter()
                .find(|r| by_post(*p).matches(r))
                .map(Payload::Record)
                .unwrap_or(Payload::Empty),
        ),
        Verb::Create(..) | Verb::Delete(..) => None,
    }
}

/// Run one read and load its payload into the store, as a caller would.
fn read<'a>(
    adapter: &'a Adapter,
    store: &'a MemoryStore,
    verb: Verb,
) -> LocalBoxFuture<'a, Result<Payload, AdapterError>> {
    async move {
        let (model, result) = match &verb {
            Verb::FindAll(m) => (*m, adapter.find_all(m).await),
            Verb::FindRecord(m, id) => (*m, adapter.find_record(m, *id).await),
            Verb::FindMany(m, ids) => {
                let ids = ids.iter().map(|id| Identifier::Int(*id)).collect();
                (*m, adapter.find_many(m, ids).await)
            }
            Verb::Query(m, p) => (*m, adapter.query(m, by_post(*p)).await),
            Verb::QueryRecord(m, p) => (*m, adapter.query_record(m, by_post(*p)).await),
            Verb::Create(..) | Verb::Delete(..) => unreachable!("writes run on their own"),
        };
        if let Ok(payload) = &result {
            store.load(model, payload);
        }
        result
    }
    .boxed_local()
}

/// Run reads concurrently; each must match the backend as it stood.
async fn run_reads(
    adapter: &Adapter,
    backend: &MemoryBackend,
    store: &MemoryStore,
    reads: &[Verb],
) -> Result<(), TestCaseError> {
    let expected: Vec<_> = reads.iter().map(|v| snapshot(backend, v)).collect();
    let results = join_all(reads.iter().cloned().map(|v| read(adapter, store, v))).await;
    adapter.settle_watches().await;

    for ((verb, expected), result) in reads.iter().zip(expected).zip(results) {
        match (result, expected) {
            (Ok(payload), Some(expected)) => prop_assert_eq!(payload, expected, "{:?}", verb),
            (Err(AdapterError::NotFound { .. }), None) => {}
            (result, expected) => {
                prop_assert!(false, "{:?}: got {:?}, expected {:?}", verb, result, expected)
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_reads_match_backend(verbs in prop::collection::vec(verb(), 1..32)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (adapter, backend, store) = seeded_adapter();
            let mut pending: Vec<Verb> = Vec::new();

            for verb in &verbs {
                if !verb.is_write() {
                    pending.push(verb.clone());
                    continue;
                }
                run_reads(&adapter, &backend, &store, &pending).await?;
                pending.clear();

                match verb {
                    Verb::Create(m, p) => {
                        adapter.create_record(m, record(json!({"post": p}))).await.unwrap();
                    }
                    Verb::Delete(m, id) => {
                        let _ = adapter.delete_record(m, Identifier::Int(*id)).await;
                    }
                    _ => {}
                }
            }
            run_reads(&adapter, &backend, &store, &pending).await?;

            let mut keys = HashSet::new();
            for verb in verbs.iter().filter(|v| !v.is_write()) {
                let (m, query) = match verb {
                    Verb::Query(m, p) | Verb::QueryRecord(m, p) => (*m, Some(by_post(*p))),
                    Verb::FindAll(m) | Verb::FindRecord(m, _) | Verb::FindMany(m, _) => (*m, None),
                    _ => continue,
                };
                keys.insert(WatchKey::new(m, query.as_ref()));
            }

            // One backend watch per key at most, none of them abandoned.
            prop_assert!(backend.calls(BackendOp::Watch) <= keys.len());
            prop_assert_eq!(backend.live_watchers(), backend.calls(BackendOp::Watch));
            prop_assert!(!adapter.is_watching("post", None));

            adapter.shutdown().await;
            prop_assert_eq!(backend.live_watchers(), 0);
            Ok(())
        })?;
    }
}
