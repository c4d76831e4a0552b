// Property: a stored snapshot is returned exactly.
//
// For any key and response, `put` followed by `lookup` in the same namespace
// yields the identical snapshot, on both storage backends, and a later `put`
// for the same key replaces the earlier one.

use bytes::Bytes;
use offline_cache::config::NamespaceConfig;
use offline_cache::storage::{CacheStorage, DiskStorage, MemoryStorage};
use offline_cache::{FetchRequest, NamespaceKind, NamespaceRegistry, ResponseSnapshot};
use proptest::prelude::*;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn snapshot() -> impl Strategy<Value = ResponseSnapshot> {
    (
        prop::sample::select(vec![200u16, 203, 404, 500]),
        prop::collection::vec(("x-[a-z]{1,8}", "[ -~]{0,24}"), 0..4),
        prop::collection::vec(any::<u8>(), 0..2048),
    )
        .prop_map(|(status, headers, body)| {
            headers.into_iter().fold(
                ResponseSnapshot::new(status, Bytes::from(body)),
                |snap, (name, value)| snap.with_header(&name, value),
            )
        })
}

fn kind() -> impl Strategy<Value = NamespaceKind> {
    prop::sample::select(NamespaceKind::ALL.to_vec())
}

async fn check_round_trip(
    storage: Arc<dyn CacheStorage>,
    path: &str,
    kind: NamespaceKind,
    first: ResponseSnapshot,
    second: ResponseSnapshot,
) -> Result<(), TestCaseError> {
    let registry = NamespaceRegistry::new(storage, NamespaceConfig::default(), "v1");
    let handle = registry.handle(kind);
    let key = FetchRequest::get(&format!("http://localhost:8080{}", path))
        .unwrap()
        .cache_key();

    registry.put(&handle, key.clone(), first.clone()).await;
    let stored = registry.lookup(&handle, &key).await;
    prop_assert_eq!(stored.map(|e| e.response), Some(first));

    registry.put(&handle, key.clone(), second.clone()).await;
    let replaced = registry.lookup(&handle, &key).await;
    prop_assert_eq!(replaced.map(|e| e.response), Some(second));

    prop_assert_eq!(registry.keys(&handle.name).await, vec![key]);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_memory_round_trip(
        path in "/[a-z0-9/]{0,24}",
        kind in kind(),
        first in snapshot(),
        second in snapshot(),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(check_round_trip(
            Arc::new(MemoryStorage::new()),
            &path,
            kind,
            first,
            second,
        ))?;
    }

    #[test]
    fn prop_disk_round_trip(
        path in "/[a-z0-9/]{0,24}",
        kind in kind(),
        first in snapshot(),
        second in snapshot(),
    ) {
        let rt = Runtime::new().unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        rt.block_on(async {
            let storage = Arc::new(DiskStorage::open(dir.path()).await.unwrap());
            check_round_trip(storage, &path, kind, first, second).await
        })?;
    }
}
