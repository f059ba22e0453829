//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check store, service and key invariants over generated
//! inputs.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{CacheKey, CacheService, CacheStore, GlobPattern, MemoryStore};

// == Test Configuration ==
const TEST_TTL: u64 = 300;

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

// == Strategies ==
/// Keys shaped like the ones the scrape core builds
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "otaku:[a-z]{1,10}(:[a-zA-Z0-9_-]{1,16}){0,3}".prop_map(|s| s)
}

fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,256}".prop_map(|s| s)
}

/// Free-form key parameters, delimiters and wildcards included
fn param_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9:*% -]{0,12}".prop_map(|s| s)
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| CacheOp::Set { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        valid_key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Storing a value and reading it back before expiry returns it unchanged.
    #[test]
    fn prop_roundtrip_storage(key in valid_key_strategy(), value in valid_value_strategy()) {
        let cache = CacheService::new(Arc::new(CacheStore::memory_only()));

        let retrieved = block_on(async {
            cache.set(&key, &value, TEST_TTL).await;
            cache.get::<String>(&key).await
        });

        prop_assert_eq!(retrieved, Some(value));
    }

    // The second of two writes to one key wins, and only one entry remains.
    #[test]
    fn prop_overwrite_semantics(
        key in valid_key_strategy(),
        value1 in valid_value_strategy(),
        value2 in valid_value_strategy()
    ) {
        let store = CacheStore::memory_only();

        let (retrieved, len) = block_on(async {
            store.set(&key, &value1, TEST_TTL).await;
            store.set(&key, &value2, TEST_TTL).await;
            (store.get(&key).await, store.fallback().len().await)
        });

        prop_assert_eq!(retrieved, Some(value2));
        prop_assert_eq!(len, 1);
    }

    // A zero TTL never leaves a readable entry behind.
    #[test]
    fn prop_zero_ttl_is_absent(key in valid_key_strategy(), value in valid_value_strategy()) {
        let store = CacheStore::memory_only();

        let (retrieved, ttl) = block_on(async {
            store.set(&key, &value, TEST_TTL).await;
            store.set(&key, &value, 0).await;
            (store.get(&key).await, store.ttl_ms(&key).await)
        });

        prop_assert!(retrieved.is_none());
        prop_assert!(ttl.is_none());
    }

    // The store agrees with a plain HashMap model over any op sequence.
    #[test]
    fn prop_store_matches_model(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let store = MemoryStore::new();
        let mut model = HashMap::new();

        block_on(async {
            for op in ops {
                match op {
                    CacheOp::Set { key, value } => {
                        store.insert(&key, &value, TEST_TTL).await;
                        model.insert(key, value);
                    }
                    CacheOp::Get { key } => {
                        assert_eq!(store.lookup(&key).await.as_ref(), model.get(&key));
                    }
                    CacheOp::Delete { key } => {
                        assert_eq!(store.remove(&key).await, model.remove(&key).is_some());
                    }
                }
            }
            assert_eq!(store.len().await, model.len());
        });
    }

    // Keys are deterministic, and distinct parameter lists never collide.
    #[test]
    fn prop_keys_deterministic_and_distinct(
        a in prop::collection::vec(param_strategy(), 0..4),
        b in prop::collection::vec(param_strategy(), 0..4)
    ) {
        let key_a = CacheKey::new("otaku:search", &a);
        prop_assert_eq!(&key_a, &CacheKey::new("otaku:search", &a));

        let key_b = CacheKey::new("otaku:search", &b);
        prop_assert_eq!(a == b, key_a == key_b);
    }

    // A parameter can never widen an invalidation glob built from its key.
    #[test]
    fn prop_escaped_params_match_only_themselves(
        params in prop::collection::vec(param_strategy(), 1..4),
        others in prop::collection::vec(param_strategy(), 1..4)
    ) {
        let key = CacheKey::new("otaku:browse", &params);
        let glob = GlobPattern::new(key.as_str()).unwrap();
        let other = CacheKey::new("otaku:browse", &others);

        prop_assert!(glob.matches(key.as_str()));
        prop_assert_eq!(glob.matches(other.as_str()), params == others);
    }

    // invalidate_pattern removes exactly the keys under the prefix.
    #[test]
    fn prop_invalidate_counts_prefix(
        keys in prop::collection::hash_set("[a-z0-9]{1,8}", 1..20),
        others in prop::collection::hash_set("[a-z0-9]{1,8}", 0..20)
    ) {
        let cache = CacheService::new(Arc::new(CacheStore::memory_only()));

        let (removed, left) = block_on(async {
            for key in &keys {
                cache.set(&format!("otaku:search:{}", key), &1, TEST_TTL).await;
            }
            for key in &others {
                cache.set(&format!("otaku:genres:{}", key), &1, TEST_TTL).await;
            }
            let removed = cache.invalidate_pattern("otaku:search:*").await;
            (removed, cache.store().keys("otaku:*").await.len())
        });

        prop_assert_eq!(removed, keys.len());
        prop_assert_eq!(left, others.len());
    }
}
