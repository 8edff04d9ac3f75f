//! Registry and addressing tests.
//!
//! Tests cover:
//! - Handle registries under concurrent register/lookup/release
//! - The process-wide value decoder registry
//! - Path canonicalization on generated inputs

use dataspace_core::error::ErrorCode;
use dataspace_core::net::{HandleError, HandleRegistry};
use dataspace_core::prelude::*;
use dataspace_core::value::{decode, CodecRegistry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

// ============================================================================
// Handle registries
// ============================================================================

#[test]
fn test_concurrent_registry_operations_keep_mapping() {
    const THREADS: u64 = 8;
    const HELD_PER_THREAD: usize = 8;
    let registry = Arc::new(HandleRegistry::<u64>::with_capacity("stress", THREADS * HELD_PER_THREAD as u64));

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let registry = registry.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(worker);
                let mut held: Vec<(u64, u64)> = Vec::new();
                for i in 0..2_000u64 {
                    let value = worker * 1_000_000 + i;
                    match rng.gen_range(0..3) {
                        0 if held.len() < HELD_PER_THREAD => {
                            let handle = registry.register(value).unwrap();
                            held.push((handle, value));
                        }
                        1 if !held.is_empty() => {
                            let (handle, value) = held[rng.gen_range(0..held.len())];
                            assert_eq!(registry.lookup(handle).unwrap(), value);
                        }
                        _ if !held.is_empty() => {
                            let (handle, value) = held.swap_remove(rng.gen_range(0..held.len()));
                            assert_eq!(registry.release(handle).unwrap(), value);
                        }
                        _ => {}
                    }
                }
                held
            })
        })
        .collect();

    let mut remaining = Vec::new();
    for worker in workers {
        remaining.extend(worker.join().unwrap());
    }

    assert_eq!(registry.len(), remaining.len());
    let handles: HashSet<u64> = remaining.iter().map(|(h, _)| *h).collect();
    assert_eq!(handles.len(), remaining.len());
    for (handle, value) in remaining {
        assert!(handle < THREADS * HELD_PER_THREAD as u64);
        assert_eq!(registry.lookup(handle).unwrap(), value);
    }
}

#[test]
fn test_full_registry_reports_exhaustion() {
    let registry = HandleRegistry::with_capacity("tiny", 2);
    let first = registry.register("a").unwrap();
    registry.register("b").unwrap();
    assert!(matches!(registry.register("c"), Err(HandleError::Exhausted { capacity: 2, .. })));

    registry.release(first).unwrap();
    assert_eq!(registry.register("c").unwrap(), first);
}

// ============================================================================
// Value decoders
// ============================================================================

#[test]
fn test_global_decoder_registration() {
    let id: Encoding = 0x55;
    assert!(decode(id, b"x").is_err());

    register_value_decoder(id, |payload: &[u8]| Ok(Value::Int(payload.len() as i64))).unwrap();
    assert_eq!(decode(id, b"abc").unwrap(), Value::Int(3));

    let err = register_value_decoder(id, |_: &[u8]| Ok(Value::Int(0))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RegistrationConflict);
    assert_eq!(decode(id, b"abcd").unwrap(), Value::Int(4));

    let err = register_value_decoder(encoding::STRING, |_: &[u8]| Ok(Value::Int(0))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RegistrationConflict);
}

#[tokio::test]
async fn test_custom_encoding_through_a_workspace() {
    const CSV: Encoding = 0x56;
    let registry = CodecRegistry::global();
    if !registry.contains(CSV) {
        register_value_decoder(CSV, |payload: &[u8]| {
            let text = std::str::from_utf8(payload).map_err(|e| DecodeError::Custom(e.to_string()))?;
            Ok(Value::Properties(Properties::parse(&text.replace(',', ";"))))
        })
        .unwrap();
    }

    let router = LoopbackRouter::new();
    let client = Client::login(&router, None, &Properties::new()).unwrap();
    let _storage = MemoryStorage::declare(client.session().clone(), &Selector::new("/csv/**").unwrap()).unwrap();
    let ws = client.workspace(&Path::new("/csv").unwrap());

    let value = Value::Custom {
        encoding: CSV,
        payload: b"a=1,b=2".to_vec(),
    };
    ws.put(&Path::new("row").unwrap(), &value).unwrap();

    let result = ws.get(&Selector::new("/csv/row").unwrap()).await.unwrap();
    assert_eq!(result.len(), 1);
    let Value::Properties(props) = result[0].value() else {
        panic!("expected properties, got {:?}", result[0].value());
    };
    assert_eq!(props.get("a"), Some("1"));
    assert_eq!(props.get("b"), Some("2"));
}

// ============================================================================
// Paths
// ============================================================================

fn random_path(rng: &mut StdRng) -> String {
    const ALPHABET: [char; 5] = ['a', 'b', '/', '-', '.'];
    let len = rng.gen_range(1..16);
    (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())]).collect()
}

#[test]
fn test_canonical_paths_are_fixed_points() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..2_000 {
        let raw = random_path(&mut rng);
        let path = Path::new(&raw).unwrap();
        let canonical = path.as_str();

        assert!(!canonical.contains("//"), "{:?} -> {:?}", raw, canonical);
        assert!(canonical == "/" || !canonical.ends_with('/'), "{:?} -> {:?}", raw, canonical);
        assert_eq!(raw.starts_with('/'), canonical.starts_with('/'));
        assert_eq!(Path::new(canonical).unwrap(), path);
    }
}

#[test]
fn test_forbidden_character_index_is_reported() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..200 {
        let prefix = random_path(&mut rng);
        let forbidden = ['?', '#', '[', ']', '*'][rng.gen_range(0..5)];
        let raw = format!("{}{}tail", prefix, forbidden);

        let err = Path::new(&raw).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPath);
        assert_eq!(err.details().context.get("index"), Some(&serde_json::json!(prefix.len())));
    }
}
