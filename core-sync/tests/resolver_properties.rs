//! Property tests for the duplicate resolver

use bridge_traits::{FileRecord, StorageClass};
use core_sync::DuplicateResolver;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

/// Small value pools so collisions on id and signature are common
fn arb_record() -> impl Strategy<Value = FileRecord> {
    (
        prop::sample::select(vec!["a", "b", "c", "d", "e", ""]),
        prop::sample::select(vec!["x.txt", "y.png", "z.bin", ""]),
        prop::sample::select(vec!["text/plain", "image/png"]),
        0u64..4,
        0i64..5,
        prop::option::of(prop::sample::select(vec!["bafy1", "bafy2"])),
        prop::sample::select(vec![
            StorageClass::LocalOnly,
            StorageClass::LocalWithRemote,
            StorageClass::RemoteOnly,
        ]),
    )
        .prop_map(|(id, name, mime, size, created, hash, class)| FileRecord {
            id: id.to_string(),
            display_name: name.to_string(),
            mime_type: mime.to_string(),
            size_bytes: size,
            created_at_ms: created,
            storage_class: class,
            remote_hash: hash.map(str::to_string),
        })
}

fn signature(record: &FileRecord) -> (String, u64, String) {
    (
        record.display_name.clone(),
        record.size_bytes,
        record.mime_type.clone(),
    )
}

fn well_formed(record: &FileRecord) -> bool {
    !record.id.is_empty()
        && !record.display_name.is_empty()
        && !record.mime_type.is_empty()
        && record.size_bytes > 0
        && !(record.remote_hash.is_some() && record.storage_class == StorageClass::LocalOnly)
}

proptest! {
    #[test]
    fn resolve_is_idempotent(candidates in prop::collection::vec(arb_record(), 0..24)) {
        let resolver = DuplicateResolver::new();
        let once = resolver.resolve(candidates);
        let twice = resolver.resolve(once.clone());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn resolved_ids_and_signatures_are_unique(candidates in prop::collection::vec(arb_record(), 0..24)) {
        let resolved = DuplicateResolver::new().resolve(candidates);

        let ids: HashSet<&str> = resolved.iter().map(|r| r.id.as_str()).collect();
        prop_assert_eq!(ids.len(), resolved.len());

        let signatures: HashSet<_> = resolved.iter().map(signature).collect();
        prop_assert_eq!(signatures.len(), resolved.len());
    }

    #[test]
    fn resolved_records_are_well_formed(candidates in prop::collection::vec(arb_record(), 0..24)) {
        for record in DuplicateResolver::new().resolve(candidates) {
            prop_assert!(!record.id.is_empty());
            prop_assert!(!record.display_name.is_empty());
            prop_assert!(record.size_bytes > 0);
            prop_assert!(record.remote_hash.is_none() || record.storage_class != StorageClass::LocalOnly);
        }
    }

    #[test]
    fn survivors_keep_input_order(candidates in prop::collection::vec(arb_record(), 0..24)) {
        let resolved = DuplicateResolver::new().resolve(candidates.clone());

        let mut cursor = candidates.iter();
        for survivor in &resolved {
            prop_assert!(cursor.any(|candidate| candidate == survivor));
        }
    }

    #[test]
    fn survivor_is_newest_of_its_signature(candidates in prop::collection::vec(arb_record(), 0..24)) {
        let resolved = DuplicateResolver::new().resolve(candidates.clone());

        // Candidates that reach the signature pass: well formed, first per id.
        let mut seen = HashSet::new();
        let mut newest: HashMap<(String, u64, String), i64> = HashMap::new();
        for record in candidates.iter().filter(|r| well_formed(r)) {
            if seen.insert(record.id.clone()) {
                let entry = newest.entry(signature(record)).or_insert(record.created_at_ms);
                *entry = (*entry).max(record.created_at_ms);
            }
        }

        prop_assert_eq!(resolved.len(), newest.len());
        for record in &resolved {
            prop_assert_eq!(newest[&signature(record)], record.created_at_ms);
        }
    }
}

#[test]
fn two_ids_same_content_keeps_newest() {
    let resolved = DuplicateResolver::new().resolve(vec![
        FileRecord::new("a", "x.txt", "text/plain", 100, 10),
        FileRecord::new("b", "x.txt", "text/plain", 100, 20),
    ]);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, "b");
}
