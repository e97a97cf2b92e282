//! Property-based tests for key derivation, record crypto and merging
//!
//! Uses proptest to check the invariants the engine relies on.

mod common;

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use proptest::prelude::*;

use common::MemoryRemote;
use weave_core::crypto::MAX_EXPAND_LENGTH;
use weave_core::sync::{history, CollectionStats};
use weave_core::{
    hkdf, round2, Envelope, ErrorKind, HistoryRecord, HistoryStore, KeyBundle, MemoryPlaces,
    Storage,
};

// ============================================================================
// Strategy Generators
// ============================================================================

/// Page titles, including non-ASCII text
fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 éü漢字🙂]{1,200}").expect("valid regex")
}

/// Server-style timestamps with two decimals
fn timestamp_strategy() -> impl Strategy<Value = f64> {
    (100_000u64..10_000_000u64).prop_map(|cents| round2(cents as f64 / 100.0))
}

fn keys_strategy() -> impl Strategy<Value = KeyBundle> {
    (any::<[u8; 32]>(), any::<[u8; 32]>()).prop_map(|(enc, mac)| KeyBundle::new(enc, mac))
}

// ============================================================================
// Key derivation
// ============================================================================

proptest! {
    /// Output length always matches the request
    #[test]
    fn hkdf_output_has_requested_length(
        secret in prop::collection::vec(any::<u8>(), 1..64),
        length in 1usize..=MAX_EXPAND_LENGTH,
    ) {
        let okm = hkdf(&secret, None, b"info", length).unwrap();
        prop_assert_eq!(okm.len(), length);
    }

    /// Same inputs give the same output; a changed secret gives another
    #[test]
    fn hkdf_is_deterministic_and_input_sensitive(
        secret in prop::collection::vec(any::<u8>(), 1..64),
        flip in any::<prop::sample::Index>(),
    ) {
        let first = hkdf(&secret, Some(b"salt"), b"info", 64).unwrap();
        let second = hkdf(&secret, Some(b"salt"), b"info", 64).unwrap();
        prop_assert_eq!(&first, &second);

        let mut changed = secret.clone();
        let i = flip.index(changed.len());
        changed[i] ^= 0x01;
        let other = hkdf(&changed, Some(b"salt"), b"info", 64).unwrap();
        prop_assert_ne!(first, other);
    }
}

// ============================================================================
// Record crypto
// ============================================================================

proptest! {
    /// Decrypting an encrypted record gives the record back
    #[test]
    fn envelope_roundtrip(
        keys in keys_strategy(),
        title in title_strategy(),
        atime in timestamp_strategy(),
    ) {
        let record = HistoryRecord::new("guid", "https://example.com", title, atime);
        let envelope = Envelope::seal(&record, &keys).unwrap();
        let opened: HistoryRecord = envelope.open(&keys).unwrap();
        prop_assert_eq!(opened, record);
    }

    /// Flipping any ciphertext bit is caught by the HMAC
    #[test]
    fn tampered_ciphertext_fails_integrity(
        keys in keys_strategy(),
        title in title_strategy(),
        byte in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let record = HistoryRecord::new("guid", "https://example.com", title, 1000.0);
        let mut envelope = Envelope::seal(&record, &keys).unwrap();

        let mut raw = BASE64.decode(&envelope.ciphertext).unwrap();
        let i = byte.index(raw.len());
        raw[i] ^= 1 << bit;
        envelope.ciphertext = BASE64.encode(raw);

        let err = envelope.open::<HistoryRecord>(&keys).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::Integrity);
    }
}

// ============================================================================
// Merging
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A remote record replaces the local row exactly when it is newer
    #[test]
    fn last_writer_wins(local in timestamp_strategy(), remote_time in timestamp_strategy()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let storage = Storage::open_in(dir.path()).unwrap();
        let keys = KeyBundle::generate();
        let remote = Arc::new(MemoryRemote::new());
        let session = common::session(&remote, &keys);

        let places = MemoryPlaces::new();
        let id = HistoryStore::add(&places, "Local", "https://example.com", "guid", 50.0, local)
            .unwrap();
        remote.insert_record(
            "history",
            "guid",
            &HistoryRecord::new("guid", "https://example.com", "Remote", 60.0),
            &keys,
            remote_time,
        );

        let mut stats = CollectionStats::default();
        runtime
            .block_on(history::pull(&places, &session, &storage, 0.1, &mut stats))
            .unwrap();

        let row = HistoryStore::get(&places, id).unwrap().unwrap();
        if remote_time > local {
            prop_assert_eq!(row.title, "Remote");
            prop_assert_eq!(row.mtime, remote_time);
            prop_assert_eq!(stats.applied, 1);
        } else {
            prop_assert_eq!(row.title, "Local");
            prop_assert_eq!(row.mtime, local);
            prop_assert_eq!(stats.skipped, 1);
        }
    }
}
