#![no_main]

//! Fuzz target for attestation document parsing.
//!
//! Arbitrary bytes are decoded as attestations, statements, DBOMs and
//! window ids. Parsing must reject malformed input without panicking, and
//! anything that parses must re-encode and parse back to the same value.

use libfuzzer_sys::fuzz_target;
use makoto_core::{duration, Attestation, AttestationBody, WindowId};

fuzz_target!(|data: &[u8]| {
    fuzz_document_parsing(data);
});

fn fuzz_document_parsing(data: &[u8]) {
    if let Ok(attestation) = serde_json::from_slice::<Attestation>(data) {
        let _ = attestation.inputs();
        let _ = attestation.identity();
        if let Ok(payload) = attestation.canonical_payload() {
            assert!(!payload.is_empty());
        }
        let encoded = serde_json::to_vec(&attestation).expect("parsed attestation re-encodes");
        let reparsed: Attestation =
            serde_json::from_slice(&encoded).expect("re-encoded attestation parses");
        assert_eq!(reparsed, attestation);
    }

    if let Ok(AttestationBody::Dbom(dbom)) = serde_json::from_slice::<AttestationBody>(data) {
        let _ = dbom.calculate_overall_level();
    }

    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(id) = text.parse::<WindowId>() {
            assert!(id.start() < id.end());
            let again: WindowId = id.to_string().parse().expect("displayed id parses");
            assert_eq!(again, id);
        }
        if let Ok(parsed) = duration::parse(text) {
            assert!(parsed > chrono::Duration::zero());
        }
    }
}
