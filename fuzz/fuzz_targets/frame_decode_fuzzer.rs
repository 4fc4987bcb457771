//! Fuzz target for wire frame decoding.
//!
//! Backend text frames are untrusted input. Decoding must never panic, and
//! anything that decodes must survive an encode/decode cycle unchanged.

#![no_main]

use chatwire_proto::{ClientFrame, ServerFrame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|text: &str| {
    if let Ok(frame) = ServerFrame::decode(text) {
        let _ = frame.event_name();
        let encoded = frame.encode().expect("decoded frame re-encodes");
        assert_eq!(ServerFrame::decode(&encoded).expect("re-decodes"), frame);
    }

    if let Ok(frame) = ClientFrame::decode(text) {
        let encoded = frame.encode().expect("decoded frame re-encodes");
        assert_eq!(ClientFrame::decode(&encoded).expect("re-decodes"), frame);
    }
});
