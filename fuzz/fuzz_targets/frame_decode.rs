//! Fuzzer for inbound frame handling.
//!
//! Arbitrary bytes are cut into frames exactly as the connection loop does
//! and fed to a fresh server auth handler. Decoding may fail and the handler
//! may refuse, but nothing may panic and no input may be accepted: a valid
//! proof cannot be produced without the client's private key.

#![no_main]

use burrow_core::{
    AcceptDecision, AuthState, FrameHandler, Identity, SystemEnv, auth::ServerAuthHandler,
};
use burrow_proto::{Frame, FrameHeader, Payload};
use ed25519_dalek::VerifyingKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let (mut handler, _waiter) =
        ServerAuthHandler::new(SystemEnv, Identity::from_seed([7; 32]), None);
    handler.set_server_authorization_hook(|_: &str, _: &VerifyingKey| -> AcceptDecision {
        panic!("decision reached without a valid proof")
    });

    let mut rest = data;
    while rest.len() >= FrameHeader::SIZE {
        let Ok(header) = FrameHeader::from_bytes(rest) else {
            return;
        };
        let total = FrameHeader::SIZE + header.payload_size() as usize;
        if rest.len() < total {
            return;
        }

        let Ok(frame) = Frame::decode(&rest[..total]) else {
            return;
        };
        rest = &rest[total..];

        // Payload decoding on its own must be total
        let _ = Payload::from_frame(&frame);

        if handler.handle_frame(&frame).is_err() {
            return;
        }
        assert_ne!(handler.state(), AuthState::Accepted);
    }
});
