//! Oracle functions for scenario verification.
//!
//! Oracle functions run at the end of scenarios to verify global consistency.
//! They receive the finished world and check invariants.

use burrow_core::OutcomeKind;

use crate::scenario::World;

/// Oracle function type.
///
/// Receives immutable reference to world state and returns:
/// - `Ok(())` if all invariants hold
/// - `Err(message)` if verification fails
pub type OracleFn = Box<dyn FnOnce(&World) -> Result<(), String>>;

/// The server reported an outcome of class `expected`.
pub fn outcome_is(expected: OutcomeKind) -> OracleFn {
    Box::new(move |world| match world.outcome_kind() {
        Some(kind) if kind == expected => Ok(()),
        Some(kind) => Err(format!("expected {:?} outcome, got {:?}", expected, kind)),
        None => Err("server did not report an outcome".to_string()),
    })
}

/// The decision callback ran at most once.
pub fn at_most_one_decision() -> OracleFn {
    Box::new(|world| {
        let calls = world.decisions().len();
        if calls <= 1 { Ok(()) } else { Err(format!("decision callback ran {} times", calls)) }
    })
}

/// The decision callback never ran.
pub fn no_decision() -> OracleFn {
    Box::new(|world| {
        if world.decisions().is_empty() {
            Ok(())
        } else {
            Err(format!("decision callback ran for {:?}", world.decisions()))
        }
    })
}

/// A success carries the client's real identity, as shown to the callback.
pub fn success_matches_client() -> OracleFn {
    Box::new(|world| {
        if world.success_matches_client() {
            Ok(())
        } else {
            Err(format!(
                "success does not match client {}: {:?}",
                world.client_hostname(),
                world.outcome()
            ))
        }
    })
}

/// The server never entered its processing loop or touched the wire.
pub fn no_server_io() -> OracleFn {
    Box::new(|world| {
        let stats = world.server();
        if stats.process_calls == 0 && stats.frames_received == 0 && stats.frames_sent == 0 {
            Ok(())
        } else {
            Err(format!("server performed I/O: {:?}", stats))
        }
    })
}

/// The client received a verdict with this `accepted` flag.
pub fn client_told(accepted: bool) -> OracleFn {
    Box::new(move |world| match world.client().verdict {
        Some(verdict) if verdict.accepted == accepted => Ok(()),
        other => Err(format!("client expected accepted={}, got {:?}", accepted, other)),
    })
}

/// Combine multiple oracles into one.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| {
        for oracle in oracles {
            oracle(world)?;
        }
        Ok(())
    })
}
