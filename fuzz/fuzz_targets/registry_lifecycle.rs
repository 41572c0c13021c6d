#![no_main]

//! Drives the registry, baseline tracker and range resolution with
//! arbitrary operation streams and checks their invariants after each step.

use heartbeat_core::baseline::{BaselineTracker, Phase};
use heartbeat_core::registry::IdentityRegistry;
use heartbeat_core::store::resolve_range;
use libfuzzer_sys::fuzz_target;

const NAMES: [&str; 4] = ["a", "b", "c", ""];

fn name(byte: u8) -> &'static str {
    NAMES[usize::from(byte) % NAMES.len()]
}

fuzz_target!(|data: &[u8]| {
    let mut registry = IdentityRegistry::new();
    let mut baseline = BaselineTracker::new();

    for op in data.chunks_exact(3) {
        let (tag, x, y) = (op[0], op[1], op[2]);
        match tag % 9 {
            0 => {
                let _ = registry.register(name(x));
            }
            1 => {
                let id = name(x);
                if let Some(len) = registry.length_of(id) {
                    let _ = registry.set_length(id, len + u64::from(y % 8));
                }
            }
            2 => {
                let _ = registry.advance_cursor(name(x), u64::from(y));
            }
            3 => {
                let _ = registry.set_cursor(name(x), u64::from(y));
            }
            4 => {
                let _ = registry.rename(name(x), name(y));
            }
            5 => {
                let _ = baseline.start();
            }
            6 => {
                baseline.ingest(f64::from(x) + f64::from(y) / 256.0);
            }
            7 => {
                let _ = baseline.end();
            }
            _ => {
                let len = u64::from(x);
                let start = i64::from(y as i8);
                let end = i64::from(x as i8);
                if let Some(range) = resolve_range(len, start, end) {
                    assert!(range.start < range.end && range.end <= len);
                }
            }
        }

        for id in registry.all_identities() {
            assert!(!id.is_empty());
            let state = registry.state_of(id).unwrap();
            assert!(state.cursor <= state.length, "{id}: {state:?}");
        }
        for window in registry.pending() {
            assert!(window.pending() > 0);
        }
        if let Some(mean) = baseline.current() {
            assert!(mean.is_finite());
        }
        if baseline.phase() != Phase::Recording {
            assert!(!baseline.ingest(0.0));
        }
    }
});
