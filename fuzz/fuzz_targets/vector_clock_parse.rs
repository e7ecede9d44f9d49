#![no_main]

// Any clock that parses must re-serialize to text that parses to an equal clock.

use faultline_core::time::VectorClock;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|text: &str| {
    if let Ok(clock) = VectorClock::parse(text) {
        let canonical = clock.to_canonical_string();
        let again = VectorClock::parse(&canonical).expect("canonical clock must parse");
        assert_eq!(again, clock);
        assert_eq!(again.to_canonical_string(), canonical);
    }
});
