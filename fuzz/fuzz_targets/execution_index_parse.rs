#![no_main]

// Frame keys are built from arbitrary components; raw keys must survive the
// canonical index text, and arbitrary text must never panic the parser.

use arbitrary::Arbitrary;
use faultline_core::dei::{ExecutionIndex, Frame, FrameKey};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct RawFrame {
    scope: String,
    signature: String,
    ancestry: String,
    occurrence: u8,
}

#[derive(Arbitrary, Debug)]
struct Input {
    text: String,
    frames: Vec<RawFrame>,
    digest: bool,
}

fuzz_target!(|input: Input| {
    let _ = ExecutionIndex::parse(&input.text);

    let frames = input
        .frames
        .iter()
        .map(|f| Frame {
            key: FrameKey::new(&f.scope, &f.signature, &f.ancestry, input.digest),
            occurrence: u64::from(f.occurrence) + 1,
        })
        .collect();
    let index = ExecutionIndex::from_frames(frames);
    let parsed = ExecutionIndex::parse(&index.to_canonical_string()).expect("canonical index must parse");
    assert_eq!(parsed, index);
});
