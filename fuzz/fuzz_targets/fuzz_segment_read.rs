#![no_main]

use libfuzzer_sys::fuzz_target;
use topicstore::segment::{decode_segment, SegmentReadMode};

fuzz_target!(|data: &[u8]| {
    let strict = decode_segment(data, SegmentReadMode::Strict);
    let best = decode_segment(data, SegmentReadMode::BestEffort);
    // Best-effort only ever forgives a torn tail.
    if let (Ok(s), Ok(b)) = (&strict, &best) {
        assert_eq!(s, b);
    }
});
