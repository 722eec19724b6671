#![no_main]

use libfuzzer_sys::fuzz_target;
use topicstore::index::Index;

fuzz_target!(|data: &[u8]| {
    let mut cur = std::io::Cursor::new(data);
    if let Ok(index) = Index::decode(&mut cur) {
        // Anything that decodes must re-encode.
        let _ = index.to_bytes();
    }
});
