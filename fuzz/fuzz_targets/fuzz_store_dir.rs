#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use topicstore::{BackingStore, Directory, FileStore, MemoryDirectory, Message, StoreConfig};

/// Interpret input bytes as an index blob plus one segment blob for topic `t`.
///
/// Layout:
/// - [len:u16 LE][len bytes]: the index file
/// - remainder: `t/seg_00000000000000000000.log`
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let len = (u16::from_le_bytes([data[0], data[1]]) as usize).min(data.len() - 2);
    let (index, segment) = data[2..].split_at(len);

    let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    let _ = dir.atomic_write("index", index);
    let _ = dir.create_dir("t");
    let _ = dir.atomic_write("t/seg_00000000000000000000.log", segment);

    // Opening, reading and writing a corrupt store must fail cleanly, never panic.
    let Ok(store) = FileStore::open(dir, StoreConfig::default()) else {
        return;
    };
    let _ = store.poll("t", 0);
    let _ = store.check_consistency();
    let _ = store.store("t", Message::new("t", b"x".to_vec()));
    let _ = store.remove_old_messages(topicstore::Timestamp::now());
});
