//! Benchmarks for `topicstore::filestore`.
#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use topicstore::{
    BackingStore, Directory, FileStore, FsDirectory, ManualClock, MemoryDirectory, Message,
    StoreConfig, Timestamp,
};

fn diverse_texts() -> Vec<String> {
    vec![
        "Marie Curie discovered radium in Paris.".into(),
        "習近平在北京會見了普京。".into(),
        "التقى محمد بن سلمان بالرئيس في الرياض".into(),
        "Путин встретился с Си Цзиньпином в Москве.".into(),
        "Dr. 田中 presented her research at MIT's AI conference.".into(),
        "François Müller and José García met in São Paulo.".into(),
    ]
}

fn memory_store() -> FileStore {
    let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    let config = StoreConfig {
        max_segment_bytes: 64 * 1024,
        ..StoreConfig::default()
    };
    FileStore::open(dir, config).unwrap()
}

fn fill(store: &FileStore, texts: &[String], n: usize) {
    for i in 0..n {
        let t = texts[i % texts.len()].clone();
        store.store("bench", Message::new("bench", t)).unwrap();
    }
}

fn bench_store_poll_purge(c: &mut Criterion) {
    let texts = diverse_texts();
    let mut group = c.benchmark_group("filestore");

    group.bench_function("store_200_memory", |b| {
        b.iter_batched(
            memory_store,
            |store| fill(&store, &texts, 200),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("store_50_fs_unsynced", |b| {
        b.iter_batched(
            || {
                let tmp = tempfile::tempdir().unwrap();
                let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path()).unwrap());
                let config = StoreConfig {
                    sync_writes: false,
                    ..StoreConfig::default()
                };
                (tmp, FileStore::open(dir, config).unwrap())
            },
            |(tmp, store)| {
                fill(&store, &texts, 50);
                drop(tmp);
            },
            BatchSize::SmallInput,
        );
    });

    let store = memory_store();
    fill(&store, &texts, 1000);
    group.bench_function("poll_tail_of_1k_memory", |b| {
        b.iter(|| {
            let r = store.poll("bench", 900).unwrap();
            assert_eq!(r.messages.len(), 100);
        })
    });

    group.bench_function("purge_half_of_1k_memory", |b| {
        b.iter_batched(
            || {
                let clock = ManualClock::new(Timestamp::from_micros(0));
                let store = memory_store().with_clock(clock.clone());
                for i in 0..1000 {
                    clock.set(Timestamp::from_micros(i));
                    let t = texts[i as usize % texts.len()].clone();
                    store.store("bench", Message::new("bench", t)).unwrap();
                }
                store
            },
            |store| {
                let removed = store
                    .remove_old_messages(Timestamp::from_micros(500))
                    .unwrap();
                assert_eq!(removed["bench"].len(), 500);
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_store_poll_purge);
criterion_main!(benches);
