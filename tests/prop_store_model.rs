//! Model-based property test: `FileStore` against a plain in-memory model.
//!
//! The model is a map of topic -> (next number, live messages). Every operation is applied
//! to both, and every poll must agree. Reopening the store mid-sequence must change nothing.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use topicstore::{
    BackingStore, Clock, Directory, FileStore, ManualClock, MemoryDirectory, Message,
    StoreConfig, Timestamp,
};

const TOPICS: [&str; 3] = ["alpha", "beta", "gamma"];

#[derive(Debug, Clone)]
enum Op {
    Store { topic: usize, payload: Vec<u8> },
    Advance { secs: u64 },
    Purge { age_secs: u64 },
    Poll { topic: usize, from: u64 },
    Reopen,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (0..TOPICS.len(), prop::collection::vec(any::<u8>(), 0..48))
            .prop_map(|(topic, payload)| Op::Store { topic, payload }),
        2 => (1u64..20).prop_map(|secs| Op::Advance { secs }),
        1 => (0u64..40).prop_map(|age_secs| Op::Purge { age_secs }),
        2 => (0..TOPICS.len(), 0u64..30).prop_map(|(topic, from)| Op::Poll { topic, from }),
        1 => Just(Op::Reopen),
    ]
}

#[derive(Default)]
struct Model {
    topics: BTreeMap<&'static str, (u64, Vec<(u64, Timestamp, Vec<u8>)>)>,
}

impl Model {
    fn store(&mut self, topic: &'static str, at: Timestamp, payload: Vec<u8>) -> u64 {
        let (next, live) = self.topics.entry(topic).or_default();
        let n = *next;
        *next += 1;
        live.push((n, at, payload));
        n
    }

    fn purge(&mut self, cutoff: Timestamp) -> BTreeMap<String, Vec<u64>> {
        let mut removed = BTreeMap::new();
        for (topic, (_, live)) in &mut self.topics {
            let gone: Vec<u64> = live.iter().filter(|m| m.1 < cutoff).map(|m| m.0).collect();
            if !gone.is_empty() {
                live.retain(|m| m.1 >= cutoff);
                removed.insert(topic.to_string(), gone);
            }
        }
        removed
    }

    fn poll(&self, topic: &str, from: u64) -> (Vec<Vec<u8>>, u64) {
        let Some((_, live)) = self.topics.get(topic) else {
            return (Vec::new(), from);
        };
        let hits: Vec<_> = live.iter().filter(|m| m.0 >= from).collect();
        let next = hits.last().map_or(from, |m| m.0 + 1);
        (hits.into_iter().map(|m| m.2.clone()).collect(), next)
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        failure_persistence: None,
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn store_matches_model(ops in prop::collection::vec(op(), 1..60), cap in 48u64..256) {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let config = StoreConfig { max_segment_bytes: cap, ..StoreConfig::default() };
        let clock = ManualClock::default();
        let open = || FileStore::open(dir.clone(), config.clone()).unwrap().with_clock(clock.clone());
        let mut store = open();
        let mut model = Model::default();

        for op in ops {
            match op {
                Op::Store { topic, payload } => {
                    let topic = TOPICS[topic];
                    match store.store(topic, Message::new(topic, payload.clone())) {
                        Ok(n) => prop_assert_eq!(n, model.store(topic, clock.now(), payload)),
                        Err(topicstore::StoreError::MessageTooLarge { .. }) => {}
                        Err(e) => return Err(TestCaseError::fail(e.to_string())),
                    }
                }
                Op::Advance { secs } => clock.advance(Duration::from_secs(secs)),
                Op::Purge { age_secs } => {
                    let cutoff = clock.now().saturating_sub(Duration::from_secs(age_secs));
                    let removed = store.remove_old_messages(cutoff).unwrap();
                    prop_assert_eq!(removed, model.purge(cutoff));
                }
                Op::Poll { topic, from } => {
                    let topic = TOPICS[topic];
                    let got = store.poll(topic, from).unwrap();
                    let (want, next) = model.poll(topic, from);
                    let payloads: Vec<Vec<u8>> = got.messages.into_iter().map(|m| m.payload).collect();
                    prop_assert_eq!(payloads, want);
                    prop_assert_eq!(got.new_read_from, next);
                }
                Op::Reopen => store = open(),
            }
        }

        for topic in TOPICS {
            let got = store.poll(topic, 0).unwrap();
            let (want, next) = model.poll(topic, 0);
            prop_assert_eq!(got.messages.len(), want.len());
            prop_assert_eq!(got.new_read_from, next);
        }
        prop_assert!(store.check_consistency().unwrap().is_clean());
    }
}
