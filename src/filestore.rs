//! File-backed store engine.
//!
//! Every operation runs under one store-wide lock and follows the same shape: load the index
//! from disk, do the segment I/O, save the index with a whole-file atomic replace. The index
//! is never cached between operations, so a restarted process picks up exactly what the last
//! completed operation saved.
//!
//! Failure windows:
//! - append: a segment write that lands but whose index save fails leaves bytes past the
//!   segment's committed length. Reads never see them; the next append to that segment cuts
//!   them off. The caller gets [`StoreError::IndexPersistFailure`].
//! - purge: compacted copies are written under fresh names *before* the index is saved, and
//!   old files are deleted *after*. A crash at any point leaves the index pointing at intact
//!   files; at worst some unreferenced files remain (see [`FileStore::check_consistency`]).

use crate::config::StoreConfig;
use crate::contract::{BackingStore, RemovedMessages};
use crate::error::{PersistenceError, PersistenceResult, StoreError, StoreResult};
use crate::filenamer;
use crate::formats::SEGMENT_HEADER_BYTES;
use crate::index::Index;
use crate::message::{Message, MessageNumber, PollResult, StoredMessage};
use crate::segment::{self, SegmentReader, SegmentWriter};
use crate::storage::{self, Directory, DurableDirectory};
use crate::time::{Clock, SystemClock, Timestamp};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// A segment named by topic and file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SegmentRef {
    /// Topic owning the segment.
    pub topic: String,
    /// Segment file name.
    pub file_name: String,
}

/// Findings of [`FileStore::check_consistency`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsistencyReport {
    /// Indexed segments whose file does not exist.
    pub missing_segments: Vec<SegmentRef>,
    /// Indexed segments whose file exists but cannot be decoded.
    pub unreadable_segments: Vec<SegmentRef>,
    /// Records present in a segment file but not in the index.
    pub orphan_records: Vec<(SegmentRef, MessageNumber)>,
    /// Segments with bytes past their committed length that hold no whole record, and
    /// how many such bytes there are. The next append to the segment cuts them off.
    pub orphan_tails: Vec<(SegmentRef, u64)>,
    /// Paths under the store root the index does not account for.
    pub untracked_files: Vec<String>,
}

impl ConsistencyReport {
    /// True when nothing was found.
    pub fn is_clean(&self) -> bool {
        self.missing_segments.is_empty()
            && self.unreadable_segments.is_empty()
            && self.orphan_records.is_empty()
            && self.orphan_tails.is_empty()
            && self.untracked_files.is_empty()
    }
}

#[derive(Default)]
struct PurgePlan {
    removed: RemovedMessages,
    written: Vec<String>,
    obsolete: Vec<String>,
}

/// The file-backed [`BackingStore`].
pub struct FileStore {
    dir: Arc<dyn Directory>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open the store kept in `dir`, writing an empty index if there is none yet.
    ///
    /// An index that exists but cannot be decoded is reported as
    /// [`StoreError::IndexUnavailable`].
    pub fn open(dir: impl Into<Arc<dyn Directory>>, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let store = Self {
            dir: dir.into(),
            config,
            clock: Arc::new(SystemClock),
            lock: Mutex::new(()),
        };

        let root = &store.config.root;
        if !root.is_empty() {
            store
                .dir
                .create_dir_all(root)
                .and_then(|()| {
                    let mut prefix = String::new();
                    for part in root.split('/').filter(|p| !p.is_empty()) {
                        prefix = storage::join(&prefix, part);
                        store.sync_dir_entry(&prefix)?;
                    }
                    Ok(())
                })
                .map_err(|source| StoreError::DirectoryCreateFailure {
                    path: root.clone(),
                    source,
                })?;
        }
        if store.dir.exists(&filenamer::index_file(root)) {
            let index = store.load_index()?;
            info!(root = %root, topics = index.topic_names().count(), "opened store");
        } else {
            store.save_index(&Index::new(), None)?;
            info!(root = %root, "created empty store");
        }
        Ok(store)
    }

    /// Replace the clock used to stamp new messages.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The medium the store runs on.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.dir
    }

    /// A copy of the index as currently saved.
    pub fn index(&self) -> StoreResult<Index> {
        let _guard = self.guard()?;
        self.load_index()
    }

    /// Topics the index knows about, sorted.
    pub fn topics(&self) -> StoreResult<Vec<String>> {
        let _guard = self.guard()?;
        let index = self.load_index()?;
        Ok(index.topic_names().map(str::to_string).collect())
    }

    /// Remove everything under the store root and start over with an empty index.
    ///
    /// Numbering restarts at the origin for every topic.
    pub fn delete_contents(&self) -> StoreResult<()> {
        let _guard = self.guard()?;
        let root = &self.config.root;
        let entries = self
            .dir
            .list_dir(root)
            .map_err(|source| StoreError::WipeFailure {
                path: root.clone(),
                source,
            })?;
        for name in entries {
            let path = storage::join(root, &name);
            self.dir
                .delete(&path)
                .map_err(|source| StoreError::WipeFailure { path, source })?;
        }
        self.save_index(&Index::new(), None)?;
        info!(root = %root, "deleted store contents");
        Ok(())
    }

    /// Compare the index against what is on disk. Read-only.
    ///
    /// Reports segment files that are missing or whose committed bytes do not decode,
    /// uncommitted bytes left behind by failed appends, and files the index does not
    /// reference.
    pub fn check_consistency(&self) -> StoreResult<ConsistencyReport> {
        let _guard = self.guard()?;
        let index = self.load_index()?;
        let root = &self.config.root;
        let mut report = ConsistencyReport::default();

        for topic in index.topic_names() {
            let Some(entry) = index.topic(topic) else {
                continue;
            };
            for meta in entry.segments().iter() {
                let seg = SegmentRef {
                    topic: topic.to_string(),
                    file_name: meta.file_name().to_string(),
                };
                let path = filenamer::message_file_path(meta.file_name(), topic, root);
                if !self.dir.exists(&path) {
                    warn!(topic, file = meta.file_name(), "indexed segment is missing");
                    report.missing_segments.push(seg);
                    continue;
                }
                let extra = self
                    .dir
                    .file_len(&path)
                    .map_or(0, |len| len.saturating_sub(meta.byte_len()));
                let reader = SegmentReader::new(self.dir.clone(), path);
                if let Err(e) = reader.read_committed(meta.byte_len()) {
                    warn!(topic, file = meta.file_name(), error = %e, "segment is unreadable");
                    report.unreadable_segments.push(seg);
                    continue;
                }
                if extra == 0 {
                    continue;
                }
                match reader.read_uncommitted(meta.byte_len()) {
                    Ok(records) if !records.is_empty() => {
                        for r in records {
                            report.orphan_records.push((seg.clone(), r.message_number));
                        }
                    }
                    Ok(_) => report.orphan_tails.push((seg, extra)),
                    Err(e) => {
                        warn!(topic, file = meta.file_name(), bytes = extra, error = %e, "uncommitted tail does not decode");
                        report.orphan_tails.push((seg, extra));
                    }
                }
            }
        }

        let index_name = filenamer::INDEX_FILE_NAME;
        for name in self.list(root)? {
            if name == index_name || name.starts_with(&format!("{index_name}.")) {
                continue;
            }
            let topic_dir = filenamer::directory_for_topic(&name, root);
            let Some(entry) = index.topic(&name) else {
                report.untracked_files.push(topic_dir);
                continue;
            };
            let known: BTreeSet<&str> = entry.segments().iter().map(|m| m.file_name()).collect();
            for file in self.list(&topic_dir)? {
                if !known.contains(file.as_str()) {
                    report.untracked_files.push(storage::join(&topic_dir, &file));
                }
            }
        }

        if !report.is_clean() {
            warn!(
                missing = report.missing_segments.len(),
                unreadable = report.unreadable_segments.len(),
                orphans = report.orphan_records.len(),
                orphan_tails = report.orphan_tails.len(),
                untracked = report.untracked_files.len(),
                "store is inconsistent with its index"
            );
        }
        Ok(report)
    }

    fn list(&self, path: &str) -> StoreResult<Vec<String>> {
        self.dir
            .list_dir(path)
            .map_err(|source| StoreError::ScanFailure {
                path: path.to_string(),
                source,
            })
    }

    /// Make the name of a directory durable in its parent when writes are synced.
    fn sync_dir_entry(&self, path: &str) -> PersistenceResult<()> {
        if self.config.sync_writes && self.dir.file_path(path).is_some() {
            storage::sync_parent_dir(&*self.dir, path)?;
        }
        Ok(())
    }

    fn guard(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn load_index(&self) -> StoreResult<Index> {
        let path = filenamer::index_file(&self.config.root);
        let mut f = self
            .dir
            .open_file(&path)
            .map_err(|source| StoreError::IndexUnavailable { source })?;
        Index::decode(&mut *f).map_err(|source| StoreError::IndexUnavailable { source })
    }

    fn save_index(&self, index: &Index, topic: Option<&str>) -> StoreResult<()> {
        let path = filenamer::index_file(&self.config.root);
        let persist_err = |source: PersistenceError| StoreError::IndexPersistFailure {
            topic: topic.map(str::to_string),
            source,
        };
        let bytes = index.to_bytes().map_err(persist_err)?;
        let written = if self.config.sync_writes && self.dir.file_path(&path).is_some() {
            self.dir.atomic_write_durable(&path, &bytes)
        } else {
            self.dir.atomic_write(&path, &bytes)
        };
        written.map_err(persist_err)
    }

    fn segment_path(&self, file_name: &str, topic: &str) -> String {
        filenamer::message_file_path(file_name, topic, &self.config.root)
    }

    fn append(&self, topic: &str, message: Message) -> StoreResult<MessageNumber> {
        filenamer::validate_topic(topic).map_err(|reason| StoreError::InvalidTopic {
            topic: topic.to_string(),
            reason,
        })?;
        if message.topic != topic {
            return Err(StoreError::InvalidTopic {
                topic: topic.to_string(),
                reason: "message is addressed to a different topic",
            });
        }
        let mut index = self.load_index()?;

        let number = index.next_message_number_for(topic);
        let created = self.clock.now();
        let write_err = |file: &str, source: PersistenceError| StoreError::WriteFailure {
            topic: topic.to_string(),
            file: file.to_string(),
            source,
        };
        let record = segment::encode_record(&StoredMessage {
            message,
            creation_time: created,
            message_number: number,
        })
        .map_err(|source| write_err("", source))?;
        let record_len = record.len() as u64;
        let max = self.config.max_segment_bytes;
        if SEGMENT_HEADER_BYTES + record_len > max {
            return Err(StoreError::MessageTooLarge {
                topic: topic.to_string(),
                size: SEGMENT_HEADER_BYTES + record_len,
                max,
            });
        }

        // A topic without segments may have had its directory created by a call that
        // failed before the index was saved, so its entry is synced again.
        let first_segment = index.current_msg_file_name_for(topic).is_none();
        let topic_dir = filenamer::directory_for_topic(topic, &self.config.root);
        self.dir
            .create_dir(&topic_dir)
            .and_then(|()| {
                if first_segment {
                    self.sync_dir_entry(&topic_dir)?;
                }
                Ok(())
            })
            .map_err(|source| StoreError::DirectoryCreateFailure {
                path: topic_dir.clone(),
                source,
            })?;

        let active = index
            .get_message_file_list_for(topic)
            .current()
            .map(|m| (m.file_name().to_string(), m.byte_len()));
        let (file_name, committed) = match active {
            Some((name, len)) if len + record_len <= max => (name, len),
            previous => {
                let name = filenamer::new_msg_filename_for(topic, &index);
                let len = SegmentWriter::new(
                    self.dir.clone(),
                    self.segment_path(&name, topic),
                    self.config.sync_writes,
                )
                .create()
                .map_err(|source| write_err(&name, source))?;
                index
                    .get_message_file_list_for(topic)
                    .register_new_file(name.clone());
                info!(
                    topic,
                    file = %name,
                    previous = ?previous.map(|(n, _)| n),
                    "opened new segment"
                );
                (name, len)
            }
        };

        SegmentWriter::new(
            self.dir.clone(),
            self.segment_path(&file_name, topic),
            self.config.sync_writes,
        )
        .append_at(committed, &record)
        .map_err(|source| write_err(&file_name, source))?;

        let Some(meta) = index.get_message_file_list_for(topic).meta_mut(&file_name) else {
            return Err(write_err(
                &file_name,
                PersistenceError::Format("active segment missing from index".into()),
            ));
        };
        meta.register_new_message(number, created, record_len);

        if let Err(e) = self.save_index(&index, Some(topic)) {
            warn!(
                topic,
                file = %file_name,
                message_number = number,
                error = %e,
                "message written but index not saved; it is not visible to readers"
            );
            return Err(e);
        }
        debug!(topic, file = %file_name, message_number = number, bytes = record_len, "stored message");
        Ok(number)
    }

    fn read(&self, topic: &str, read_from: MessageNumber) -> StoreResult<PollResult> {
        filenamer::validate_topic(topic).map_err(|reason| StoreError::InvalidTopic {
            topic: topic.to_string(),
            reason,
        })?;
        let index = self.load_index()?;
        let mut result = PollResult {
            messages: Vec::new(),
            new_read_from: read_from,
        };
        let Some(entry) = index.topic(topic) else {
            debug!(topic, read_from, "poll of unknown topic");
            return Ok(result);
        };

        for meta in entry.segments().segments_from(read_from) {
            let records = SegmentReader::new(self.dir.clone(), self.segment_path(meta.file_name(), topic))
                .read_committed(meta.byte_len())
                .map_err(|source| StoreError::SegmentReadFailure {
                    topic: topic.to_string(),
                    file: meta.file_name().to_string(),
                    source,
                })?;
            for r in records {
                let n = r.message_number;
                if n >= read_from && meta.contains(n) {
                    result.new_read_from = result.new_read_from.max(n + 1);
                    result.messages.push(r.message);
                }
            }
        }
        debug!(
            topic,
            read_from,
            returned = result.messages.len(),
            new_read_from = result.new_read_from,
            "polled"
        );
        Ok(result)
    }

    fn purge(&self, cutoff: Timestamp) -> StoreResult<RemovedMessages> {
        let mut index = self.load_index()?;
        let mut plan = PurgePlan::default();

        if let Err(e) = self.compact(&mut index, cutoff, &mut plan) {
            self.discard(&plan.written);
            return Err(e);
        }
        if plan.removed.is_empty() {
            debug!(cutoff = cutoff.as_micros(), "nothing to purge");
            return Ok(plan.removed);
        }

        // Compacted copies stay put on failure: the index may already reference them.
        self.save_index(&index, None)?;

        for path in &plan.obsolete {
            if let Err(e) = self.dir.delete(path) {
                warn!(file = %path, error = %e, "could not delete purged segment");
            }
        }
        info!(
            cutoff = cutoff.as_micros(),
            topics = plan.removed.len(),
            messages = plan.removed.values().map(Vec::len).sum::<usize>(),
            segments_retired = plan.obsolete.len(),
            "purged old messages"
        );
        Ok(plan.removed)
    }

    /// Drop old messages from `index` and write compacted copies of partly-purged segments.
    fn compact(&self, index: &mut Index, cutoff: Timestamp, plan: &mut PurgePlan) -> StoreResult<()> {
        let root = &self.config.root;
        for (topic, list) in index.segment_lists_mut() {
            for purged in list.remove_older_than(cutoff) {
                let old_path = filenamer::message_file_path(&purged.file_name, topic, root);
                if !purged.dropped {
                    let Some(meta) = list.meta(&purged.file_name) else {
                        continue;
                    };
                    let live: Vec<StoredMessage> = SegmentReader::new(self.dir.clone(), old_path.clone())
                        .read_committed(meta.byte_len())
                        .map_err(|source| StoreError::SegmentReadFailure {
                            topic: topic.to_string(),
                            file: purged.file_name.clone(),
                            source,
                        })?
                        .into_iter()
                        .filter(|r| meta.contains(r.message_number))
                        .collect();

                    let new_name = filenamer::segment_file_name(list.next_seq());
                    let new_path = filenamer::message_file_path(&new_name, topic, root);
                    let len = SegmentWriter::new(self.dir.clone(), new_path.clone(), self.config.sync_writes)
                        .write_records(&live)
                        .map_err(|source| StoreError::WriteFailure {
                            topic: topic.to_string(),
                            file: new_name.clone(),
                            source,
                        })?;
                    plan.written.push(new_path);
                    debug!(topic, from = %purged.file_name, to = %new_name, kept = live.len(), "compacted segment");
                    list.replace_file(&purged.file_name, new_name, len);
                }
                plan.obsolete.push(old_path);
                plan.removed
                    .entry(topic.to_string())
                    .or_default()
                    .extend(purged.removed);
            }
        }
        Ok(())
    }

    fn discard(&self, paths: &[String]) {
        for path in paths {
            if let Err(e) = self.dir.delete(path) {
                warn!(file = %path, error = %e, "could not remove abandoned compacted segment");
            }
        }
    }
}

impl BackingStore for FileStore {
    fn store(&self, topic: &str, message: Message) -> StoreResult<MessageNumber> {
        let _guard = self.guard()?;
        self.append(topic, message)
    }

    fn remove_old_messages(&self, max_age: Timestamp) -> StoreResult<RemovedMessages> {
        let _guard = self.guard()?;
        self.purge(max_age)
    }

    fn poll(&self, topic: &str, read_from: MessageNumber) -> StoreResult<PollResult> {
        let _guard = self.guard()?;
        self.read(topic, read_from)
    }
}
