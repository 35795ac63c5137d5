//! Cache Object Table
//!
//! Every cached object (file, level, face block, tile, reduction, metadata
//! block, large metadata value) lives in one table keyed by [`ObjectId`].
//! Parents reference children through `(parent, slot)` keys rather than
//! pointers, so detaching a child is a map removal.
//!
//! All methods run under the cache lock. Reference counts are plain
//! integers guarded by that lock; payload memory is kept alive separately by
//! `Arc`, so an object leaving the table never invalidates data a handle is
//! still reading.
//!
//! Object rules:
//! - an object is queued in an LRU list iff its refcount is zero and it
//!   still has a parent
//! - an orphan (no parent) is destroyed the moment its refcount reaches zero
//! - destroying an object orphans all of its children and releases its pins

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::lru::LruList;
use super::metrics::CacheMetrics;
use crate::error::{Error, Result};
use crate::face::FaceBlock;
use crate::metadata::MetaBlock;
use crate::reader::level::Level;
use crate::reader::ReaderInner;

// =============================================================================
// Keys
// =============================================================================

/// Cache-wide object identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ObjectId(pub(crate) u64);

/// Position of a child inside its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Slot {
    /// Stored mip level of a file
    Level(u16),
    /// Face block within a level
    Face(u32),
    /// Tile within a tiled block
    Tile(u32),
    /// Synthesized reduction of a file's face, keyed by packed resolution
    Reduction { face: u32, res: u16 },
    /// Metadata block of a file
    MetaData,
    /// Large metadata value within a metadata block
    LargeMeta(u32),
}

impl Slot {
    const MIN: Slot = Slot::Level(0);
}

/// Owner of an object's slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Parent {
    FileTable(String),
    Object(ObjectId, Slot),
}

/// Lifecycle of a cached object
///
/// A live object is reachable from its parent and parks in an unused list
/// when its last reference drops. An orphaned object is unreachable and is
/// destroyed on its last release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    Live,
    Orphaned,
}

// =============================================================================
// Payloads
// =============================================================================

/// Cached object contents
#[derive(Clone)]
pub(crate) enum Payload {
    File(Arc<ReaderInner>),
    Level(Arc<Level>),
    Face(Arc<FaceBlock>),
    Meta(Arc<MetaBlock>),
    LargeMeta(Bytes),
}

impl Payload {
    fn is_file(&self) -> bool {
        matches!(self, Payload::File(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            Payload::File(_) => "file",
            Payload::Level(_) => "level",
            Payload::Face(_) => "face",
            Payload::Meta(_) => "metadata",
            Payload::LargeMeta(_) => "large metadata",
        }
    }

    pub(crate) fn into_level(self) -> Result<Arc<Level>> {
        match self {
            Payload::Level(level) => Ok(level),
            other => Err(mismatch("level", &other)),
        }
    }

    pub(crate) fn into_face(self) -> Result<Arc<FaceBlock>> {
        match self {
            Payload::Face(face) => Ok(face),
            other => Err(mismatch("face", &other)),
        }
    }

    pub(crate) fn into_meta(self) -> Result<Arc<MetaBlock>> {
        match self {
            Payload::Meta(meta) => Ok(meta),
            other => Err(mismatch("metadata", &other)),
        }
    }

    pub(crate) fn into_large_meta(self) -> Result<Bytes> {
        match self {
            Payload::LargeMeta(data) => Ok(data),
            other => Err(mismatch("large metadata", &other)),
        }
    }
}

fn mismatch(expected: &str, found: &Payload) -> Error {
    Error::CorruptData(format!(
        "cache slot holds {} where {} was expected",
        found.kind(),
        expected
    ))
}

/// Table entry for one cached object
struct Entry {
    payload: Payload,
    refcount: usize,
    state: EntryState,
    parent: Option<Parent>,
    lru_seq: Option<u64>,
    size: usize,
    /// Objects this one holds a reference on until destroyed
    pins: Vec<ObjectId>,
}

/// File table slot
#[derive(Debug, Clone)]
pub(crate) enum FileSlot {
    Open(ObjectId),
    Failed(String),
}

/// Resource limits enforced by the purge passes
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub max_files: usize,
    pub max_mem: usize,
    pub min_data_count: usize,
}

// =============================================================================
// Cache State
// =============================================================================

pub(crate) struct CacheState {
    objects: HashMap<ObjectId, Entry>,
    children: BTreeMap<(ObjectId, Slot), ObjectId>,
    files: HashMap<String, FileSlot>,
    unused_files: LruList,
    unused_data: LruList,
    unused_data_size: usize,
    open_files: usize,
    next_id: u64,
    limits: Limits,
    metrics: Arc<CacheMetrics>,
    /// Payloads of destroyed objects, dropped after the lock is released
    garbage: Vec<Payload>,
}

impl CacheState {
    pub(crate) fn new(limits: Limits, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            objects: HashMap::new(),
            children: BTreeMap::new(),
            files: HashMap::new(),
            unused_files: LruList::new(),
            unused_data: LruList::new(),
            unused_data_size: 0,
            open_files: 0,
            next_id: 1,
            limits,
            metrics,
            garbage: Vec::new(),
        }
    }

    pub(crate) fn limits(&self) -> Limits {
        self.limits
    }

    pub(crate) fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
        self.purge_files();
        self.purge_data();
    }

    /// Take payloads of destroyed objects so they drop outside the lock
    pub(crate) fn take_garbage(&mut self) -> Vec<Payload> {
        std::mem::take(&mut self.garbage)
    }

    fn alloc_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        id
    }

    fn new_entry(&mut self, payload: Payload, size: usize, parent: Option<Parent>) -> ObjectId {
        let id = self.alloc_id();
        let state = if parent.is_some() {
            EntryState::Live
        } else {
            EntryState::Orphaned
        };
        self.objects.insert(
            id,
            Entry {
                payload,
                refcount: 1,
                state,
                parent,
                lru_seq: None,
                size,
                pins: Vec::new(),
            },
        );
        self.metrics.record_created();
        id
    }

    // =========================================================================
    // File Table
    // =========================================================================

    /// Reference the open file for `path`, if any
    pub(crate) fn lookup_file(&mut self, path: &str) -> Option<Result<(ObjectId, Arc<ReaderInner>)>> {
        let id = match self.files.get(path)? {
            FileSlot::Open(id) => *id,
            FileSlot::Failed(reason) => {
                debug!(path, reason = %reason, "Open failed earlier");
                return Some(Err(Error::PreviouslyFailed {
                    path: path.to_string(),
                }))
            }
        };
        let inner = match &self.objects.get(&id)?.payload {
            Payload::File(inner) => inner.clone(),
            other => return Some(Err(mismatch("file", other))),
        };
        self.add_ref(id);
        self.metrics.record_file_table_hit();
        Some(Ok((id, inner)))
    }

    /// Publish a newly opened file with one reference held by the caller
    pub(crate) fn insert_file(&mut self, path: &str, inner: Arc<ReaderInner>) -> ObjectId {
        let id = self.new_entry(
            Payload::File(inner),
            0,
            Some(Parent::FileTable(path.to_string())),
        );
        self.files.insert(path.to_string(), FileSlot::Open(id));
        self.open_files += 1;
        self.metrics.record_file_opened();
        id
    }

    /// Remember that opening `path` failed
    pub(crate) fn mark_failed(&mut self, path: &str, reason: String) {
        self.files.insert(path.to_string(), FileSlot::Failed(reason));
        self.metrics.record_open_failure();
    }

    /// Detach `path` from the file table
    pub(crate) fn purge_path(&mut self, path: &str) -> bool {
        match self.files.remove(path) {
            Some(FileSlot::Open(id)) => {
                debug!(path, "Purging file");
                self.metrics.record_purge();
                self.orphan(id);
                true
            }
            Some(FileSlot::Failed(_)) => true,
            None => false,
        }
    }

    /// Detach every file from the file table
    pub(crate) fn purge_all(&mut self) {
        let paths: Vec<String> = self.files.keys().cloned().collect();
        for path in paths {
            self.purge_path(&path);
        }
    }

    // =========================================================================
    // Child Slots
    // =========================================================================

    /// Reference the child in `(parent, slot)`, if populated
    pub(crate) fn acquire(&mut self, parent: ObjectId, slot: Slot) -> Option<(ObjectId, Payload)> {
        let id = *self.children.get(&(parent, slot))?;
        let payload = self.objects.get(&id)?.payload.clone();
        self.add_ref(id);
        Some((id, payload))
    }

    /// Publish a fully built child into `(parent, slot)` with one reference
    /// held by the caller
    ///
    /// If the slot was filled meanwhile the existing child is referenced
    /// and returned instead. If the parent is gone the child starts out
    /// orphaned. Each id in `pins` gains a reference held until the child
    /// is destroyed.
    pub(crate) fn publish(
        &mut self,
        parent: ObjectId,
        slot: Slot,
        payload: Payload,
        size: usize,
        pins: Vec<ObjectId>,
    ) -> (ObjectId, Payload) {
        if let Some(found) = self.acquire(parent, slot) {
            self.garbage.push(payload);
            return found;
        }

        let linked = self.objects.contains_key(&parent);
        let owner = linked.then_some(Parent::Object(parent, slot));
        let id = self.new_entry(payload.clone(), size, owner);
        if linked {
            self.children.insert((parent, slot), id);
        } else {
            self.metrics.record_orphaned();
        }

        for pin in &pins {
            self.add_ref(*pin);
        }
        if let Some(entry) = self.objects.get_mut(&id) {
            entry.pins = pins;
        }

        self.purge_data();
        (id, payload)
    }

    // =========================================================================
    // Reference Counting
    // =========================================================================

    pub(crate) fn add_ref(&mut self, id: ObjectId) {
        let Some(entry) = self.objects.get_mut(&id) else {
            return;
        };
        if entry.refcount == 0 {
            if let Some(seq) = entry.lru_seq.take() {
                if entry.payload.is_file() {
                    self.unused_files.remove(seq);
                } else {
                    self.unused_data.remove(seq);
                    self.unused_data_size -= entry.size;
                }
            }
        }
        entry.refcount += 1;
    }

    pub(crate) fn release(&mut self, id: ObjectId) {
        let Some(entry) = self.objects.get_mut(&id) else {
            return;
        };
        debug_assert!(entry.refcount > 0, "release of unreferenced object");
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount > 0 {
            return;
        }

        debug_assert_eq!(
            entry.parent.is_none(),
            entry.state == EntryState::Orphaned,
            "parent link out of step with entry state"
        );
        let state = entry.state;
        match state {
            EntryState::Orphaned => self.destroy(id),
            EntryState::Live if entry.payload.is_file() => {
                entry.lru_seq = Some(self.unused_files.push_back(id));
            }
            EntryState::Live => {
                entry.lru_seq = Some(self.unused_data.push_back(id));
                self.unused_data_size += entry.size;
            }
        }
    }

    // =========================================================================
    // Orphaning & Destruction
    // =========================================================================

    /// Clear an object's parent; destroy it now if nothing references it
    fn orphan(&mut self, id: ObjectId) {
        let Some(entry) = self.objects.get_mut(&id) else {
            return;
        };
        if entry.state == EntryState::Orphaned {
            return;
        }
        entry.parent = None;
        entry.state = EntryState::Orphaned;
        self.metrics.record_orphaned();
        if entry.refcount == 0 {
            self.destroy(id);
        }
    }

    fn destroy(&mut self, id: ObjectId) {
        let Some(entry) = self.objects.remove(&id) else {
            return;
        };

        if let Some(seq) = entry.lru_seq {
            if entry.payload.is_file() {
                self.unused_files.remove(seq);
            } else {
                self.unused_data.remove(seq);
                self.unused_data_size -= entry.size;
            }
        }

        match &entry.parent {
            Some(Parent::FileTable(path)) => {
                if matches!(self.files.get(path), Some(FileSlot::Open(open)) if *open == id) {
                    self.files.remove(path);
                }
            }
            Some(Parent::Object(parent, slot)) => {
                if self.children.get(&(*parent, *slot)) == Some(&id) {
                    self.children.remove(&(*parent, *slot));
                }
            }
            None => {}
        }
        if entry.payload.is_file() {
            self.open_files -= 1;
        }

        let child_keys: Vec<(ObjectId, Slot)> = self
            .children
            .range((id, Slot::MIN)..(ObjectId(id.0 + 1), Slot::MIN))
            .map(|(key, _)| *key)
            .collect();
        for key in child_keys {
            if let Some(child) = self.children.remove(&key) {
                self.orphan(child);
            }
        }

        for pin in &entry.pins {
            self.release(*pin);
        }

        self.metrics.record_destroyed();
        self.garbage.push(entry.payload);
    }

    // =========================================================================
    // Purge Passes
    // =========================================================================

    /// Evict unused files while more files are open than allowed
    pub(crate) fn purge_files(&mut self) {
        while self.open_files > self.limits.max_files {
            let Some(id) = self.unused_files.pop_front() else {
                break;
            };
            if let Some(entry) = self.objects.get_mut(&id) {
                entry.lru_seq = None;
            }
            debug!(object = id.0, "Evicting unused file");
            self.metrics.record_file_eviction();
            self.destroy(id);
        }
    }

    /// Evict unused data over the memory budget, keeping a minimum count
    pub(crate) fn purge_data(&mut self) {
        while self.unused_data_size > self.limits.max_mem
            && self.unused_data.len() > self.limits.min_data_count
        {
            let Some(id) = self.unused_data.pop_front() else {
                break;
            };
            if let Some(entry) = self.objects.get_mut(&id) {
                entry.lru_seq = None;
                self.unused_data_size -= entry.size;
            }
            self.metrics.record_data_eviction();
            self.destroy(id);
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub(crate) fn open_files(&self) -> usize {
        self.open_files
    }

    pub(crate) fn unused_files(&self) -> usize {
        self.unused_files.len()
    }

    pub(crate) fn unused_data_count(&self) -> usize {
        self.unused_data.len()
    }

    pub(crate) fn unused_data_size(&self) -> usize {
        self.unused_data_size
    }

    pub(crate) fn tracked_objects(&self) -> usize {
        self.objects.len()
    }

    #[cfg(test)]
    fn refcount(&self, id: ObjectId) -> Option<usize> {
        self.objects.get(&id).map(|e| e.refcount)
    }

    #[cfg(test)]
    fn entry_state(&self, id: ObjectId) -> Option<EntryState> {
        self.objects.get(&id).map(|e| e.state)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state(max_files: usize, max_mem: usize, min_data_count: usize) -> CacheState {
        CacheState::new(
            Limits {
                max_files,
                max_mem,
                min_data_count,
            },
            Arc::new(CacheMetrics::new()),
        )
    }

    fn blob(len: usize) -> Payload {
        Payload::LargeMeta(Bytes::from(vec![0u8; len]))
    }

    /// A root data object standing in for a file
    fn root(st: &mut CacheState) -> ObjectId {
        st.new_entry(blob(0), 0, Some(Parent::FileTable("root".into())))
    }

    #[test]
    fn test_publish_and_acquire() {
        let mut st = state(10, 1 << 20, 0);
        let parent = root(&mut st);
        let (id, _) = st.publish(parent, Slot::Level(0), blob(16), 16, Vec::new());

        assert_eq!(st.refcount(id), Some(1));
        let (again, _) = st.acquire(parent, Slot::Level(0)).unwrap();
        assert_eq!(again, id);
        assert_eq!(st.refcount(id), Some(2));
        assert!(st.acquire(parent, Slot::Level(1)).is_none());
    }

    #[test]
    fn test_lru_membership_tracks_refcount() {
        let mut st = state(10, 1 << 20, 0);
        let parent = root(&mut st);
        let (id, _) = st.publish(parent, Slot::Face(0), blob(100), 100, Vec::new());

        st.release(id);
        assert_eq!(st.unused_data_count(), 1);
        assert_eq!(st.unused_data_size(), 100);

        st.add_ref(id);
        assert_eq!(st.unused_data_count(), 0);
        assert_eq!(st.unused_data_size(), 0);
    }

    #[test]
    fn test_duplicate_publish_adopts_existing() {
        let mut st = state(10, 1 << 20, 0);
        let parent = root(&mut st);
        let (first, _) = st.publish(parent, Slot::Tile(3), blob(8), 8, Vec::new());
        let (second, _) = st.publish(parent, Slot::Tile(3), blob(8), 8, Vec::new());

        assert_eq!(first, second);
        assert_eq!(st.refcount(first), Some(2));
        assert_eq!(st.take_garbage().len(), 1);
    }

    #[test]
    fn test_destroy_orphans_referenced_children() {
        let metrics = Arc::new(CacheMetrics::new());
        let mut st = CacheState::new(
            Limits {
                max_files: 10,
                max_mem: 1 << 20,
                min_data_count: 0,
            },
            metrics.clone(),
        );
        let parent = root(&mut st);
        let (held, _) = st.publish(parent, Slot::Face(0), blob(4), 4, Vec::new());
        let (idle, _) = st.publish(parent, Slot::Face(1), blob(4), 4, Vec::new());
        st.release(idle);

        st.release(parent);
        st.orphan(parent);

        // Unreferenced child went with its parent; the held one survives as an orphan.
        assert_eq!(st.refcount(idle), None);
        assert_eq!(st.entry_state(held), Some(EntryState::Orphaned));
        assert!(st.acquire(parent, Slot::Face(0)).is_none());

        st.release(held);
        assert_eq!(st.tracked_objects(), 0);
        assert_eq!(metrics.objects_created(), metrics.objects_destroyed());
    }

    #[test]
    fn test_publish_into_missing_parent_is_orphaned() {
        let mut st = state(10, 1 << 20, 0);
        let (id, _) = st.publish(ObjectId(999), Slot::Level(0), blob(4), 4, Vec::new());
        assert_eq!(st.entry_state(id), Some(EntryState::Orphaned));

        st.release(id);
        assert_eq!(st.tracked_objects(), 0);
        assert_eq!(st.unused_data_count(), 0);
    }

    #[test]
    fn test_state_decides_release_path() {
        let metrics = Arc::new(CacheMetrics::new());
        let mut st = CacheState::new(
            Limits {
                max_files: 10,
                max_mem: 1 << 20,
                min_data_count: 0,
            },
            metrics.clone(),
        );
        let parent = root(&mut st);
        let (child, _) = st.publish(parent, Slot::Face(0), blob(32), 32, Vec::new());
        assert_eq!(st.entry_state(child), Some(EntryState::Live));

        st.release(child);
        assert_eq!(st.entry_state(child), Some(EntryState::Live));
        assert_eq!(st.unused_data_count(), 1);

        st.add_ref(child);
        st.release(parent);
        st.orphan(parent);
        assert_eq!(st.entry_state(child), Some(EntryState::Orphaned));
        st.orphan(child);
        assert_eq!(metrics.snapshot().objects_orphaned, 2);

        // Orphans skip the unused list and go on their last release.
        st.release(child);
        assert_eq!(st.entry_state(child), None);
        assert_eq!(st.unused_data_count(), 0);
        assert_eq!(st.tracked_objects(), 0);
    }

    #[test]
    fn test_purge_data_keeps_floor() {
        let mut st = state(10, 10, 3);
        let parent = root(&mut st);
        for face in 0..8 {
            let (id, _) = st.publish(parent, Slot::Face(face), blob(100), 100, Vec::new());
            st.release(id);
        }
        st.purge_data();
        assert_eq!(st.unused_data_count(), 3);
        assert_eq!(st.unused_data_size(), 300);
        // Oldest evicted first
        assert!(st.acquire(parent, Slot::Face(0)).is_none());
        assert!(st.acquire(parent, Slot::Face(7)).is_some());
    }

    #[test]
    fn test_pins_hold_until_destroy() {
        let mut st = state(10, 1 << 20, 0);
        let parent = root(&mut st);
        let (base, _) = st.publish(parent, Slot::Face(0), blob(4), 4, Vec::new());
        let (derived, _) =
            st.publish(parent, Slot::Reduction { face: 0, res: 1 }, blob(4), 4, vec![base]);
        st.release(base);
        assert_eq!(st.refcount(base), Some(1));

        st.release(derived);
        st.release(parent);
        st.orphan(parent);
        assert_eq!(st.tracked_objects(), 0);
        assert_eq!(st.unused_data_count(), 0);
    }

    #[test]
    fn test_failed_path_short_circuits() {
        let mut st = state(10, 1 << 20, 0);
        st.mark_failed("bad.ptx", "bad magic".into());
        assert!(matches!(
            st.lookup_file("bad.ptx"),
            Some(Err(Error::PreviouslyFailed { .. }))
        ));
        assert!(st.purge_path("bad.ptx"));
        assert!(st.lookup_file("bad.ptx").is_none());
    }
}
