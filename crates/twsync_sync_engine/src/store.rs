//! Local task storage seen by a sync session.

use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use twsync_protocol::{Cursor, Record};

/// Host storage that a sync round reads from and writes to.
///
/// A session holds the store mutably for the whole round. The cursor is
/// only committed after every replayed record was applied and the sent
/// batch acknowledged; a round that fails in between leaves the old cursor
/// in place, so the next round replays the same records again. `apply`
/// must therefore tolerate seeing a record it has already applied.
pub trait SyncStore: Send {
    /// Returns the cursor of the last committed round.
    fn current_cursor(&self) -> SyncResult<Cursor>;

    /// Returns up to `limit` unacknowledged local records, oldest first.
    fn pending_batch(&self, limit: usize) -> SyncResult<Vec<Record>>;

    /// Applies one replayed record. Must be idempotent per record.
    fn apply(&mut self, record: &Record) -> SyncResult<()>;

    /// Marks records as accepted by the server.
    fn acknowledge(&mut self, sent: &[Record]) -> SyncResult<()>;

    /// Persists the cursor returned by the server.
    fn commit_cursor(&mut self, cursor: &Cursor) -> SyncResult<()>;
}

/// Attributes of one task.
pub type Task = BTreeMap<String, String>;

/// An in-memory store for hosts without persistence and for tests.
///
/// Tasks are attribute maps. Local changes are queued in order with a
/// sequence marker; replayed records are merged attribute by attribute.
/// The store serializes with serde, so a host can snapshot it between
/// rounds; the applied counter is not part of the snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySyncStore {
    tasks: BTreeMap<String, Task>,
    pending: Vec<Record>,
    cursor: Cursor,
    next_marker: u64,
    #[serde(skip)]
    applied: usize,
}

impl MemorySyncStore {
    /// Creates an empty store at the initial cursor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store at `cursor`.
    pub fn with_cursor(cursor: Cursor) -> Self {
        Self {
            cursor,
            ..Self::default()
        }
    }

    /// Records a local change: merges it into the task and queues it.
    ///
    /// A record without a marker gets the next sequence number. Returns the
    /// marker the change was queued with.
    pub fn add_pending(&mut self, mut record: Record) -> String {
        self.next_marker += 1;
        if record.marker().is_none() {
            record.set_marker(Some(self.next_marker.to_string()));
        }
        merge(&mut self.tasks, &record);
        let marker = record.marker().unwrap_or_default().to_string();
        self.pending.push(record);
        marker
    }

    /// Returns the unacknowledged local changes, oldest first.
    pub fn pending(&self) -> &[Record] {
        &self.pending
    }

    /// Returns a task by identifier.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Returns all tasks.
    pub fn tasks(&self) -> &BTreeMap<String, Task> {
        &self.tasks
    }

    /// Returns the committed cursor.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Returns how many replayed records were applied, repeats included.
    pub fn applied_count(&self) -> usize {
        self.applied
    }
}

impl SyncStore for MemorySyncStore {
    fn current_cursor(&self) -> SyncResult<Cursor> {
        Ok(self.cursor.clone())
    }

    fn pending_batch(&self, limit: usize) -> SyncResult<Vec<Record>> {
        Ok(self.pending.iter().take(limit).cloned().collect())
    }

    fn apply(&mut self, record: &Record) -> SyncResult<()> {
        merge(&mut self.tasks, record);
        self.applied += 1;
        Ok(())
    }

    fn acknowledge(&mut self, sent: &[Record]) -> SyncResult<()> {
        self.pending.retain(|record| !sent.contains(record));
        Ok(())
    }

    fn commit_cursor(&mut self, cursor: &Cursor) -> SyncResult<()> {
        self.cursor = cursor.clone();
        Ok(())
    }
}

fn merge(tasks: &mut BTreeMap<String, Task>, record: &Record) {
    if record.is_deletion() {
        tasks.remove(record.id());
        return;
    }
    let task = tasks.entry(record.id().to_string()).or_default();
    for (name, value) in record.attributes() {
        match value {
            Some(value) => {
                task.insert(name.clone(), value.clone());
            }
            None => {
                task.remove(name);
            }
        }
    }
}
