//! Materialized view over a snapshot/delta/removal event stream
//!
//! `MaterializedView` owns the confirmed row set of one subscription and a
//! buffer for an in-progress snapshot. Readers get `Arc<ViewState>`
//! snapshots: mutations go through `Arc::make_mut`, so a snapshot handed out
//! earlier is never touched by later events.
//!
//! Apply flow:
//! 1. `SnapshotBegin` opens (or reopens) the pending buffer
//! 2. `SnapshotRow` appends to the buffer
//! 3. `SnapshotEnd` swaps the buffer in as the new confirmed state
//! 4. `Upsert` / `Remove` mutate the confirmed state in arrival order

use std::collections::HashMap;
use std::sync::Arc;

use grid_types::errors::ViewError;
use grid_types::row::{Row, RowKey};
use grid_types::value::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::events::Event;

/// Ordered, key-indexed set of rows.
///
/// Invariant: no two rows share a `RowKey`, and `index[key]` is the position
/// of that key's row in `rows`.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    rows: Vec<Arc<Row>>,
    index: HashMap<RowKey, usize>,
    version: u64,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from snapshot rows.
    ///
    /// A key repeated within the snapshot keeps its first position and is
    /// merged field-wise with the later copies.
    fn from_rows(rows: Vec<Row>, version: u64) -> Self {
        let mut state = Self {
            rows: Vec::with_capacity(rows.len()),
            index: HashMap::with_capacity(rows.len()),
            version,
        };
        for row in rows {
            state.merge_in(row);
        }
        state
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Mutation counter; bumped on every change to the row set.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, key: &RowKey) -> Option<&Row> {
        self.index.get(key).map(|&pos| self.rows[pos].as_ref())
    }

    pub fn contains(&self, key: &RowKey) -> bool {
        self.index.contains_key(key)
    }

    /// Position of a row in display order.
    pub fn position(&self, key: &RowKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Rows in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().map(|r| r.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &RowKey> {
        self.rows.iter().map(|r| r.key())
    }

    /// Owned copy of the rows in display order.
    pub fn to_rows(&self) -> Vec<Row> {
        self.rows.iter().map(|r| Row::clone(r)).collect()
    }

    /// SHA-256 over keys and fields in display order. Numbers are hashed
    /// normalized, so `1.0` and `1.00` give the same checksum.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for row in &self.rows {
            hasher.update(row.key().as_str().as_bytes());
            hasher.update(b"{");
            for (name, value) in row.fields() {
                hasher.update(name.as_bytes());
                hasher.update(b"=");
                hasher.update(value.kind().as_bytes());
                hasher.update(b":");
                match value {
                    Value::Number(d) => hasher.update(d.normalize().to_string().as_bytes()),
                    other => hasher.update(other.to_string().as_bytes()),
                }
                hasher.update(b";");
            }
            hasher.update(b"}");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Merge `row` into an existing row with the same key, or append it.
    fn merge_in(&mut self, row: Row) -> Arc<Row> {
        match self.index.get(row.key()) {
            Some(&pos) => {
                let merged = Arc::new(self.rows[pos].merged_with(&row));
                self.rows[pos] = Arc::clone(&merged);
                merged
            }
            None => {
                let row = Arc::new(row);
                self.index.insert(row.key().clone(), self.rows.len());
                self.rows.push(Arc::clone(&row));
                row
            }
        }
    }

    fn remove(&mut self, key: &RowKey) -> Option<Arc<Row>> {
        let pos = self.index.remove(key)?;
        let removed = self.rows.remove(pos);
        for row in &self.rows[pos..] {
            if let Some(slot) = self.index.get_mut(row.key()) {
                *slot -= 1;
            }
        }
        Some(removed)
    }
}

/// Client-side materialized view of one subscription's result set.
#[derive(Debug, Default)]
pub struct MaterializedView {
    /// Last completed snapshot plus the deltas applied since.
    confirmed: Arc<ViewState>,
    /// Rows of an in-progress snapshot; `None` when no snapshot is loading.
    pending: Option<Vec<Row>>,
    /// Completed snapshot cycles since creation.
    snapshots_completed: u64,
}

impl MaterializedView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a snapshot buffer, discarding any partially buffered snapshot.
    pub fn begin_snapshot(&mut self) {
        if let Some(discarded) = self.pending.replace(Vec::new()) {
            if !discarded.is_empty() {
                debug!(
                    discarded_rows = discarded.len(),
                    "Snapshot restarted, partial buffer discarded"
                );
            }
        }
    }

    /// Buffer one snapshot row.
    pub fn add_snapshot_row(&mut self, row: Row) -> Result<(), ViewError> {
        match self.pending.as_mut() {
            Some(buffer) => {
                buffer.push(row);
                Ok(())
            }
            None => Err(ViewError::ProtocolOrder {
                operation: "add_snapshot_row",
            }),
        }
    }

    /// Swap the buffered snapshot in as the confirmed state.
    ///
    /// This is the only point where a snapshot becomes visible: readers see
    /// either the previous state or the complete new one.
    pub fn end_snapshot(&mut self) -> Result<usize, ViewError> {
        let rows = self.pending.take().ok_or(ViewError::ProtocolOrder {
            operation: "end_snapshot",
        })?;
        let version = self.confirmed.version + 1;
        self.confirmed = Arc::new(ViewState::from_rows(rows, version));
        self.snapshots_completed += 1;

        debug!(
            rows = self.confirmed.len(),
            version,
            "Snapshot swapped in"
        );
        Ok(self.confirmed.len())
    }

    /// Insert a new row or merge an update into the existing row.
    ///
    /// Merging is per field: incoming non-null fields win, everything the
    /// update omits is retained.
    pub fn upsert(&mut self, row: Row) -> Row {
        let state = Arc::make_mut(&mut self.confirmed);
        state.version += 1;
        Row::clone(&state.merge_in(row))
    }

    /// Delete a row. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &RowKey) -> Option<Row> {
        if !self.confirmed.contains(key) {
            return None;
        }
        let state = Arc::make_mut(&mut self.confirmed);
        state.version += 1;
        state.remove(key).map(|r| Row::clone(&r))
    }

    /// Reset to an empty view, dropping any snapshot in progress.
    pub fn clear(&mut self) {
        self.pending = None;
        if self.confirmed.is_empty() {
            return;
        }
        let version = self.confirmed.version + 1;
        self.confirmed = Arc::new(ViewState {
            version,
            ..ViewState::default()
        });
    }

    /// Apply a typed event.
    pub fn apply(&mut self, event: Event) -> Result<(), ViewError> {
        match event {
            Event::SnapshotBegin => self.begin_snapshot(),
            Event::SnapshotRow(row) => self.add_snapshot_row(row)?,
            Event::SnapshotEnd => {
                self.end_snapshot()?;
            }
            Event::Upsert(row) => {
                self.upsert(row);
            }
            Event::Remove(key) => {
                self.remove(&key);
            }
        }
        Ok(())
    }

    /// Point-in-time read-only view of the confirmed state.
    pub fn snapshot(&self) -> Arc<ViewState> {
        Arc::clone(&self.confirmed)
    }

    /// Whether a snapshot is currently being buffered.
    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of rows buffered for the in-progress snapshot.
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn snapshots_completed(&self) -> u64 {
        self.snapshots_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn row(id: i64, price: i64) -> Row {
        Row::new(RowKey::new(id.to_string()))
            .with("id", id)
            .with("price", price)
    }

    fn loaded(rows: Vec<Row>) -> MaterializedView {
        let mut view = MaterializedView::new();
        view.begin_snapshot();
        for r in rows {
            view.add_snapshot_row(r).unwrap();
        }
        view.end_snapshot().unwrap();
        view
    }

    #[test]
    fn test_snapshot_upsert_remove_scenario() {
        let mut view = loaded(vec![row(1, 10), row(2, 20)]);
        assert_eq!(view.snapshot().to_rows(), vec![row(1, 10), row(2, 20)]);

        view.upsert(Row::new(RowKey::new("1")).with("id", 1).with("price", 11));
        let snap = view.snapshot();
        assert_eq!(snap.to_rows(), vec![row(1, 11), row(2, 20)]);

        view.remove(&RowKey::new("2"));
        assert_eq!(view.snapshot().to_rows(), vec![row(1, 11)]);
    }

    #[test]
    fn test_partial_upsert_retains_fields() {
        let ibm = Row::new(RowKey::new("IBM"))
            .with("symbol", "IBM")
            .with("bid", 100)
            .with("ask", 101);
        let mut view = loaded(vec![ibm]);

        let result = view.upsert(Row::new(RowKey::new("IBM")).with("symbol", "IBM").with("bid", 102));
        assert_eq!(result.get("bid"), Some(&Value::from(102)));
        assert_eq!(result.get("ask"), Some(&Value::from(101)));
        assert_eq!(view.snapshot().get(&RowKey::new("IBM")), Some(&result));
    }

    #[test]
    fn test_upsert_new_row_appends() {
        let mut view = loaded(vec![row(1, 10)]);
        view.upsert(row(3, 30));
        view.upsert(row(2, 20));

        let keys: Vec<String> = view
            .snapshot()
            .keys()
            .map(|k| k.as_str().to_string())
            .collect();
        assert_eq!(keys, vec!["1", "3", "2"]);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut view = loaded(vec![row(1, 10)]);
        let before = view.snapshot().version();

        assert!(view.remove(&RowKey::new("missing")).is_none());
        assert_eq!(view.snapshot().len(), 1);
        assert_eq!(view.snapshot().version(), before);
    }

    #[test]
    fn test_remove_keeps_index_consistent() {
        let mut view = loaded(vec![row(1, 10), row(2, 20), row(3, 30), row(4, 40)]);
        view.remove(&RowKey::new("2"));

        let snap = view.snapshot();
        assert_eq!(snap.position(&RowKey::new("1")), Some(0));
        assert_eq!(snap.position(&RowKey::new("3")), Some(1));
        assert_eq!(snap.position(&RowKey::new("4")), Some(2));
        assert_eq!(snap.get(&RowKey::new("4")), Some(&row(4, 40)));
    }

    #[test]
    fn test_snapshot_row_without_begin_rejected() {
        let mut view = MaterializedView::new();
        let result = view.add_snapshot_row(row(1, 10));
        assert_eq!(
            result,
            Err(ViewError::ProtocolOrder {
                operation: "add_snapshot_row"
            })
        );
        assert!(view.snapshot().is_empty());
    }

    #[test]
    fn test_end_without_begin_rejected() {
        let mut view = loaded(vec![row(1, 10)]);
        assert!(view.end_snapshot().is_err());
        assert_eq!(view.snapshot().len(), 1);
    }

    #[test]
    fn test_begin_is_idempotent() {
        let mut view = MaterializedView::new();
        view.begin_snapshot();
        view.add_snapshot_row(row(1, 10)).unwrap();
        view.begin_snapshot();
        assert_eq!(view.pending_len(), 0);

        view.add_snapshot_row(row(2, 20)).unwrap();
        view.end_snapshot().unwrap();
        assert_eq!(view.snapshot().to_rows(), vec![row(2, 20)]);
    }

    #[test]
    fn test_pending_snapshot_invisible_until_end() {
        let mut view = loaded(vec![row(1, 10)]);
        let old = view.snapshot();

        view.begin_snapshot();
        view.add_snapshot_row(row(7, 70)).unwrap();
        view.add_snapshot_row(row(8, 80)).unwrap();
        assert_eq!(view.snapshot().to_rows(), vec![row(1, 10)]);

        view.end_snapshot().unwrap();
        assert_eq!(view.snapshot().to_rows(), vec![row(7, 70), row(8, 80)]);
        // Earlier snapshot is untouched
        assert_eq!(old.to_rows(), vec![row(1, 10)]);
    }

    #[test]
    fn test_snapshot_isolated_from_later_mutation() {
        let mut view = loaded(vec![row(1, 10)]);
        let snap = view.snapshot();

        view.upsert(row(1, 99));
        view.upsert(row(2, 20));

        assert_eq!(snap.to_rows(), vec![row(1, 10)]);
        assert_eq!(view.snapshot().len(), 2);
    }

    #[test]
    fn test_duplicate_keys_in_snapshot_merge() {
        let view = loaded(vec![
            row(1, 10),
            row(2, 20),
            Row::new(RowKey::new("1")).with("price", 15),
        ]);
        let snap = view.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.to_rows()[0], row(1, 15));
    }

    #[test]
    fn test_clear_drops_rows_and_pending() {
        let mut view = loaded(vec![row(1, 10)]);
        view.begin_snapshot();
        view.clear();

        assert!(view.snapshot().is_empty());
        assert!(!view.is_loading());
    }

    #[test]
    fn test_apply_dispatch() {
        let mut view = MaterializedView::new();
        view.apply(Event::SnapshotBegin).unwrap();
        view.apply(Event::SnapshotRow(row(1, 10))).unwrap();
        view.apply(Event::SnapshotEnd).unwrap();
        view.apply(Event::Upsert(row(2, 20))).unwrap();
        view.apply(Event::Remove(RowKey::new("1"))).unwrap();

        assert_eq!(view.snapshot().to_rows(), vec![row(2, 20)]);
        assert_eq!(view.snapshots_completed(), 1);
        assert!(view.apply(Event::SnapshotRow(row(3, 30))).is_err());
    }

    #[test]
    fn test_checksum_deterministic() {
        let a = loaded(vec![row(1, 10), row(2, 20)]);
        let b = loaded(vec![row(1, 10), row(2, 20)]);
        assert_eq!(a.snapshot().checksum(), b.snapshot().checksum());

        let c = loaded(vec![row(2, 20), row(1, 10)]);
        assert_ne!(a.snapshot().checksum(), c.snapshot().checksum());
    }

    #[test]
    fn test_checksum_ignores_decimal_scale() {
        let one = |scaled: Decimal| loaded(vec![Row::new(RowKey::new("IBM")).with("bid", scaled)]);
        let a = one(Decimal::new(10, 1));
        let b = one(Decimal::new(100, 2));
        assert_eq!(a.snapshot().checksum(), b.snapshot().checksum());

        let c = one(Decimal::new(101, 2));
        assert_ne!(a.snapshot().checksum(), c.snapshot().checksum());
    }
}
