//! Undo and redo stacks.

use tracing::trace;

use crate::op::Op;

/// Reverse ops for one user-level mutation, in application order.
pub type HistoryEntry = Vec<Op>;

#[derive(Debug)]
pub(crate) struct History {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    paused: Option<HistoryEntry>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            paused: None,
            limit,
        }
    }

    /// Records the reverse of a new mutation. While paused, entries coalesce
    /// until [`History::resume`].
    pub fn record(&mut self, entry: HistoryEntry) {
        if entry.is_empty() {
            return;
        }
        match &mut self.paused {
            Some(buffer) => {
                buffer.splice(0..0, entry);
            }
            None => self.push_undo(entry),
        }
    }

    pub fn push_undo(&mut self, entry: HistoryEntry) {
        if self.limit == 0 || entry.is_empty() {
            return;
        }
        self.undo.push(entry);
        if self.undo.len() > self.limit {
            self.undo.remove(0);
        }
    }

    pub fn push_redo(&mut self, entry: HistoryEntry) {
        if self.limit == 0 || entry.is_empty() {
            return;
        }
        self.redo.push(entry);
    }

    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    pub fn clear_redo(&mut self) {
        self.redo.clear();
    }

    pub fn pause(&mut self) {
        if self.paused.is_none() {
            trace!("History paused");
            self.paused = Some(Vec::new());
        }
    }

    pub fn resume(&mut self) {
        if let Some(buffer) = self.paused.take() {
            trace!(ops = buffer.len(), "History resumed");
            self.push_undo(buffer);
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        if let Some(buffer) = &mut self.paused {
            buffer.clear();
        }
    }
}
